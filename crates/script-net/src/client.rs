//! Blocking HTTP client and stream opener

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use script_runtime::{current_execution, ChannelBus};
use tracing::{debug, warn};

use crate::config::{ConfigStore, HttpLogLevel, NetSettings};
use crate::error::{NetError, NetResult};
use crate::log::{LogSink, TracingSink};
use crate::stream::{self, Connections, StreamListener, StreamRequest};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Network client shared by all script threads
///
/// Owns a small tokio runtime. `request` blocks the calling thread; it must
/// not be called from inside an async context.
pub struct NetClient {
    config: Arc<dyn ConfigStore>,
    bus: Arc<ChannelBus>,
    sink: Arc<dyn LogSink>,
    runtime: Option<tokio::runtime::Runtime>,
    connections: Connections,
    next_handle: AtomicU32,
}

impl NetClient {
    pub fn new(config: Arc<dyn ConfigStore>, bus: Arc<ChannelBus>) -> NetResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("script-net")
            .enable_all()
            .build()
            .map_err(|e| NetError::Network(format!("failed to start network runtime: {}", e)))?;

        Ok(Self {
            config,
            bus,
            sink: Arc::new(TracingSink),
            runtime: Some(runtime),
            connections: Arc::new(DashMap::new()),
            next_handle: AtomicU32::new(1),
        })
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    fn runtime(&self) -> NetResult<&tokio::runtime::Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| NetError::Network("network runtime shut down".to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP
    // ─────────────────────────────────────────────────────────────────────────

    /// Perform one HTTP request relative to the configured base URL
    ///
    /// `query` is appended verbatim, already encoded. A positive `timeout`
    /// bounds the whole call. If the calling script is asked to stop while
    /// waiting, the call fails with `NetError::Interrupted`.
    pub fn request(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        body: Option<&str>,
        timeout: Option<Duration>,
    ) -> NetResult<Response> {
        let settings = NetSettings::read(self.config.as_ref());
        let url = resolve_url(&settings, path, query)?;
        let method = reqwest::Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| NetError::InvalidRequest(format!("unsupported method: {}", method)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .build()?;

        let total = timeout.filter(|t| !t.is_zero()).unwrap_or(
            settings.connect_timeout + settings.read_timeout + settings.write_timeout,
        );
        let mut req = client.request(method.clone(), url.clone()).timeout(total);
        if let Some(token) = &settings.api_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = body.filter(|b| !b.trim().is_empty());
        if let Some(body) = body {
            req = req
                .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                .body(body.to_string());
        }
        let req = req.build()?;

        let level = settings.log_level;
        self.log_request(level, &req, body);
        let started = Instant::now();

        let exchange = async move {
            let resp = client.execute(req).await?;
            let code = resp.status().as_u16();
            let headers = resp.headers().clone();
            let body = resp.text().await?;
            Ok::<_, NetError>((Response { code, body }, headers))
        };

        let result = self.block_on_interruptible(exchange);
        match &result {
            Ok((resp, headers)) => {
                self.log_response(level, &url, resp, headers, started.elapsed());
            }
            Err(NetError::Interrupted) => {
                debug!(method = %method, url = %url, "Request interrupted");
            }
            Err(e) => {
                warn!(method = %method, url = %url, error = %e, "Request failed");
                if level >= HttpLogLevel::Basic {
                    self.sink.log(&format!("<-- HTTP FAILED: {}", e));
                }
            }
        }
        result.map(|(resp, _)| resp)
    }

    /// Block on `fut`, abandoning it if the current script execution stops
    fn block_on_interruptible<T, F>(&self, fut: F) -> NetResult<T>
    where
        F: Future<Output = NetResult<T>>,
    {
        let runtime = self.runtime()?;
        let cancel = current_execution().map(|exec| exec.stop_token().cancellation_token());

        runtime.block_on(async move {
            match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => Err(NetError::Interrupted),
                    result = fut => result,
                },
                None => fut.await,
            }
        })
    }

    fn log_request(&self, level: HttpLogLevel, req: &reqwest::Request, body: Option<&str>) {
        if level == HttpLogLevel::None {
            return;
        }
        self.sink.log(&format!("--> {} {}", req.method(), req.url()));
        if level >= HttpLogLevel::Headers {
            self.log_headers(req.headers());
        }
        if level >= HttpLogLevel::Body {
            if let Some(body) = body {
                self.sink.log(body);
            }
        }
        self.sink.log(&format!("--> END {}", req.method()));
    }

    fn log_response(
        &self,
        level: HttpLogLevel,
        url: &url::Url,
        resp: &Response,
        headers: &HeaderMap,
        elapsed: Duration,
    ) {
        if level == HttpLogLevel::None {
            return;
        }
        self.sink.log(&format!(
            "<-- {} {} ({}ms)",
            resp.code,
            url,
            elapsed.as_millis()
        ));
        if level >= HttpLogLevel::Headers {
            self.log_headers(headers);
        }
        if level >= HttpLogLevel::Body && !resp.body.is_empty() {
            self.sink.log(&resp.body);
        }
        self.sink.log("<-- END HTTP");
    }

    fn log_headers(&self, headers: &HeaderMap) {
        for (name, value) in headers {
            let shown = if name == AUTHORIZATION {
                "██"
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            self.sink.log(&format!("{}: {}", name, shown));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Streams
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a WebSocket stream relative to the base URL
    ///
    /// Returns the new handle immediately; the connection outcome arrives as
    /// messages on `channel`.
    pub fn open_stream(
        &self,
        path: &str,
        query: Option<&str>,
        ping_interval: Option<Duration>,
        channel: &str,
    ) -> NetResult<u32> {
        let settings = NetSettings::read(self.config.as_ref());
        let url = stream::websocket_url(resolve_url(&settings, path, query)?)?;
        let runtime = self.runtime()?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let outbound = stream::register(&self.connections, handle);
        let listener = StreamListener::new(
            handle,
            channel,
            self.bus.clone(),
            self.connections.clone(),
        );

        debug!(handle, channel, url = %url, "Opening WebSocket");
        let request = StreamRequest {
            url,
            api_token: settings.api_token,
            connect_timeout: settings.websocket_call_timeout,
            ping_interval: ping_interval.filter(|p| !p.is_zero()),
        };
        runtime.spawn(stream::run_stream(request, listener, outbound));

        Ok(handle)
    }

    /// Send a text frame; false if the handle is unknown, closing, or gone
    pub fn send(&self, handle: u32, text: &str) -> bool {
        stream::send(&self.connections, handle, text)
    }

    /// Begin a graceful close; `websocket_closed` follows on the channel
    pub fn close(&self, handle: u32, code: Option<u16>, reason: Option<&str>) -> bool {
        stream::close(
            &self.connections,
            handle,
            code.unwrap_or(1000),
            reason.unwrap_or(""),
        )
    }

    /// Handles with a live connection task
    pub fn open_handles(&self) -> Vec<u32> {
        let mut handles: Vec<u32> = self.connections.iter().map(|e| *e.key()).collect();
        handles.sort_unstable();
        handles
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Join `path` onto the base URL and attach the pre-encoded query
fn resolve_url(settings: &NetSettings, path: &str, query: Option<&str>) -> NetResult<url::Url> {
    let base = settings
        .base_url
        .as_deref()
        .ok_or_else(|| NetError::Configuration("base URL is not set".to_string()))?;
    let mut url = url::Url::parse(base)
        .map_err(|e| NetError::Configuration(format!("invalid base URL {}: {}", base, e)))?;
    if url.cannot_be_a_base() {
        return Err(NetError::Configuration(format!("invalid base URL {}", base)));
    }

    let joined = format!(
        "{}/{}",
        url.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
