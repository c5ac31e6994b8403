//! WebSocket streams
//!
//! Each open stream is driven by one task on the client runtime. Lifecycle
//! events are posted to the opener's channel; the handle is forgotten once
//! the stream reports `websocket_closed` or `websocket_failure`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use script_runtime::{ChannelBus, Message};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};

pub const WEBSOCKET_OPEN: &str = "websocket_open";
pub const WEBSOCKET_MESSAGE: &str = "websocket_message";
pub const WEBSOCKET_CLOSING: &str = "websocket_closing";
pub const WEBSOCKET_CLOSED: &str = "websocket_closed";
pub const WEBSOCKET_FAILURE: &str = "websocket_failure";

const NORMAL_CLOSURE: u16 = 1000;
const NO_STATUS: u16 = 1005;

// ─────────────────────────────────────────────────────────────────────────────
// Connection Table
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Close(u16, String),
}

#[derive(Debug)]
pub(crate) struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    closing: AtomicBool,
}

pub(crate) type Connections = Arc<DashMap<u32, Connection>>;

pub(crate) fn register(connections: &Connections, handle: u32) -> mpsc::UnboundedReceiver<Outbound> {
    let (tx, rx) = mpsc::unbounded_channel();
    connections.insert(
        handle,
        Connection {
            outbound: tx,
            closing: AtomicBool::new(false),
        },
    );
    rx
}

/// Queue a text frame; false when the handle is unknown or closing
pub(crate) fn send(connections: &Connections, handle: u32, text: &str) -> bool {
    match connections.get(&handle) {
        Some(conn) if !conn.closing.load(Ordering::Acquire) => {
            conn.outbound.send(Outbound::Text(text.to_string())).is_ok()
        }
        _ => false,
    }
}

/// Start a graceful close; false when the handle is unknown
pub(crate) fn close(connections: &Connections, handle: u32, code: u16, reason: &str) -> bool {
    let Some(conn) = connections.get(&handle) else {
        return false;
    };
    if conn.closing.swap(true, Ordering::AcqRel) {
        return true;
    }
    conn.outbound
        .send(Outbound::Close(code, reason.to_string()))
        .is_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Listener
// ─────────────────────────────────────────────────────────────────────────────

/// Turns stream lifecycle callbacks into channel messages
#[derive(Clone)]
pub struct StreamListener {
    handle: u32,
    channel: String,
    bus: Arc<ChannelBus>,
    connections: Connections,
}

impl StreamListener {
    pub(crate) fn new(
        handle: u32,
        channel: impl Into<String>,
        bus: Arc<ChannelBus>,
        connections: Connections,
    ) -> Self {
        Self {
            handle,
            channel: channel.into(),
            bus,
            connections,
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn on_open(&self) {
        debug!(handle = self.handle, channel = %self.channel, "WebSocket open");
        self.post(WEBSOCKET_OPEN, json!({ "handle": self.handle }));
    }

    pub fn on_message(&self, text: &str) {
        self.post(
            WEBSOCKET_MESSAGE,
            json!({ "handle": self.handle, "message": text }),
        );
    }

    pub fn on_closing(&self, code: u16, reason: &str) {
        debug!(handle = self.handle, code, reason, "WebSocket closing");
        self.post(
            WEBSOCKET_CLOSING,
            json!({ "code": code, "reason": reason, "handle": self.handle }),
        );
    }

    pub fn on_closed(&self, code: u16, reason: &str) {
        debug!(handle = self.handle, code, reason, "WebSocket closed");
        self.connections.remove(&self.handle);
        self.post(
            WEBSOCKET_CLOSED,
            json!({ "code": code, "reason": reason, "handle": self.handle }),
        );
    }

    pub fn on_failure(&self, message: &str) {
        warn!(handle = self.handle, channel = %self.channel, error = message, "WebSocket failure");
        self.connections.remove(&self.handle);
        self.post(
            WEBSOCKET_FAILURE,
            json!({ "message": message, "handle": self.handle }),
        );
    }

    fn post(&self, event: &str, params: serde_json::Value) {
        self.bus
            .post_message(&self.channel, Message::with_json(event, &params));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream Task
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct StreamRequest {
    pub url: url::Url,
    pub api_token: Option<String>,
    pub connect_timeout: Duration,
    pub ping_interval: Option<Duration>,
}

pub(crate) async fn run_stream(
    request: StreamRequest,
    listener: StreamListener,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let ws = match connect(&request).await {
        Ok(ws) => ws,
        Err(e) => {
            listener.on_failure(&e);
            return;
        }
    };
    listener.on_open();

    let (mut sink, mut incoming) = ws.split();
    let mut ping = request.ping_interval.map(|period| {
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });
    let mut last_close: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => listener.on_message(&text),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    listener.on_message(&String::from_utf8_lossy(&bytes))
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS, String::new()));
                    listener.on_closing(code, &reason);
                    last_close = Some((code, reason));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    listener.on_failure(&e.to_string());
                    return;
                }
                None => {
                    let (code, reason) = last_close.unwrap_or((NORMAL_CLOSURE, String::new()));
                    listener.on_closed(code, &reason);
                    return;
                }
            },
            Some(out) = outbound.recv() => {
                let frame = match out {
                    Outbound::Text(text) => WsMessage::Text(text),
                    Outbound::Close(code, reason) => WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    })),
                };
                if let Err(e) = sink.send(frame).await {
                    listener.on_failure(&e.to_string());
                    return;
                }
            }
            _ = async {
                match ping.as_mut() {
                    Some(interval) => interval.tick().await,
                    None => std::future::pending().await,
                }
            } => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                    listener.on_failure(&e.to_string());
                    return;
                }
            }
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(request: &StreamRequest) -> Result<WsStream, String> {
    let mut req = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| e.to_string())?;
    if let Some(token) = &request.api_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| e.to_string())?;
        req.headers_mut().insert("Authorization", value);
    }

    match tokio::time::timeout(request.connect_timeout, tokio_tungstenite::connect_async(req)).await
    {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "connect timed out after {}ms",
            request.connect_timeout.as_millis()
        )),
    }
}

/// Map an http(s) base URL onto its ws(s) counterpart
pub(crate) fn websocket_url(mut url: url::Url) -> NetResult<url::Url> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(NetError::Configuration(format!(
                "unsupported scheme for streams: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| NetError::Configuration(format!("cannot use scheme {}", scheme)))?;
    Ok(url)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(handle: u32) -> (StreamListener, Arc<ChannelBus>, Connections) {
        let bus = ChannelBus::new_shared();
        let connections: Connections = Arc::new(DashMap::new());
        let listener = StreamListener::new(handle, "chan1", bus.clone(), connections.clone());
        (listener, bus, connections)
    }

    #[test]
    fn test_open_posts_exactly_one_message() {
        let (listener, bus, _) = listener(1);
        listener.on_open();

        let channel = bus.get_channel("chan1");
        let msg = channel.poll_message().unwrap();
        assert_eq!(msg.event(), WEBSOCKET_OPEN);
        assert_eq!(msg.params_json().unwrap(), json!({ "handle": 1 }));
        assert!(channel.poll_message().is_none());
    }

    #[test]
    fn test_payload_shapes() {
        let (listener, bus, _) = listener(7);
        listener.on_message("hello");
        listener.on_closing(1001, "going away");
        listener.on_failure("connection reset");

        let channel = bus.get_channel("chan1");
        let message = channel.poll_message().unwrap();
        assert_eq!(message.event(), WEBSOCKET_MESSAGE);
        assert_eq!(
            message.params_json().unwrap(),
            json!({ "handle": 7, "message": "hello" })
        );

        let closing = channel.poll_message().unwrap();
        assert_eq!(closing.event(), WEBSOCKET_CLOSING);
        assert_eq!(
            closing.params_json().unwrap(),
            json!({ "code": 1001, "reason": "going away", "handle": 7 })
        );

        let failure = channel.poll_message().unwrap();
        assert_eq!(failure.event(), WEBSOCKET_FAILURE);
        assert_eq!(
            failure.params_json().unwrap(),
            json!({ "message": "connection reset", "handle": 7 })
        );
    }

    #[test]
    fn test_closed_and_failure_forget_handle() {
        let (closed, _, connections) = listener(1);
        let _rx = register(&connections, 1);
        assert!(send(&connections, 1, "ping"));

        closed.on_closed(1000, "bye");
        assert!(!connections.contains_key(&1));
        assert!(!send(&connections, 1, "ping"));

        let failed = StreamListener::new(2, "chan1", ChannelBus::new_shared(), connections.clone());
        let _rx = register(&connections, 2);
        failed.on_failure("boom");
        assert!(!connections.contains_key(&2));
    }

    #[test]
    fn test_close_marks_closing() {
        let connections: Connections = Arc::new(DashMap::new());
        let mut rx = register(&connections, 3);

        assert!(close(&connections, 3, 1000, "done"));
        assert!(!send(&connections, 3, "late"));
        // second close is a no-op
        assert!(close(&connections, 3, 1000, "again"));
        assert!(!close(&connections, 99, 1000, ""));

        match rx.try_recv().unwrap() {
            Outbound::Close(code, reason) => {
                assert_eq!(code, 1000);
                assert_eq!(reason, "done");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_websocket_url() {
        let http = url::Url::parse("http://localhost:8080/api").unwrap();
        assert_eq!(websocket_url(http).unwrap().as_str(), "ws://localhost:8080/api");

        let https = url::Url::parse("https://example.com/").unwrap();
        assert_eq!(websocket_url(https).unwrap().scheme(), "wss");

        let ftp = url::Url::parse("ftp://example.com/").unwrap();
        assert!(matches!(websocket_url(ftp), Err(NetError::Configuration(_))));
    }
}
