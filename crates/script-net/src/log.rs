//! Diagnostic sink for mirrored network traffic

/// Accepts formatted traffic lines
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line)
    }
}

/// Forwards traffic lines to `tracing` under `script_net::traffic`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, line: &str) {
        tracing::info!(target: "script_net::traffic", "{}", line);
    }
}
