//! Network error types

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
    /// Required configuration missing or malformed; nothing was sent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failure: refused, timed out, TLS...
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The calling script execution was asked to stop
    #[error("Request interrupted")]
    Interrupted,
}

impl From<reqwest::Error> for NetError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            NetError::InvalidRequest(e.to_string())
        } else {
            NetError::Network(e.to_string())
        }
    }
}

pub type NetResult<T> = Result<T, NetError>;
