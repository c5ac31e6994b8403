//! Script Net - HTTP requests and WebSocket streams for scripts
//!
//! Requests block the calling script thread until the round trip completes.
//! Streams never block: every lifecycle event is posted as a message on the
//! channel the opener named, tagged with the connection handle.

mod client;
mod config;
mod error;
mod log;
mod stream;

pub use client::{NetClient, Response};
pub use config::*;
pub use error::{NetError, NetResult};
pub use log::{LogSink, TracingSink};
pub use stream::{
    StreamListener, WEBSOCKET_CLOSED, WEBSOCKET_CLOSING, WEBSOCKET_FAILURE, WEBSOCKET_MESSAGE,
    WEBSOCKET_OPEN,
};
