//! Script Host
//!
//! Wires the script registry, message bus, network client and JavaScript
//! engine into one `HostContext`, and exposes the host library to scripts.

pub mod config;
pub mod context;
pub mod library;

pub use config::HostConfig;
pub use context::{HostContext, HostError};
