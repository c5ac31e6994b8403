//! Script Types - Typed value model shared by the interpreter and the host bridge
//!
//! This crate contains the pure data structures used by the scripting runtime:
//! type descriptors, the tagged `Value` union, and the proxy-record capability
//! tables that the JavaScript bridge dispatches through.

mod proxy;
mod types;
mod value;

pub use proxy::*;
pub use types::*;
pub use value::*;
