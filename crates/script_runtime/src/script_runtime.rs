//! Script Runtime - Named script executions and the message channel bus
//!
//! This crate schedules named script executions on dedicated threads and
//! provides the channel bus that carries asynchronous results back into
//! synchronous script code.
//!
//! # Lifecycle
//!
//! - `ScriptRegistry::get_or_create` finds the live execution for a thread
//!   name or builds a new one from source
//! - `ScriptExecution::start_if_not_running` spawns its thread exactly once
//! - `ScriptExecution::request_stop` asks the body to stop at its next
//!   checkpoint and wakes any blocking channel poll

pub use script_types;

mod channel;
mod error;
mod execution;
mod registry;
mod stop;
mod unit;

pub use channel::*;
pub use error::*;
pub use execution::*;
pub use registry::*;
pub use stop::*;
pub use unit::*;
