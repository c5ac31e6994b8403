//! Script JS - QuickJS engine and the host bridge
//!
//! Scripts written in JavaScript run on QuickJS. Native records reach them
//! as wrapper objects whose methods dispatch through `HostBridge`, and
//! native functions are exposed on the `native` global. No host object ever
//! reaches JavaScript unconverted.

mod bridge;
mod convert;
mod globals;
mod native;
mod runtime;
mod unit;

pub use bridge::{BridgeError, BridgeValue, HostBridge};
pub use native::{NativeFn, NativeLibrary};
pub use runtime::{JsError, JsResult, JsRuntime};
pub use unit::{JsCompiler, JsUnit};
