//! QuickJS Runtime Wrapper
//!
//! Provides a safe wrapper around the QuickJS JavaScript engine with the
//! host globals installed and record values marshalled through the bridge.

use std::sync::Arc;

use parking_lot::Mutex;
use rquickjs::function::Rest;
use rquickjs::{Context, Ctx, Function, Runtime, Value as JsValue};

use script_runtime::StopToken;
use script_types::Value;

use crate::bridge::{BridgeError, HostBridge};
use crate::convert::Marshal;
use crate::globals::register_host_globals;
use crate::native::NativeLibrary;

// ─────────────────────────────────────────────────────────────────────────────
// JS Runtime Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur in the JavaScript runtime
#[derive(Debug, thiserror::Error)]
pub enum JsError {
    #[error("JavaScript error: {0}")]
    Js(String),

    #[error("Failed to create runtime: {0}")]
    RuntimeCreation(String),

    #[error("Failed to evaluate script: {0}")]
    Eval(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Type conversion error: {0}")]
    Conversion(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type JsResult<T> = Result<T, JsError>;

// ─────────────────────────────────────────────────────────────────────────────
// JS Runtime
// ─────────────────────────────────────────────────────────────────────────────

/// A JavaScript runtime instance
///
/// One QuickJS runtime and context. Long-running code is interrupted once the
/// installed stop token is stopped.
pub struct JsRuntime {
    runtime: Runtime,
    context: Context,
    marshal: Marshal,
    stop: Arc<Mutex<Option<StopToken>>>,
}

impl JsRuntime {
    /// Create a new JavaScript runtime
    pub fn new(bridge: Arc<HostBridge>, natives: &NativeLibrary) -> JsResult<Self> {
        let runtime = Runtime::new().map_err(|e| JsError::RuntimeCreation(e.to_string()))?;
        let context =
            Context::full(&runtime).map_err(|e| JsError::RuntimeCreation(e.to_string()))?;

        let stop: Arc<Mutex<Option<StopToken>>> = Arc::new(Mutex::new(None));
        let watched = Arc::clone(&stop);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            watched.lock().as_ref().is_some_and(StopToken::is_stopped)
        })));

        let js_runtime = Self {
            runtime,
            context,
            marshal: Marshal::new(bridge),
            stop,
        };
        js_runtime.init_globals(natives)?;
        Ok(js_runtime)
    }

    fn init_globals(&self, natives: &NativeLibrary) -> JsResult<()> {
        self.context.with(|ctx| {
            register_host_globals(&ctx, &self.marshal, natives).map_err(|e| JsError::Js(e.to_string()))
        })
    }

    /// Token checked by the interrupt handler; `None` disables interruption
    pub fn set_stop_token(&self, token: Option<StopToken>) {
        *self.stop.lock() = token;
    }

    /// Evaluate a JavaScript snippet
    pub fn eval(&self, script: &str) -> JsResult<Value> {
        self.context.with(|ctx| {
            let result: JsValue = ctx
                .eval(script)
                .map_err(|e| JsError::Eval(describe_error(&ctx, e)))?;
            self.marshal
                .from_js(result)
                .map_err(|e| JsError::Conversion(e.to_string()))
        })
    }

    /// Evaluate a script file in strict mode at global scope
    pub fn eval_file(&self, name: &str, script: &str) -> JsResult<Value> {
        self.context.with(|ctx| {
            let mut options = rquickjs::context::EvalOptions::default();
            options.global = true;
            options.strict = true;
            options.backtrace_barrier = true;

            let result: JsValue = ctx
                .eval_with_options(script, options)
                .map_err(|e| JsError::Eval(format!("{}: {}", name, describe_error(&ctx, e))))?;
            self.marshal
                .from_js(result)
                .map_err(|e| JsError::Conversion(e.to_string()))
        })
    }

    /// Check if a function exists in the global scope
    pub fn has_function(&self, name: &str) -> bool {
        self.context
            .with(|ctx| ctx.globals().get::<_, Function>(name).is_ok())
    }

    /// Call a global function with positional arguments
    pub fn call_function(&self, name: &str, args: &[Value]) -> JsResult<Value> {
        self.context.with(|ctx| {
            let func: Function = ctx
                .globals()
                .get(name)
                .map_err(|_| JsError::FunctionNotFound(name.to_string()))?;

            let mut js_args = Vec::with_capacity(args.len());
            for arg in args {
                let exported = self.marshal.bridge().export(name, arg.clone())?;
                let js = self
                    .marshal
                    .to_js(&ctx, exported)
                    .map_err(|e| JsError::Conversion(describe_error(&ctx, e)))?;
                js_args.push(js);
            }

            let result: JsValue = func
                .call((Rest(js_args),))
                .map_err(|e| JsError::Js(format!("Error calling {}: {}", name, describe_error(&ctx, e))))?;

            self.marshal
                .from_js(result)
                .map_err(|e| JsError::Conversion(e.to_string()))
        })
    }

    /// Wrapped native records still reachable from JavaScript
    pub fn live_records(&self) -> usize {
        self.marshal.live_records()
    }

    /// Run garbage collection
    pub fn gc(&self) {
        self.runtime.run_gc();
    }
}

/// Message of a JS error, including the pending exception when there is one
fn describe_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    caught
        .as_string()
        .and_then(|s| s.to_string().ok())
        .unwrap_or_else(|| format!("{:?}", caught))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use script_types::{Handle, RecordShape, RecordValue, ShapeRegistry};

    fn runtime() -> JsRuntime {
        let shapes = Arc::new(ShapeRegistry::new());
        shapes.register(
            RecordShape::new("item")
                .accessors(&["name", "id"])
                .method("next", |record, _| {
                    let id = record.field("id").and_then(Value::as_i64).unwrap_or(0);
                    Ok(RecordValue::new("item")
                        .with("name", format!("item {}", id + 1))
                        .with("id", id + 1)
                        .into())
                })
                .method("owner", |_, _| Ok(Handle::new("Session").into()))
                .method("fail", |_, _| Err("nope".to_string())),
        );

        let natives = NativeLibrary::new();
        natives.register("make_item", |args| {
            let id = args.first().and_then(Value::as_i64).ok_or("id required")?;
            Ok(RecordValue::new("item").with("name", "seal tooth").with("id", id).into())
        });
        natives.register("describe", |args| match args.first() {
            Some(Value::Record(record)) => Ok(Value::from(format!("{}#{}", record.type_name, record.fields.len()))),
            other => Ok(Value::from(format!("{:?}", other))),
        });
        natives.register("session", |_| Ok(Handle::new("Session").into()));

        JsRuntime::new(Arc::new(HostBridge::new(shapes)), &natives).unwrap()
    }

    #[test]
    fn test_eval_primitives() {
        let runtime = runtime();
        assert_eq!(runtime.eval("42").unwrap(), Value::Int(42));
        assert_eq!(runtime.eval("'hello'").unwrap(), Value::from("hello"));
        assert_eq!(runtime.eval("true").unwrap(), Value::Bool(true));
        assert!(runtime.eval("null").unwrap().is_void());
    }

    #[test]
    fn test_eval_object_and_array() {
        let runtime = runtime();
        let list = runtime.eval("[1, 2, 3]").unwrap();
        assert_eq!(list.as_aggregate().map(|a| a.len()), Some(3));

        let record = runtime.eval("({ __type__: 'effect', turns: 3 })").unwrap();
        assert_eq!(record.as_record().and_then(|r| r.get("turns")), Some(&Value::Int(3)));
    }

    #[test]
    fn test_call_function_with_args() {
        let runtime = runtime();
        runtime
            .eval_file("add.js", "function add(a, b) { return a + b; }")
            .unwrap();
        assert!(runtime.has_function("add"));
        assert!(!runtime.has_function("subtract"));

        assert_eq!(
            runtime.call_function("add", &[1.into(), 2.into()]).unwrap(),
            Value::Int(3)
        );
        assert!(matches!(
            runtime.call_function("subtract", &[]),
            Err(JsError::FunctionNotFound(_))
        ));
    }

    #[test]
    fn test_wrapped_record_methods_chain() {
        let runtime = runtime();
        let result = runtime
            .eval("const it = native.make_item(7); [it.__type__, it.name(), it.next().next().id()]")
            .unwrap();
        let expected = runtime.eval("['item', 'seal tooth', 9]").unwrap();
        assert_eq!(result, expected);
        assert!(runtime.live_records() >= 1);
    }

    #[test]
    fn test_wrapped_records_are_collected() {
        let runtime = runtime();
        runtime
            .eval("for (let i = 0; i < 1000; i++) { native.make_item(i).next().name(); }")
            .unwrap();
        runtime.gc();
        assert!(runtime.live_records() < 10, "{} records alive", runtime.live_records());
    }

    #[test]
    fn test_forged_receiver_returns_null() {
        let runtime = runtime();
        let result = runtime
            .eval_file(
                "forged.js",
                "const real = native.make_item(5); real.name.call({ __type__: 'item', __record__: 0 })",
            )
            .unwrap();
        assert!(result.is_void());

        // a look-alike plain object is converted structurally, not unwrapped
        assert_eq!(
            runtime
                .eval("native.describe({ __type__: 'item', __record__: 0 })")
                .unwrap(),
            Value::from("item#1")
        );
    }

    #[test]
    fn test_cyclic_argument_throws() {
        let runtime = runtime();
        let result = runtime
            .eval(
                "const a = {}; a.self = a; \
                 try { native.describe(a); 'converted' } catch (e) { e instanceof TypeError ? 'type error' : String(e) }",
            )
            .unwrap();
        assert_eq!(result, Value::from("type error"));

        let nested = runtime
            .eval("let deep = 1; for (let i = 0; i < 200; i++) { deep = [deep]; } try { native.describe(deep); 'ok' } catch (e) { 'too deep' }")
            .unwrap();
        assert_eq!(nested, Value::from("too deep"));
    }

    #[test]
    fn test_wrapped_record_round_trips_as_native() {
        let runtime = runtime();
        assert_eq!(
            runtime.eval("native.describe(native.make_item(1))").unwrap(),
            Value::from("item#2")
        );
    }

    #[test]
    fn test_detached_method_returns_null() {
        let runtime = runtime();
        let result = runtime
            .eval_file("detached.js", "const name = native.make_item(1).name; name()")
            .unwrap();
        assert!(result.is_void());
    }

    #[test]
    fn test_leaks_become_null() {
        let runtime = runtime();
        assert!(runtime.eval("native.make_item(1).owner()").unwrap().is_void());
        assert!(runtime.eval("native.session()").unwrap().is_void());
    }

    #[test]
    fn test_handler_errors_throw() {
        let runtime = runtime();
        assert_eq!(
            runtime
                .eval("try { native.make_item(1).fail(); 'no' } catch (e) { 'caught' }")
                .unwrap(),
            Value::from("caught")
        );
        assert_eq!(
            runtime
                .eval("try { native.make_item(); 'no' } catch (e) { 'caught' }")
                .unwrap(),
            Value::from("caught")
        );
    }

    #[test]
    fn test_record_argument_is_wrapped() {
        let runtime = runtime();
        runtime
            .eval_file("arg.js", "function nameOf(item) { return item.name(); }")
            .unwrap();
        let item = RecordValue::new("item").with("name", "hair spray").with("id", 744);
        assert_eq!(
            runtime.call_function("nameOf", &[item.into()]).unwrap(),
            Value::from("hair spray")
        );
        assert!(matches!(
            runtime.call_function("nameOf", &[Handle::new("Session").into()]),
            Err(JsError::Bridge(BridgeError::Leak { .. }))
        ));
    }

    #[test]
    fn test_stop_interrupts_loop() {
        let runtime = runtime();
        runtime.eval_file("spin.js", "function spin() { while (true) {} }").unwrap();

        let token = StopToken::new();
        runtime.set_stop_token(Some(token.clone()));
        token.request_stop();
        assert!(runtime.call_function("spin", &[]).is_err());
    }

    #[test]
    fn test_console_and_host_logging() {
        let runtime = runtime();
        runtime
            .eval("console.log('a', 'b'); console.warn('w'); host.log('hi'); host.error('bad')")
            .unwrap();
    }
}
