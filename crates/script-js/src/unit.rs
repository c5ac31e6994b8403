//! JavaScript-authored executable units

use std::sync::Arc;

use parking_lot::Mutex;
use script_runtime::{
    ExecutableUnit, ExecutionContext, ScriptCompiler, ScriptError, ScriptSource, StopToken,
};
use script_types::Value;

use crate::bridge::HostBridge;
use crate::native::NativeLibrary;
use crate::runtime::{JsError, JsRuntime};

/// Builds a `JsUnit` per compile, evaluating each source's top level
#[derive(Debug, Clone)]
pub struct JsCompiler {
    bridge: Arc<HostBridge>,
    natives: Arc<NativeLibrary>,
}

impl JsCompiler {
    pub fn new(bridge: Arc<HostBridge>, natives: Arc<NativeLibrary>) -> Self {
        Self { bridge, natives }
    }
}

impl ScriptCompiler for JsCompiler {
    fn compile(&self, sources: &[ScriptSource], stop: &StopToken) -> Option<Arc<dyn ExecutableUnit>> {
        let runtime = match JsRuntime::new(Arc::clone(&self.bridge), &self.natives) {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "Failed to create JavaScript runtime");
                return None;
            }
        };

        runtime.set_stop_token(Some(stop.clone()));
        let evaluated = sources.iter().try_for_each(|source| {
            runtime
                .eval_file(&source.display_name(), &source.text)
                .map(|_| ())
                .map_err(|e| (source.display_name(), e))
        });
        runtime.set_stop_token(None);

        if let Err((source, e)) = evaluated {
            if stop.is_stopped() {
                tracing::info!(source = %source, "Compile interrupted by stop request");
            } else {
                tracing::error!(source = %source, error = %e, "Failed to compile script");
            }
            return None;
        }

        let name = sources
            .first()
            .map(|s| s.id.clone())
            .unwrap_or_default();
        Some(Arc::new(JsUnit {
            name,
            runtime: Mutex::new(runtime),
        }))
    }
}

/// Compiled JavaScript program; `execute` calls a global function
pub struct JsUnit {
    name: String,
    runtime: Mutex<JsRuntime>,
}

impl JsUnit {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ExecutableUnit for JsUnit {
    fn execute(
        &self,
        ctx: &ExecutionContext,
        function: &str,
        params: &[Value],
    ) -> Result<Value, ScriptError> {
        ctx.checkpoint()?;
        let runtime = self.runtime.lock();

        runtime.set_stop_token(Some(ctx.stop_token().clone()));
        let result = runtime.call_function(function, params);
        runtime.set_stop_token(None);

        match result {
            Ok(value) => Ok(value),
            Err(_) if !ctx.keep_running() => Err(ScriptError::Stopped),
            Err(JsError::FunctionNotFound(name)) => Err(ScriptError::UnknownFunction(name)),
            Err(e) => Err(ScriptError::Failed(format!("{}: {}", self.name, e))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use script_runtime::{ChannelBus, ExecutionState, MemoryResolver, ScriptRegistry};
    use script_types::ShapeRegistry;
    use std::time::Duration;

    fn registry(natives: NativeLibrary) -> (ScriptRegistry, Arc<MemoryResolver>) {
        let bridge = Arc::new(HostBridge::new(Arc::new(ShapeRegistry::new())));
        let compiler = JsCompiler::new(bridge, Arc::new(natives));
        let resolver = Arc::new(MemoryResolver::new());
        (
            ScriptRegistry::new(resolver.clone(), Arc::new(compiler)),
            resolver,
        )
    }

    #[test]
    fn test_runs_named_function() {
        let (registry, resolver) = registry(NativeLibrary::new());
        resolver.insert("math", "function main(a, b) { return a * b; }");

        let execution = registry
            .run("math", "math", "main", vec![6.into(), 7.into()])
            .unwrap();
        execution.join();
        assert_eq!(execution.return_value(), Some(Value::Int(42)));
    }

    #[test]
    fn test_syntax_error_fails_resolution() {
        let (registry, resolver) = registry(NativeLibrary::new());
        resolver.insert("broken", "function main( {");

        assert!(matches!(
            registry.get_or_create("broken", "broken", "main", vec![]),
            Err(script_runtime::ResolutionError::CompileFailed(_))
        ));
    }

    #[test]
    fn test_thrown_error_is_failure() {
        let (registry, resolver) = registry(NativeLibrary::new());
        resolver.insert("thrower", "function main() { throw new Error('kaboom'); }");

        let execution = registry.run("thrower", "thrower", "main", vec![]).unwrap();
        execution.join();
        assert!(execution.return_value().is_none());
        assert!(execution.failure().unwrap().contains("kaboom"));

        let missing = registry.run("thrower", "thrower", "absent", vec![]).unwrap();
        missing.join();
        assert_eq!(missing.failure().as_deref(), Some("Unknown function: absent"));
    }

    #[test]
    fn test_stop_interrupts_script() {
        let bus = ChannelBus::new_shared();
        let natives = NativeLibrary::new();
        let started = Arc::clone(&bus);
        natives.register("started", move |_| {
            started.post_message("spin", script_runtime::Message::new("started", None));
            Ok(Value::Void)
        });
        let (registry, resolver) = registry(natives);
        resolver.insert("spin", "function main() { native.started(); while (true) {} }");

        let execution = registry.run("spin", "spin", "main", vec![]).unwrap();
        assert!(bus
            .get_channel("spin")
            .poll_message_timeout(Duration::from_secs(5))
            .is_some());

        execution.request_stop();
        assert!(execution.join_timeout(Duration::from_secs(5)));
        assert_eq!(execution.state(), ExecutionState::Finished);
        assert!(execution.failure().is_none());
    }

    #[test]
    fn test_stop_interrupts_top_level_loop() {
        let (registry, resolver) = registry(NativeLibrary::new());
        resolver.insert("spin", "while (true) {}\nfunction main() { return 1; }");
        let registry = Arc::new(registry);

        let building = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || registry.get_or_create("spin", "spin", "main", vec![]))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(registry.list().is_empty());

        // The compile may not have registered yet; keep asking.
        let started = std::time::Instant::now();
        while !building.is_finished() {
            assert!(started.elapsed() < Duration::from_secs(5), "compile never stopped");
            registry.stop_all();
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(matches!(
            building.join().unwrap(),
            Err(script_runtime::ResolutionError::CompileFailed(_))
        ));
    }
}
