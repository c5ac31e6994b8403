//! Script Registry
//!
//! Thread-name keyed registry of script executions. At most one live
//! execution exists per name: asking for a name whose execution is still
//! running returns that execution, anything else rebuilds from source.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use script_types::Value;

use crate::error::{ResolutionError, RuntimeResult};
use crate::execution::{current_execution, ExecutionState, ScriptExecution};
use crate::stop::StopToken;
use crate::unit::{ExecutableUnit, ScriptCompiler, SourceResolver};

/// Registry of named script executions
pub struct ScriptRegistry {
    threads: DashMap<String, Arc<ScriptExecution>>,
    /// One build at a time per thread name; held while resolving and compiling
    build_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Stop tokens of compiles in progress, so `stop_all` can interrupt them
    compiling: DashMap<String, StopToken>,
    resolver: Arc<dyn SourceResolver>,
    compiler: Arc<dyn ScriptCompiler>,
}

impl ScriptRegistry {
    pub fn new(resolver: Arc<dyn SourceResolver>, compiler: Arc<dyn ScriptCompiler>) -> Self {
        Self {
            threads: DashMap::new(),
            build_locks: DashMap::new(),
            compiling: DashMap::new(),
            resolver,
            compiler,
        }
    }

    pub fn new_shared(
        resolver: Arc<dyn SourceResolver>,
        compiler: Arc<dyn ScriptCompiler>,
    ) -> Arc<Self> {
        Arc::new(Self::new(resolver, compiler))
    }

    /// Return the live execution for `thread_name`, or build and register a
    /// new one (not started).
    ///
    /// When a live execution exists the requested function and params are
    /// ignored. On a resolution failure any previous entry is left in place.
    /// Resolution and compilation run without holding any map lock; only
    /// callers building the same name wait on each other.
    pub fn get_or_create(
        &self,
        thread_name: &str,
        source_id: &str,
        function_name: &str,
        params: Vec<Value>,
    ) -> Result<Arc<ScriptExecution>, ResolutionError> {
        if let Some(existing) = self.live(thread_name, function_name, &params) {
            return Ok(existing);
        }

        let lock = Arc::clone(
            self.build_locks
                .entry(thread_name.to_string())
                .or_default()
                .value(),
        );
        let _building = lock.lock();

        // Another caller may have finished building while we waited.
        if let Some(existing) = self.live(thread_name, function_name, &params) {
            return Ok(existing);
        }

        let execution = self.build(thread_name, source_id, function_name, params)?;
        self.threads
            .insert(thread_name.to_string(), Arc::clone(&execution));
        Ok(execution)
    }

    /// `get_or_create` followed by `start_if_not_running`
    pub fn run(
        &self,
        thread_name: &str,
        source_id: &str,
        function_name: &str,
        params: Vec<Value>,
    ) -> RuntimeResult<Arc<ScriptExecution>> {
        let execution = self.get_or_create(thread_name, source_id, function_name, params)?;
        execution.start_if_not_running()?;
        Ok(execution)
    }

    pub fn start_if_not_running(&self, execution: &Arc<ScriptExecution>) -> RuntimeResult<bool> {
        execution.start_if_not_running()
    }

    pub fn request_stop(&self, execution: &ScriptExecution) {
        execution.request_stop();
    }

    /// Request a stop of every registered execution
    pub fn stop_all(&self) {
        tracing::info!(count = self.threads.len(), "Stopping all script executions");
        let executions: Vec<Arc<ScriptExecution>> =
            self.threads.iter().map(|e| Arc::clone(e.value())).collect();
        let compiles: Vec<StopToken> = self.compiling.iter().map(|e| e.value().clone()).collect();
        for execution in executions {
            execution.request_stop();
        }
        for stop in compiles {
            stop.request_stop();
        }
    }

    pub fn get(&self, thread_name: &str) -> Option<Arc<ScriptExecution>> {
        self.threads.get(thread_name).map(|e| Arc::clone(e.value()))
    }

    pub fn current_execution(&self) -> Option<Arc<ScriptExecution>> {
        current_execution()
    }

    pub fn list(&self) -> Vec<(String, ExecutionState)> {
        let mut entries: Vec<(String, ExecutionState)> = self
            .threads
            .iter()
            .map(|e| (e.key().clone(), e.value().state()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    fn live(
        &self,
        thread_name: &str,
        function_name: &str,
        params: &[Value],
    ) -> Option<Arc<ScriptExecution>> {
        let existing = self.get(thread_name).filter(|e| e.is_running())?;
        if existing.function_name() != function_name || existing.params() != params {
            tracing::debug!(
                thread_name,
                running_function = %existing.function_name(),
                requested_function = function_name,
                "Script already running, ignoring new arguments"
            );
        }
        Some(existing)
    }

    fn build(
        &self,
        thread_name: &str,
        source_id: &str,
        function_name: &str,
        params: Vec<Value>,
    ) -> Result<Arc<ScriptExecution>, ResolutionError> {
        let stop = StopToken::new();
        self.compiling.insert(thread_name.to_string(), stop.clone());
        let unit = self.resolve_unit(source_id, &stop);
        self.compiling.remove(thread_name);

        let unit = unit?;
        tracing::debug!(thread_name, source_id, function = function_name, "Built script execution");
        Ok(ScriptExecution::new(
            thread_name,
            source_id,
            function_name,
            params,
            unit,
        ))
    }

    fn resolve_unit(
        &self,
        source_id: &str,
        stop: &StopToken,
    ) -> Result<Arc<dyn ExecutableUnit>, ResolutionError> {
        let sources = self.resolver.resolve(source_id)?;
        if sources.is_empty() {
            return Err(ResolutionError::NotFound(source_id.to_string()));
        }
        self.compiler
            .compile(&sources, stop)
            .ok_or_else(|| ResolutionError::CompileFailed(source_id.to_string()))
    }
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("threads", &self.list())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelBus, Message};
    use crate::error::ScriptError;
    use crate::unit::{ExecutionContext, FnUnit, MemoryResolver, ScriptSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Compiles every source into a unit that waits for a "release" message
    /// on the channel named by the source text, then returns its params.
    fn gated_registry(bus: Arc<ChannelBus>, builds: Arc<AtomicUsize>) -> ScriptRegistry {
        let resolver = Arc::new(MemoryResolver::new());
        resolver.insert("buffbot", "gate-buffbot");
        resolver.insert("relay", "gate-relay");
        resolver.insert("broken", "");

        let compiler = move |sources: &[ScriptSource], _stop: &StopToken| {
            let gate = sources.first()?.text.clone();
            if gate.is_empty() {
                return None;
            }
            builds.fetch_add(1, Ordering::SeqCst);
            let bus = Arc::clone(&bus);
            Some(FnUnit::shared(move |ctx: &ExecutionContext, function: &str, params: &[Value]| {
                let channel = bus.get_channel(&gate);
                loop {
                    ctx.checkpoint()?;
                    match channel.poll_message_timeout(Duration::from_secs(10)) {
                        Some(m) if m.event() == "release" => break,
                        Some(m) if m.event() == "fail" => return Err(ScriptError::failed("told to fail")),
                        _ => {}
                    }
                }
                match function {
                    "main" => Ok(Value::from(params.len() as u32)),
                    other => Err(ScriptError::UnknownFunction(other.to_string())),
                }
            }) as Arc<dyn ExecutableUnit>)
        };

        ScriptRegistry::new(resolver, Arc::new(compiler))
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_duplicate_start_returns_live_execution() {
        let bus = ChannelBus::new_shared();
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = gated_registry(Arc::clone(&bus), Arc::clone(&builds));

        let first = registry.run("buffbot", "buffbot", "main", vec![]).unwrap();
        let second = registry.run("buffbot", "buffbot", "main", vec![1.into()]).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(second.params().is_empty());

        bus.post_message("gate-buffbot", Message::new("release", None));
        first.join();
        assert_eq!(first.return_value(), Some(Value::Int(0)));

        let third = registry.run("buffbot", "buffbot", "main", vec![]).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&registry.get("buffbot").unwrap(), &third));

        third.request_stop();
        third.join();
    }

    #[test]
    fn test_only_one_thread_per_name_under_contention() {
        let bus = ChannelBus::new_shared();
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(gated_registry(Arc::clone(&bus), Arc::clone(&builds)));

        let first = registry.run("buffbot", "buffbot", "main", vec![]).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.run("buffbot", "buffbot", "main", vec![]).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(Arc::ptr_eq(&first, &handle.join().unwrap()));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        registry.stop_all();
        first.join();
    }

    #[test]
    fn test_created_but_not_started_is_rebuilt() {
        let bus = ChannelBus::new_shared();
        let builds = Arc::new(AtomicUsize::new(0));
        let registry = gated_registry(bus, Arc::clone(&builds));

        let created = registry.get_or_create("buffbot", "buffbot", "main", vec![]).unwrap();
        assert_eq!(created.state(), ExecutionState::Created);

        let rebuilt = registry.get_or_create("buffbot", "buffbot", "main", vec![]).unwrap();
        assert!(!Arc::ptr_eq(&created, &rebuilt));
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_resolution_errors() {
        let bus = ChannelBus::new_shared();
        let registry = gated_registry(bus, Arc::new(AtomicUsize::new(0)));

        assert_eq!(
            registry.get_or_create("x", "missing", "main", vec![]).unwrap_err(),
            ResolutionError::NotFound("missing".to_string())
        );
        assert_eq!(
            registry.get_or_create("x", "broken", "main", vec![]).unwrap_err(),
            ResolutionError::CompileFailed("broken".to_string())
        );
        assert!(registry.get("x").is_none());
    }

    #[test]
    fn test_stop_is_isolated() {
        let bus = ChannelBus::new_shared();
        let registry = gated_registry(Arc::clone(&bus), Arc::new(AtomicUsize::new(0)));

        let a = registry.run("a", "buffbot", "main", vec![]).unwrap();
        let b = registry.run("b", "relay", "main", vec![1.into(), 2.into()]).unwrap();

        registry.request_stop(&a);
        a.join();
        assert!(a.return_value().is_none());
        assert!(b.is_running());
        assert!(b.keep_running());

        bus.post_message("gate-relay", Message::new("release", None));
        b.join();
        assert_eq!(b.return_value(), Some(Value::Int(2)));
    }

    #[test]
    fn test_failure_is_isolated() {
        let bus = ChannelBus::new_shared();
        let registry = gated_registry(Arc::clone(&bus), Arc::new(AtomicUsize::new(0)));

        let a = registry.run("a", "buffbot", "main", vec![]).unwrap();
        let b = registry.run("b", "relay", "other", vec![]).unwrap();

        bus.post_message("gate-buffbot", Message::new("fail", None));
        a.join();
        assert_eq!(a.failure().as_deref(), Some("told to fail"));
        assert!(a.return_value().is_none());
        assert!(b.is_running());

        bus.post_message("gate-relay", Message::new("release", None));
        b.join();
        assert_eq!(b.failure().as_deref(), Some("Unknown function: other"));
    }

    #[test]
    fn test_stop_wakes_blocking_poll() {
        let bus = ChannelBus::new_shared();
        let registry = gated_registry(Arc::clone(&bus), Arc::new(AtomicUsize::new(0)));

        let execution = registry.run("buffbot", "buffbot", "main", vec![]).unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        execution.request_stop();
        execution.join();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_list_and_current() {
        let bus = ChannelBus::new_shared();
        let registry = gated_registry(Arc::clone(&bus), Arc::new(AtomicUsize::new(0)));

        registry.get_or_create("idle", "relay", "main", vec![]).unwrap();
        let running = registry.run("busy", "buffbot", "main", vec![]).unwrap();
        wait_until(|| running.is_running());

        assert_eq!(
            registry.list(),
            vec![
                ("busy".to_string(), ExecutionState::Running),
                ("idle".to_string(), ExecutionState::Created),
            ]
        );
        assert!(registry.current_execution().is_none());

        registry.stop_all();
        running.join();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_slow_compile_blocks_only_its_own_name() {
        let entered = Arc::new(AtomicUsize::new(0));
        let resolver = Arc::new(MemoryResolver::new());
        resolver.insert("slow", "slow");
        resolver.insert("quick", "quick");

        let compiling = Arc::clone(&entered);
        let compiler = move |sources: &[ScriptSource], stop: &StopToken| {
            if sources.first()?.text == "slow" {
                compiling.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(10);
                while !stop.is_stopped() && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(2));
                }
                if stop.is_stopped() {
                    return None;
                }
            }
            Some(FnUnit::shared(|_ctx: &ExecutionContext, _function: &str, _params: &[Value]| {
                Ok(Value::Void)
            }) as Arc<dyn ExecutableUnit>)
        };
        let registry = Arc::new(ScriptRegistry::new(resolver, Arc::new(compiler)));

        let building = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get_or_create("slow", "slow", "main", vec![]))
        };
        wait_until(|| entered.load(Ordering::SeqCst) == 1);

        let started = Instant::now();
        assert!(registry.get("slow").is_none());
        assert!(registry.list().is_empty());
        registry.get_or_create("quick", "quick", "main", vec![]).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));

        registry.stop_all();
        assert_eq!(
            building.join().unwrap().unwrap_err(),
            ResolutionError::CompileFailed("slow".to_string())
        );
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(registry.get("slow").is_none());
    }
}
