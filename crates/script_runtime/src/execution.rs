//! Script Execution
//!
//! One named run of an executable unit on its own OS thread.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use script_types::Value;

use crate::error::{RuntimeError, RuntimeResult, ScriptError};
use crate::stop::StopToken;
use crate::unit::{ExecutableUnit, ExecutionContext};

// ─────────────────────────────────────────────────────────────────────────────
// Execution State
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of a script execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutionState {
    /// Built but not started
    Created = 0,
    /// Thread spawned, body running
    Running = 1,
    /// Body returned, failed or was stopped
    Finished = 2,
}

impl ExecutionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Created => write!(f, "created"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Finished => write!(f, "finished"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Current Execution
// ─────────────────────────────────────────────────────────────────────────────

thread_local! {
    static CURRENT: RefCell<Option<Arc<ScriptExecution>>> = const { RefCell::new(None) };
}

/// The execution running on the calling thread, if any
pub fn current_execution() -> Option<Arc<ScriptExecution>> {
    CURRENT.with(|current| current.borrow().clone())
}

struct CurrentGuard;

impl CurrentGuard {
    fn enter(execution: Arc<ScriptExecution>) -> Self {
        CURRENT.with(|current| *current.borrow_mut() = Some(execution));
        CurrentGuard
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| current.borrow_mut().take());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Script Execution
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Outcome {
    return_value: Option<Value>,
    failure: Option<String>,
}

/// A named, independently running script
pub struct ScriptExecution {
    thread_name: String,
    source_id: String,
    function_name: String,
    params: Vec<Value>,
    unit: Arc<dyn ExecutableUnit>,
    state: AtomicU8,
    stop: StopToken,
    outcome: Mutex<Outcome>,
    finished: Condvar,
}

impl ScriptExecution {
    pub fn new(
        thread_name: impl Into<String>,
        source_id: impl Into<String>,
        function_name: impl Into<String>,
        params: Vec<Value>,
        unit: Arc<dyn ExecutableUnit>,
    ) -> Arc<Self> {
        Arc::new(Self {
            thread_name: thread_name.into(),
            source_id: source_id.into(),
            function_name: function_name.into(),
            params,
            unit,
            state: AtomicU8::new(ExecutionState::Created as u8),
            stop: StopToken::new(),
            outcome: Mutex::new(Outcome::default()),
            finished: Condvar::new(),
        })
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Alive means started and not yet finished
    pub fn is_running(&self) -> bool {
        self.state() == ExecutionState::Running
    }

    /// Value returned by the body; `None` until it finishes successfully
    pub fn return_value(&self) -> Option<Value> {
        self.outcome.lock().return_value.clone()
    }

    /// Failure text when the body failed or panicked
    pub fn failure(&self) -> Option<String> {
        self.outcome.lock().failure.clone()
    }

    /// False once a stop was requested
    pub fn keep_running(&self) -> bool {
        !self.stop.is_stopped()
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Ask the body to stop at its next safe point and wake blocked waits
    pub fn request_stop(&self) {
        if !self.stop.is_stopped() {
            tracing::info!(thread_name = %self.thread_name, "Stop requested");
        }
        self.stop.request_stop();
    }

    /// Spawn the execution thread unless it was already started.
    ///
    /// Returns `Ok(true)` when this call started it. A finished execution is
    /// never restarted.
    pub fn start_if_not_running(self: &Arc<Self>) -> RuntimeResult<bool> {
        if self
            .state
            .compare_exchange(
                ExecutionState::Created as u8,
                ExecutionState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Ok(false);
        }

        let execution = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("Script thread: {}", self.thread_name))
            .spawn(move || execution.run());

        match spawned {
            Ok(_) => {
                tracing::info!(
                    thread_name = %self.thread_name,
                    function = %self.function_name,
                    "Script execution started"
                );
                Ok(true)
            }
            Err(e) => {
                self.finish(None, Some(e.to_string()));
                Err(RuntimeError::Spawn {
                    thread_name: self.thread_name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Block until the execution finishes
    pub fn join(&self) {
        let mut outcome = self.outcome.lock();
        while self.state() != ExecutionState::Finished {
            self.finished.wait(&mut outcome);
        }
    }

    /// Block until the execution finishes or `timeout` passes; true if finished
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.outcome.lock();
        while self.state() != ExecutionState::Finished {
            if self.finished.wait_until(&mut outcome, deadline).timed_out() {
                return self.state() == ExecutionState::Finished;
            }
        }
        true
    }

    fn run(self: Arc<Self>) {
        let _current = CurrentGuard::enter(Arc::clone(&self));
        let ctx = ExecutionContext::new(self.thread_name.clone(), self.stop.clone());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.unit.execute(&ctx, &self.function_name, &self.params)
        }))
        .unwrap_or_else(|payload| Err(ScriptError::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(value) => {
                tracing::info!(thread_name = %self.thread_name, "Script execution finished");
                self.finish(Some(value), None);
            }
            Err(ScriptError::Stopped) => {
                tracing::info!(thread_name = %self.thread_name, "Script execution stopped");
                self.finish(None, None);
            }
            Err(e) => {
                tracing::error!(thread_name = %self.thread_name, error = %e, "Script execution failed");
                self.finish(None, Some(e.to_string()));
            }
        }
    }

    fn finish(&self, return_value: Option<Value>, failure: Option<String>) {
        let mut outcome = self.outcome.lock();
        outcome.return_value = return_value;
        outcome.failure = failure;
        self.state
            .store(ExecutionState::Finished as u8, Ordering::SeqCst);
        self.finished.notify_all();
    }
}

impl std::fmt::Debug for ScriptExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecution")
            .field("thread_name", &self.thread_name)
            .field("source_id", &self.source_id)
            .field("function_name", &self.function_name)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::FnUnit;

    #[test]
    fn test_runs_once_and_keeps_return_value() {
        let execution = ScriptExecution::new(
            "adder",
            "adder.js",
            "add",
            vec![2.into(), 3.into()],
            FnUnit::shared(|_ctx, _function, params| {
                let sum: i64 = params.iter().filter_map(Value::as_i64).sum();
                Ok(Value::Int(sum))
            }),
        );

        assert_eq!(execution.state(), ExecutionState::Created);
        assert!(execution.return_value().is_none());
        assert!(execution.start_if_not_running().unwrap());
        execution.join();

        assert_eq!(execution.state(), ExecutionState::Finished);
        assert_eq!(execution.return_value(), Some(Value::Int(5)));
        assert!(!execution.start_if_not_running().unwrap());
    }

    #[test]
    fn test_thread_is_named_and_current_is_set() {
        let execution = ScriptExecution::new(
            "buffbot",
            "buffbot.js",
            "main",
            vec![],
            FnUnit::shared(|ctx, _function, _params| {
                let name = thread::current().name().map(str::to_string);
                let current = current_execution().map(|e| e.thread_name().to_string());
                assert_eq!(current.as_deref(), Some(ctx.thread_name()));
                Ok(Value::from(name))
            }),
        );
        execution.start_if_not_running().unwrap();
        execution.join();

        assert_eq!(execution.return_value(), Some(Value::from("Script thread: buffbot")));
        assert!(current_execution().is_none());
    }

    #[test]
    fn test_panic_is_caught() {
        let execution = ScriptExecution::new(
            "crashy",
            "crashy.js",
            "main",
            vec![],
            FnUnit::shared(|_ctx, _function, _params| panic!("boom")),
        );
        execution.start_if_not_running().unwrap();
        execution.join();

        assert_eq!(execution.state(), ExecutionState::Finished);
        assert!(execution.return_value().is_none());
        assert!(execution.failure().unwrap().contains("boom"));
    }

    #[test]
    fn test_stop_at_checkpoint() {
        let execution = ScriptExecution::new(
            "looper",
            "looper.js",
            "main",
            vec![],
            FnUnit::shared(|ctx, _function, _params| loop {
                ctx.checkpoint()?;
                thread::sleep(Duration::from_millis(5));
            }),
        );
        execution.start_if_not_running().unwrap();
        assert!(!execution.join_timeout(Duration::from_millis(30)));

        execution.request_stop();
        assert!(execution.join_timeout(Duration::from_secs(5)));
        assert!(!execution.keep_running());
        assert!(execution.return_value().is_none());
        assert!(execution.failure().is_none());
    }
}
