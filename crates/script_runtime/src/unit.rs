//! Executable units and the collaborators that build them
//!
//! A `SourceResolver` turns a script identity into source files, and a
//! `ScriptCompiler` turns those into an `ExecutableUnit`. Units are
//! immutable once built and shared by every execution started from them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use script_types::Value;

use crate::error::{ResolutionError, ScriptError};
use crate::stop::StopToken;

// ─────────────────────────────────────────────────────────────────────────────
// Execution Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context handed to a unit body while it runs
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    thread_name: String,
    stop: StopToken,
}

impl ExecutionContext {
    pub fn new(thread_name: impl Into<String>, stop: StopToken) -> Self {
        Self {
            thread_name: thread_name.into(),
            stop,
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn stop_token(&self) -> &StopToken {
        &self.stop
    }

    pub fn keep_running(&self) -> bool {
        !self.stop.is_stopped()
    }

    /// Safe point: fails with `ScriptError::Stopped` once a stop was requested
    pub fn checkpoint(&self) -> Result<(), ScriptError> {
        if self.stop.is_stopped() {
            Err(ScriptError::Stopped)
        } else {
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executable Unit
// ─────────────────────────────────────────────────────────────────────────────

/// Compiled, ready-to-run script
pub trait ExecutableUnit: Send + Sync {
    /// Invoke `function` with positional `params`
    fn execute(
        &self,
        ctx: &ExecutionContext,
        function: &str,
        params: &[Value],
    ) -> Result<Value, ScriptError>;
}

/// Unit backed by a native closure
pub struct FnUnit<F> {
    body: F,
}

impl<F> FnUnit<F>
where
    F: Fn(&ExecutionContext, &str, &[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
{
    pub fn new(body: F) -> Self {
        Self { body }
    }

    pub fn shared(body: F) -> Arc<dyn ExecutableUnit> {
        Arc::new(Self::new(body))
    }
}

impl<F> ExecutableUnit for FnUnit<F>
where
    F: Fn(&ExecutionContext, &str, &[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
{
    fn execute(
        &self,
        ctx: &ExecutionContext,
        function: &str,
        params: &[Value],
    ) -> Result<Value, ScriptError> {
        (self.body)(ctx, function, params)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// One resolved source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    /// Identity the source was resolved from
    pub id: String,
    pub path: Option<PathBuf>,
    pub text: String,
}

impl ScriptSource {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: None,
            text: text.into(),
        }
    }

    /// Name used in diagnostics: the file path when known, else the id
    pub fn display_name(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.id.clone())
    }
}

/// Locates script sources by identity
pub trait SourceResolver: Send + Sync {
    /// Zero or more sources for `source_id`; empty means not found
    fn resolve(&self, source_id: &str) -> Result<Vec<ScriptSource>, ResolutionError>;
}

/// Resolves `<id>` then `<id>.js` under each search directory in order
#[derive(Debug, Clone, Default)]
pub struct DirectoryResolver {
    dirs: Vec<PathBuf>,
}

impl DirectoryResolver {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl SourceResolver for DirectoryResolver {
    fn resolve(&self, source_id: &str) -> Result<Vec<ScriptSource>, ResolutionError> {
        let candidates = [source_id.to_string(), format!("{}.js", source_id)];
        for dir in &self.dirs {
            for candidate in &candidates {
                let path = dir.join(candidate);
                if !path.is_file() {
                    continue;
                }
                let text = std::fs::read_to_string(&path).map_err(|e| ResolutionError::Io {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                tracing::debug!(source_id, path = %path.display(), "Resolved script source");
                return Ok(vec![ScriptSource {
                    id: source_id.to_string(),
                    path: Some(path),
                    text,
                }]);
            }
        }
        Ok(Vec::new())
    }
}

/// In-memory sources keyed by identity
#[derive(Debug, Default)]
pub struct MemoryResolver {
    sources: RwLock<HashMap<String, String>>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, source_id: impl Into<String>, text: impl Into<String>) {
        self.sources.write().insert(source_id.into(), text.into());
    }

    pub fn remove(&self, source_id: &str) {
        self.sources.write().remove(source_id);
    }
}

impl SourceResolver for MemoryResolver {
    fn resolve(&self, source_id: &str) -> Result<Vec<ScriptSource>, ResolutionError> {
        Ok(self
            .sources
            .read()
            .get(source_id)
            .map(|text| vec![ScriptSource::new(source_id, text.clone())])
            .unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// Builds an executable unit from resolved sources; `None` on failure.
///
/// Top-level code runs during compilation, so compilers should give up once
/// `stop` is requested.
pub trait ScriptCompiler: Send + Sync {
    fn compile(&self, sources: &[ScriptSource], stop: &StopToken) -> Option<Arc<dyn ExecutableUnit>>;
}

impl<F> ScriptCompiler for F
where
    F: Fn(&[ScriptSource], &StopToken) -> Option<Arc<dyn ExecutableUnit>> + Send + Sync,
{
    fn compile(&self, sources: &[ScriptSource], stop: &StopToken) -> Option<Arc<dyn ExecutableUnit>> {
        self(sources, stop)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
