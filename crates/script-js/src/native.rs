//! Native functions callable from JavaScript
//!
//! Every function in a `NativeLibrary` appears on the JS `native` global
//! object. Arguments arrive as typed values and results go through the same
//! no-leak export as record methods.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use script_types::Value;

/// Native function body
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Named native functions exposed to the engine
#[derive(Default)]
pub struct NativeLibrary {
    functions: RwLock<BTreeMap<String, NativeFn>>,
}

impl NativeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing any earlier function of that name.
    ///
    /// Runtimes only see functions registered before they were created.
    pub fn register<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.write().insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<NativeFn> {
        self.functions.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.read().keys().cloned().collect()
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, String> {
        let f = self
            .get(name)
            .ok_or_else(|| format!("no native function {}", name))?;
        f(args)
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("functions", &self.names())
            .finish()
    }
}
