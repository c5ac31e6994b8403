//! Host context: everything a running host owns, wired together once

use std::sync::Arc;

use script_js::{HostBridge, JsCompiler, NativeLibrary};
use script_net::{NetClient, NetError, Preferences};
use script_runtime::{
    ChannelBus, DirectoryResolver, RuntimeError, ScriptExecution, ScriptRegistry, SourceResolver,
};
use script_types::{ShapeRegistry, Value};
use tracing::info;

use crate::config::HostConfig;
use crate::library;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub struct HostContext {
    bus: Arc<ChannelBus>,
    registry: Arc<ScriptRegistry>,
    net: Arc<NetClient>,
    shapes: Arc<ShapeRegistry>,
    natives: Arc<NativeLibrary>,
    preferences: Arc<Preferences>,
}

impl HostContext {
    /// Build a context resolving scripts from the configured directories
    pub fn new(config: &HostConfig) -> Result<Self, HostError> {
        let resolver = Arc::new(DirectoryResolver::new(config.script_dirs.iter().cloned()));
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(
        config: &HostConfig,
        resolver: Arc<dyn SourceResolver>,
    ) -> Result<Self, HostError> {
        let bus = Arc::new(match config.channel_capacity {
            Some(capacity) => ChannelBus::with_capacity(capacity),
            None => ChannelBus::new(),
        });
        let preferences = Arc::new(config.preferences());
        let net = Arc::new(NetClient::new(preferences.clone(), bus.clone())?);

        let shapes = Arc::new(ShapeRegistry::new());
        library::register_shapes(&shapes);

        let natives = Arc::new(NativeLibrary::new());
        library::register_host_library(&natives, bus.clone(), net.clone());

        let bridge = Arc::new(HostBridge::new(shapes.clone()));
        let compiler = Arc::new(JsCompiler::new(bridge, natives.clone()));
        let registry = Arc::new(ScriptRegistry::new(resolver, compiler));

        info!(
            natives = natives.names().len(),
            shapes = shapes.names().len(),
            "Host context ready"
        );

        Ok(Self {
            bus,
            registry,
            net,
            shapes,
            natives,
            preferences,
        })
    }

    /// Start `function` of `source_id` on `thread_name` unless that thread is
    /// already running
    pub fn run_script(
        &self,
        thread_name: &str,
        source_id: &str,
        function_name: &str,
        params: Vec<Value>,
    ) -> Result<Arc<ScriptExecution>, HostError> {
        Ok(self
            .registry
            .run(thread_name, source_id, function_name, params)?)
    }

    pub fn stop_all(&self) {
        self.registry.stop_all();
    }

    pub fn bus(&self) -> &Arc<ChannelBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    pub fn net(&self) -> &Arc<NetClient> {
        &self.net
    }

    pub fn shapes(&self) -> &Arc<ShapeRegistry> {
        &self.shapes
    }

    pub fn natives(&self) -> &Arc<NativeLibrary> {
        &self.natives
    }

    pub fn preferences(&self) -> &Arc<Preferences> {
        &self.preferences
    }
}
