//! Run-wide handles passed to every orchestrator

use crate::config::{SyncConfig, Validatable};
use crate::cycle::CycleGate;
use crate::error::Result;
use crate::plugin::PluginRegistry;
use crate::source::NativeSource;
use crate::status::{StatusSink, TracingStatus};
use gwa_cache::GwaCache;
use std::sync::Arc;

/// Created once per run; the sender and receiver of a run share it
///
/// Both directions mutate the same cache, so they also share one
/// [`CycleGate`]: a send and a receive never overlap.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub cache: Arc<GwaCache>,
    pub gate: CycleGate,
    pub registry: Arc<PluginRegistry>,
    pub source: Arc<dyn NativeSource>,
    pub status: Arc<dyn StatusSink>,
}

impl SyncContext {
    /// Validates the config and builds an empty cache with its retention policy
    pub fn new(
        config: SyncConfig,
        registry: PluginRegistry,
        source: Arc<dyn NativeSource>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cache: Arc::new(GwaCache::new(config.retention_policy())),
            config: Arc::new(config),
            gate: CycleGate::new(),
            registry: Arc::new(registry),
            source,
            status: Arc::new(TracingStatus),
        })
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// Install the tracing subscriber at the configured log level
    ///
    /// Returns false when the host already installed one.
    pub fn init_logging(&self) -> bool {
        crate::logging::init_tracing(&self.config.log_level)
    }

    /// Keywords of the configured layer's plugins
    pub fn keywords(&self) -> Vec<String> {
        self.registry.keywords(self.config.target_layer)
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("records", &self.cache.len())
            .field("busy", &self.gate.is_busy())
            .finish()
    }
}
