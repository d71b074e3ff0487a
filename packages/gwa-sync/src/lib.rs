/*
 * GWA Sync - dependency-ordered synchronisation between a native GWA
 * model and an object-exchange service
 *
 * Architecture:
 * - Plugin registry (one plugin per exchangeable type)
 * - Type dependency graph + wave scheduler (rayon)
 * - Sender / Receiver cycles over a shared record cache
 * - Collaborator traits for the native source and the transport
 */

pub mod config;
pub mod context;
pub mod cycle;
pub mod dag;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod source;
pub mod status;

// Re-exports
pub use config::{ConfigError, ConfigResult, SyncConfig, TargetLayer, Validatable};
pub use context::SyncContext;
pub use cycle::{CycleGate, CycleOutcome, CycleReport, CycleState, CycleStateMachine, Direction};
pub use dag::TypeDependencyGraph;
pub use error::{ErrorCategory, OrchestratorError, Result};
pub use logging::init_tracing;
pub use plugin::{Layer, PluginRegistry, ReceivedObject, TypePlugin};
pub use receiver::Receiver;
pub use scheduler::{BatchReport, BatchScheduler, TypeOutcome, TypeRun};
pub use sender::Sender;
pub use source::{NativeRecord, NativeSource, Transport};
pub use status::{MemoryStatus, StatusEntry, StatusSink, TracingStatus};

pub use gwa_cache;
