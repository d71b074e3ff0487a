/*
 * GWA Cache - generational record store for native GWA models
 *
 * Tracks every native record seen across synchronisation cycles:
 * - store/   : upsert, reaffirm, snapshot, expired/deletable diffs
 * - index/   : stable native index resolution with gap filling
 * - gwa/     : GWA command line codec
 * - policy/  : which records the engine may purge
 * - object/  : objects exchanged with the object-exchange service
 */

pub mod error;
pub mod gwa;
pub mod index;
pub mod object;
pub mod policy;
pub mod record;
pub mod store;

// Re-exports
pub use error::{CacheError, CacheResult};
pub use gwa::ParsedGwa;
pub use object::ExchangeObject;
pub use policy::RetentionPolicy;
pub use record::{CacheRecord, CommandKind, Generation, RecordEntry, RecordSummary, UpsertOutcome};
pub use store::{CacheCheckpoint, GwaCache, SnapshotStats};
