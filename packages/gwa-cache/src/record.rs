//! Cache record model
//!
//! A record is one native GWA line tracked across synchronisation cycles.
//! Its generation state is two independent flags:
//!
//! | `is_previous` | `is_latest` | state      |
//! |---------------|-------------|------------|
//! | false         | true        | fresh      |
//! | true          | true        | carried    |
//! | true          | false       | stale      |
//! | false         | false       | superseded |
//!
//! Stale records are reported as expired and purged by the next snapshot.
//! Superseded records were fresh in this cycle and then replaced at the same
//! index; they are purged by the next snapshot too.

use crate::error::{CacheError, CacheResult};
use crate::object::ExchangeObject;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Replay discipline for a native record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CommandKind {
    /// Idempotent absolute write
    #[default]
    Set,
    /// Positional write into a reserved index
    SetAt,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Set => "SET",
            CommandKind::SetAt => "SET_AT",
        }
    }

    pub fn from_str(s: &str) -> CacheResult<Self> {
        match s {
            "SET" => Ok(CommandKind::Set),
            "SET_AT" => Ok(CommandKind::SetAt),
            _ => Err(CacheError::parse(format!("Invalid command kind: {}", s))),
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generation state derived from the two flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    Fresh,
    Carried,
    Stale,
    Superseded,
}

impl Generation {
    pub fn from_flags(is_previous: bool, is_latest: bool) -> Self {
        match (is_previous, is_latest) {
            (false, true) => Generation::Fresh,
            (true, true) => Generation::Carried,
            (true, false) => Generation::Stale,
            (false, false) => Generation::Superseded,
        }
    }
}

/// One native record tracked by the cache
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub keyword: String,
    pub index: u32,
    pub payload: String,
    pub application_id: Option<String>,
    pub stream_id: Option<String>,
    pub command_kind: CommandKind,
    pub is_previous: bool,
    pub is_latest: bool,
    pub(crate) linked: Option<Arc<ExchangeObject>>,
}

impl CacheRecord {
    pub(crate) fn from_entry(entry: RecordEntry) -> Self {
        Self {
            keyword: entry.keyword,
            index: entry.index,
            payload: entry.payload,
            application_id: entry.application_id,
            stream_id: entry.stream_id,
            command_kind: entry.command_kind,
            is_previous: false,
            is_latest: true,
            linked: entry.linked,
        }
    }

    pub fn generation(&self) -> Generation {
        Generation::from_flags(self.is_previous, self.is_latest)
    }

    /// Either flag set: the record still occupies its native slot
    pub fn is_live(&self) -> bool {
        self.is_previous || self.is_latest
    }

    pub fn is_stale(&self) -> bool {
        self.is_previous && !self.is_latest
    }

    pub fn is_fresh(&self) -> bool {
        !self.is_previous && self.is_latest
    }

    pub fn linked_object(&self) -> Option<&Arc<ExchangeObject>> {
        self.linked.as_ref()
    }

    pub fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    pub fn linked_type(&self) -> Option<&str> {
        self.linked.as_deref().map(|o| o.type_name.as_str())
    }

    pub fn keyword_matches(&self, keyword: &str) -> bool {
        self.keyword.eq_ignore_ascii_case(keyword)
    }

    /// Records without an application id never match one.
    pub fn application_id_matches(&self, application_id: &str) -> bool {
        match &self.application_id {
            Some(id) => !application_id.is_empty() && id == application_id,
            None => false,
        }
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            keyword: self.keyword.clone(),
            index: self.index,
            payload: self.payload.clone(),
            stream_id: self.stream_id.clone(),
            command_kind: self.command_kind,
        }
    }
}

/// Input to [`crate::GwaCache::upsert`]
#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub(crate) keyword: String,
    pub(crate) index: u32,
    pub(crate) payload: String,
    pub(crate) application_id: Option<String>,
    pub(crate) stream_id: Option<String>,
    pub(crate) command_kind: CommandKind,
    pub(crate) linked: Option<Arc<ExchangeObject>>,
}

impl RecordEntry {
    pub fn new(keyword: impl Into<String>, index: u32, payload: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            index,
            payload: payload.into(),
            application_id: None,
            stream_id: None,
            command_kind: CommandKind::Set,
            linked: None,
        }
    }

    /// An empty id leaves the record without an application id.
    pub fn application_id(mut self, id: impl Into<String>) -> Self {
        self.application_id = non_empty(id.into());
        self
    }

    pub fn stream_id(mut self, id: impl Into<String>) -> Self {
        self.stream_id = non_empty(id.into());
        self
    }

    pub fn command_kind(mut self, kind: CommandKind) -> Self {
        self.command_kind = kind;
        self
    }

    pub fn linked(mut self, object: Arc<ExchangeObject>) -> Self {
        self.linked = Some(object);
        self
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Row returned by the diff queries (expired / deletable data)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSummary {
    pub keyword: String,
    pub index: u32,
    pub payload: String,
    pub stream_id: Option<String>,
    pub command_kind: CommandKind,
}

/// What an upsert did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record matched; a fresh record was appended
    Inserted,
    /// An identical payload exists; it was marked latest
    Reaffirmed,
    /// Records at the same index with different payloads were superseded
    /// and a fresh record appended
    Superseded { count: usize },
}
