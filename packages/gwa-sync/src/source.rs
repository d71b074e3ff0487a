//! Collaborator contracts: the native application and the exchange service

use async_trait::async_trait;
use gwa_cache::{gwa, CacheResult, CommandKind, ExchangeObject, RecordEntry};
use std::collections::BTreeMap;

/// One record as read from the native application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeRecord {
    pub keyword: String,
    pub index: u32,
    pub payload: String,
    pub application_id: Option<String>,
    pub stream_id: Option<String>,
    pub command_kind: CommandKind,
}

impl NativeRecord {
    /// Parse a full GWA command line; lines without an index yield `None`
    pub fn parse(line: &str) -> CacheResult<Option<Self>> {
        let parsed = gwa::parse_command(line)?;
        Ok(parsed.index.filter(|i| *i > 0).map(|index| Self {
            keyword: parsed.keyword,
            index,
            payload: parsed.payload,
            application_id: parsed.application_id,
            stream_id: parsed.stream_id,
            command_kind: parsed.command_kind,
        }))
    }
}

impl From<NativeRecord> for RecordEntry {
    fn from(record: NativeRecord) -> Self {
        RecordEntry::new(record.keyword, record.index, record.payload)
            .application_id(record.application_id.unwrap_or_default())
            .stream_id(record.stream_id.unwrap_or_default())
            .command_kind(record.command_kind)
    }
}

/// The native application
///
/// Calls are synchronous and may be slow; orchestrators run them on a
/// blocking worker.
pub trait NativeSource: Send + Sync {
    /// Bulk read of every record under the given keywords
    fn fetch_all(&self, keywords: &[String]) -> anyhow::Result<Vec<NativeRecord>>;

    /// Execute one textual command (mutation or scalar query)
    fn run_command(&self, command: &str) -> anyhow::Result<String>;

    /// Highest index in use under a keyword; 0 when the table is empty
    fn highest_index(&self, keyword: &str) -> anyhow::Result<u32> {
        let reply = self.run_command(&gwa::highest_command(keyword))?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Ok(0);
        }
        Ok(reply.parse::<u32>()?)
    }
}

/// The object-exchange service
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open (or create) a stream by name and return its id
    async fn open_stream(&self, name: &str) -> anyhow::Result<String>;

    async fn send(
        &self,
        stream_id: &str,
        objects: BTreeMap<String, Vec<ExchangeObject>>,
    ) -> anyhow::Result<()>;

    async fn receive(&self, stream_id: &str) -> anyhow::Result<Vec<ExchangeObject>>;

    async fn close(&self) -> anyhow::Result<()>;
}
