//! In-memory collaborators for orchestrator tests
#![allow(dead_code)]

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use gwa_cache::gwa::{self, keyword_base, keyword_with_sid};
use gwa_cache::{ExchangeObject, GwaCache, RecordEntry};
use gwa_sync::{
    NativeRecord, NativeSource, PluginRegistry, ReceivedObject, SyncConfig, SyncContext,
    Transport, TypePlugin,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// Native source
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockSource {
    records: Mutex<Vec<NativeRecord>>,
    commands: Mutex<Vec<String>>,
    pub fail_fetch: AtomicBool,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn native_line(keyword: &str, index: u32, app_id: Option<&str>, value: &str) -> String {
        format!("{}\t{}\t{}", keyword_with_sid(keyword, app_id, None), index, value)
    }

    /// Insert or replace the record at (keyword, index)
    pub fn put(&self, keyword: &str, index: u32, app_id: Option<&str>, value: &str) {
        let line = Self::native_line(keyword, index, app_id, value);
        let record = NativeRecord::parse(&line).unwrap().unwrap();
        let mut records = self.records.lock();
        records.retain(|r| !(r.keyword == record.keyword && r.index == index));
        records.push(record);
    }

    pub fn remove(&self, keyword: &str, index: u32) {
        self.records
            .lock()
            .retain(|r| !(r.keyword == keyword && r.index == index));
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn take_commands(&self) -> Vec<String> {
        std::mem::take(&mut *self.commands.lock())
    }
}

impl NativeSource for MockSource {
    fn fetch_all(&self, keywords: &[String]) -> anyhow::Result<Vec<NativeRecord>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            bail!("native application not responding");
        }
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| keywords.iter().any(|k| k.eq_ignore_ascii_case(&r.keyword)))
            .cloned()
            .collect())
    }

    fn run_command(&self, command: &str) -> anyhow::Result<String> {
        let fields: Vec<&str> = command.split('\t').collect();
        let reply = match fields[0] {
            "HIGHEST" => {
                let highest = self
                    .records
                    .lock()
                    .iter()
                    .filter(|r| keyword_base(&r.keyword) == fields[1])
                    .map(|r| r.index)
                    .max()
                    .unwrap_or(0);
                highest.to_string()
            }
            "SET" | "SET_AT" => {
                let record = NativeRecord::parse(command)?
                    .ok_or_else(|| anyhow!("no index in {}", command))?;
                let mut records = self.records.lock();
                records.retain(|r| !(r.keyword == record.keyword && r.index == record.index));
                records.push(record);
                String::new()
            }
            "BLANK" | "DELETE" => {
                let index: u32 = fields[2].parse()?;
                self.records
                    .lock()
                    .retain(|r| !(keyword_base(&r.keyword) == fields[1] && r.index == index));
                String::new()
            }
            other => bail!("unsupported command {}", other),
        };
        self.commands.lock().push(command.to_string());
        Ok(reply)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Transport
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockTransport {
    streams: Mutex<BTreeMap<String, Vec<ExchangeObject>>>,
    sent: Mutex<Vec<(String, usize)>>,
    pub fail_send: AtomicBool,
    pub fail_receive: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_id(name: &str) -> String {
        format!("stream-{}", name.replace(' ', "-").to_lowercase())
    }

    pub fn publish(&self, stream_id: &str, objects: Vec<ExchangeObject>) {
        self.streams.lock().insert(stream_id.to_string(), objects);
    }

    pub fn contents(&self, stream_id: &str) -> Vec<ExchangeObject> {
        self.streams.lock().get(stream_id).cloned().unwrap_or_default()
    }

    /// (stream id, object count) per send call
    pub fn sent(&self) -> Vec<(String, usize)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_stream(&self, name: &str) -> anyhow::Result<String> {
        Ok(Self::stream_id(name))
    }

    async fn send(
        &self,
        stream_id: &str,
        objects: BTreeMap<String, Vec<ExchangeObject>>,
    ) -> anyhow::Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            bail!("exchange service unreachable");
        }
        let flat: Vec<ExchangeObject> = objects.into_values().flatten().collect();
        self.sent.lock().push((stream_id.to_string(), flat.len()));
        self.streams.lock().insert(stream_id.to_string(), flat);
        Ok(())
    }

    async fn receive(&self, stream_id: &str) -> anyhow::Result<Vec<ExchangeObject>> {
        if self.fail_receive.load(Ordering::SeqCst) {
            bail!("exchange service unreachable");
        }
        Ok(self.contents(stream_id))
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Plugins
// ═══════════════════════════════════════════════════════════════════════════

/// One exchange type backed by one native keyword
///
/// Native payloads are `KEYWORD[:sid]\tindex[\treferenced index]\tvalue`.
pub struct RecordPlugin {
    pub type_name: &'static str,
    pub keyword: &'static str,
    pub stream: &'static str,
    pub prerequisites: Vec<String>,
    /// (keyword, type) of the type referenced through `properties.node`
    pub reference: Option<(&'static str, &'static str)>,
    pub fail: bool,
}

impl RecordPlugin {
    pub fn new(type_name: &'static str, keyword: &'static str) -> Self {
        Self {
            type_name,
            keyword,
            stream: "model",
            prerequisites: Vec::new(),
            reference: None,
            fail: false,
        }
    }

    pub fn stream(mut self, stream: &'static str) -> Self {
        self.stream = stream;
        self
    }

    pub fn references(mut self, keyword: &'static str, type_name: &'static str) -> Self {
        self.reference = Some((keyword, type_name));
        self.prerequisites.push(type_name.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl TypePlugin for RecordPlugin {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn keyword(&self) -> &str {
        self.keyword
    }

    fn stream(&self) -> &str {
        self.stream
    }

    fn read_prerequisites(&self) -> Vec<String> {
        self.prerequisites.clone()
    }

    fn write_prerequisites(&self) -> Vec<String> {
        self.prerequisites.clone()
    }

    fn convert(&self, cache: &GwaCache) -> anyhow::Result<bool> {
        if self.fail {
            bail!("cannot convert {}", self.type_name);
        }
        let mut produced = false;
        for (index, payload) in cache.payloads_pending_conversion(self.keyword) {
            let parsed = gwa::parse_command(&payload)?;
            let object = Arc::new(
                ExchangeObject::new(self.type_name)
                    .with_application_id(parsed.application_id.clone().unwrap_or_default())
                    .with_properties(json!({ "gwa": payload, "index": index })),
            );
            produced |= match parsed.application_id.as_deref() {
                Some(id) => cache.assign_linked_object(self.keyword, id, object),
                None => cache.assign_linked_object_at(self.keyword, index, object),
            };
        }
        Ok(produced)
    }

    fn write_back(&self, cache: &GwaCache, objects: &[ReceivedObject]) -> anyhow::Result<()> {
        if self.fail {
            bail!("cannot write {}", self.type_name);
        }
        for received in objects {
            let app_id = received.application_id().unwrap_or_default();
            let index = cache.resolve_index(self.keyword, self.type_name, app_id);
            let head = keyword_with_sid(self.keyword, Some(app_id), Some(&*received.stream_id));
            let mut fields = vec![head, index.to_string()];
            if let Some((keyword, type_name)) = self.reference {
                let target = received.object.properties["node"].as_str().unwrap_or_default();
                let target_index = cache
                    .lookup_index(keyword, type_name, target)
                    .ok_or_else(|| anyhow!("unresolved reference to {}", target))?;
                fields.push(target_index.to_string());
            }
            fields.push(received.object.properties["value"].to_string());

            cache.upsert(
                RecordEntry::new(self.keyword, index, fields.join("\t"))
                    .application_id(app_id)
                    .stream_id(received.stream_id.clone())
                    .linked(received.object.clone()),
            )?;
        }
        Ok(())
    }
}

/// Node, Member (references Node), BeamLoad (references Member), Section
pub fn structural_registry() -> PluginRegistry {
    PluginRegistry::new()
        .with(Arc::new(RecordPlugin::new("Node", "NODE.3")))
        .unwrap()
        .with(Arc::new(RecordPlugin::new("Section", "PROP_SEC.3")))
        .unwrap()
        .with(Arc::new(RecordPlugin::new("Member", "MEMB.8").references("NODE.3", "Node")))
        .unwrap()
        .with(Arc::new(
            RecordPlugin::new("BeamLoad", "LOAD_BEAM")
                .stream("loads")
                .references("MEMB.8", "Member"),
        ))
        .unwrap()
}

pub const KEYWORDS: [&str; 4] = ["NODE.3", "PROP_SEC.3", "MEMB.8", "LOAD_BEAM"];

/// 25 records per keyword, app ids `gh/<keyword>/<i>`
pub fn populate(source: &MockSource) {
    for keyword in KEYWORDS {
        for i in 1..=25u32 {
            let app_id = format!("gh/{}/{}", keyword, i);
            source.put(keyword, i, Some(&app_id), &format!("v1-{}", i));
        }
    }
}

pub fn context(source: Arc<MockSource>, config: SyncConfig) -> SyncContext {
    SyncContext::new(config, structural_registry(), source).unwrap()
}
