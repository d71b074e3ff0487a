//! Generational record store
//!
//! Tracks native GWA records across synchronisation cycles. Every upsert
//! either reaffirms an identical record, supersedes records at the same
//! index, or appends a fresh one. [`GwaCache::snapshot`] advances the
//! generation: records not reaffirmed since the previous snapshot are
//! purged, survivors are primed to require reaffirmation.
//!
//! All mutation happens under one write guard; queries take the shared
//! guard, so a populated cache can be read concurrently by wave workers.

use crate::error::{CacheError, CacheResult};
use crate::gwa;
use crate::object::ExchangeObject;
use crate::policy::RetentionPolicy;
use crate::record::{CacheRecord, RecordEntry, RecordSummary, UpsertOutcome};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Keyword lookup key (keywords compare case-insensitively)
pub(crate) fn table_key(keyword: &str) -> String {
    keyword.to_ascii_uppercase()
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CacheState {
    /// Keyword key -> records in insertion order
    pub(crate) tables: BTreeMap<String, Vec<CacheRecord>>,
    /// Keyword key -> indices taken natively but not tracked as records
    pub(crate) reservations: HashMap<String, BTreeSet<u32>>,
    pub(crate) baseline: HashMap<String, BTreeSet<u32>>,
}

impl CacheState {
    pub(crate) fn table(&self, keyword: &str) -> &[CacheRecord] {
        self.tables
            .get(&table_key(keyword))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn all_records(&self) -> impl Iterator<Item = &CacheRecord> {
        self.tables.values().flatten()
    }
}

/// Opaque copy of the whole cache taken before a cycle
#[derive(Debug, Clone)]
pub struct CacheCheckpoint {
    state: CacheState,
}

impl CacheCheckpoint {
    pub fn record_count(&self) -> usize {
        self.state.tables.values().map(Vec::len).sum()
    }
}

/// Counts from one generation advance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub purged: usize,
    pub primed: usize,
    pub foreign: usize,
}

/// The record cache shared by all plugins of a run
pub struct GwaCache {
    pub(crate) state: RwLock<CacheState>,
    policy: RetentionPolicy,
}

impl Default for GwaCache {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl GwaCache {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            policy,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    fn is_alterable(&self, record: &CacheRecord) -> bool {
        self.policy
            .is_alterable(&record.keyword, record.application_id.as_deref())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mutation
    // ═══════════════════════════════════════════════════════════════════

    /// Insert or reaffirm a record
    ///
    /// Candidates are the records under the same keyword whose index or
    /// payload matches. An exact payload match is reaffirmed (marked latest,
    /// and given the entry's object if it had none) and nothing is appended. Otherwise every index match is superseded
    /// and a fresh record is appended. Two payload matches mean the cache is
    /// corrupt and the cycle must stop.
    pub fn upsert(&self, entry: RecordEntry) -> CacheResult<UpsertOutcome> {
        if entry.index == 0 {
            return Err(CacheError::InvalidIndex {
                keyword: entry.keyword,
                index: 0,
            });
        }

        let mut state = self.state.write();
        let table = state.tables.entry(table_key(&entry.keyword)).or_default();

        let payload_matches: Vec<usize> = table
            .iter()
            .enumerate()
            .filter(|(_, r)| r.payload == entry.payload)
            .map(|(i, _)| i)
            .collect();

        match payload_matches.len() {
            0 => {}
            1 => {
                let pos = payload_matches[0];
                let index = table[pos].index;
                // A reverted payload takes its slot back from the newer record
                for (i, record) in table.iter_mut().enumerate() {
                    if i != pos && record.index == index {
                        record.is_latest = false;
                    }
                }
                let record = &mut table[pos];
                record.is_latest = true;
                if record.linked.is_none() {
                    record.linked = entry.linked;
                }
                trace!(keyword = %entry.keyword, index, "reaffirmed");
                return Ok(UpsertOutcome::Reaffirmed);
            }
            count => {
                return Err(CacheError::DuplicatePayload {
                    keyword: entry.keyword,
                    count,
                });
            }
        }

        let mut superseded = 0;
        for record in table.iter_mut().filter(|r| r.index == entry.index) {
            record.is_latest = false;
            superseded += 1;
        }

        trace!(keyword = %entry.keyword, index = entry.index, superseded, "appended");
        table.push(CacheRecord::from_entry(entry));

        Ok(if superseded == 0 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Superseded { count: superseded }
        })
    }

    /// Upsert a full GWA command line (`SET`/`SET_AT` or bare payload)
    pub fn upsert_command(&self, line: &str) -> CacheResult<UpsertOutcome> {
        let parsed = gwa::parse_command(line)?;
        let keyword = parsed.keyword.clone();
        let entry = parsed
            .into_entry()
            .ok_or_else(|| CacheError::parse(format!("no index in {} command", keyword)))?;
        self.upsert(entry)
    }

    /// Attach a converted object to the first unlinked record with this
    /// keyword and application id. Returns false when none exists.
    pub fn assign_linked_object(
        &self,
        keyword: &str,
        application_id: &str,
        object: Arc<ExchangeObject>,
    ) -> bool {
        if application_id.is_empty() {
            return false;
        }
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(&table_key(keyword)) else {
            return false;
        };
        match table
            .iter_mut()
            .find(|r| r.linked.is_none() && r.application_id_matches(application_id))
        {
            Some(record) => {
                record.linked = Some(object);
                true
            }
            None => false,
        }
    }

    /// Attach a converted object to an unlinked live record by index,
    /// preferring the latest one. Used for records without application id.
    pub fn assign_linked_object_at(
        &self,
        keyword: &str,
        index: u32,
        object: Arc<ExchangeObject>,
    ) -> bool {
        let mut state = self.state.write();
        let Some(table) = state.tables.get_mut(&table_key(keyword)) else {
            return false;
        };
        let candidate = table
            .iter()
            .position(|r| r.index == index && r.linked.is_none() && r.is_latest)
            .or_else(|| {
                table
                    .iter()
                    .position(|r| r.index == index && r.linked.is_none() && r.is_live())
            });
        match candidate {
            Some(pos) => {
                table[pos].linked = Some(object);
                true
            }
            None => false,
        }
    }

    /// Advance the generation
    ///
    /// Records that are not latest are removed, foreign ones included (a
    /// foreign record only loses latest when it is superseded). Surviving
    /// foreign records keep their flags; surviving alterable records become
    /// previous-but-not-latest and must be reaffirmed during the next cycle.
    pub fn snapshot(&self) -> SnapshotStats {
        let mut state = self.state.write();
        let mut stats = SnapshotStats::default();

        for table in state.tables.values_mut() {
            table.retain_mut(|record| {
                if !record.is_latest {
                    stats.purged += 1;
                    return false;
                }
                if !self.is_alterable(record) {
                    stats.foreign += 1;
                    return true;
                }
                record.is_previous = true;
                record.is_latest = false;
                stats.primed += 1;
                true
            });
        }
        state.tables.retain(|_, table| !table.is_empty());

        debug!(
            purged = stats.purged,
            primed = stats.primed,
            foreign = stats.foreign,
            "cache snapshot"
        );
        stats
    }

    /// Drop every record and reservation
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = CacheState::default();
    }

    /// Remove every alterable record written from one of `stream_ids`
    ///
    /// Returns the number of records removed.
    pub fn remove_streams<S: AsRef<str>>(&self, stream_ids: &[S]) -> usize {
        let mut state = self.state.write();
        let mut removed = 0;
        for table in state.tables.values_mut() {
            table.retain(|record| {
                let ours = record
                    .stream_id
                    .as_deref()
                    .is_some_and(|s| stream_ids.iter().any(|id| id.as_ref() == s));
                if ours && self.is_alterable(record) {
                    removed += 1;
                    return false;
                }
                true
            });
        }
        state.tables.retain(|_, table| !table.is_empty());
        debug!(removed, streams = stream_ids.len(), "stream records removed");
        removed
    }

    pub fn checkpoint(&self) -> CacheCheckpoint {
        CacheCheckpoint {
            state: self.state.read().clone(),
        }
    }

    pub fn restore(&self, checkpoint: CacheCheckpoint) {
        *self.state.write() = checkpoint.state;
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════

    pub fn records_for(&self, keyword: &str) -> Vec<CacheRecord> {
        self.state.read().table(keyword).to_vec()
    }

    pub fn records_at(&self, keyword: &str, index: u32) -> Vec<CacheRecord> {
        self.state
            .read()
            .table(keyword)
            .iter()
            .filter(|r| r.index == index)
            .cloned()
            .collect()
    }

    /// `(index, payload)` of live records not yet converted
    ///
    /// Stale records are included so the previous generation's content can
    /// still be converted for merging before it is purged.
    pub fn payloads_pending_conversion(&self, keyword: &str) -> Vec<(u32, String)> {
        self.state
            .read()
            .table(keyword)
            .iter()
            .filter(|r| r.is_live() && r.linked.is_none())
            .map(|r| (r.index, r.payload.clone()))
            .collect()
    }

    /// Alterable records that were not reaffirmed this cycle
    pub fn expired_data(&self) -> Vec<RecordSummary> {
        self.state
            .read()
            .all_records()
            .filter(|r| r.is_stale() && self.is_alterable(r))
            .map(CacheRecord::summary)
            .collect()
    }

    /// Alterable records in the current generation
    pub fn deletable_data(&self) -> Vec<RecordSummary> {
        self.state
            .read()
            .all_records()
            .filter(|r| r.is_latest && self.is_alterable(r))
            .map(CacheRecord::summary)
            .collect()
    }

    /// Alterable records first seen in the current generation
    pub fn newly_added(&self) -> Vec<RecordSummary> {
        self.state
            .read()
            .all_records()
            .filter(|r| r.is_fresh() && self.is_alterable(r))
            .map(CacheRecord::summary)
            .collect()
    }

    pub fn current_payloads(&self) -> Vec<String> {
        self.state
            .read()
            .all_records()
            .filter(|r| r.is_latest)
            .map(|r| r.payload.clone())
            .collect()
    }

    /// Objects linked to records of the current generation
    pub fn latest_linked_objects(&self) -> Vec<Arc<ExchangeObject>> {
        self.state
            .read()
            .all_records()
            .filter(|r| r.is_latest)
            .filter_map(|r| r.linked.clone())
            .collect()
    }

    pub fn application_id_at(&self, keyword: &str, index: u32) -> Option<String> {
        self.state
            .read()
            .table(keyword)
            .iter()
            .find(|r| r.index == index)
            .and_then(|r| r.application_id.clone())
    }

    pub fn exists(&self, keyword: &str, application_id: &str, previous: bool, latest: bool) -> bool {
        self.state.read().table(keyword).iter().any(|r| {
            r.application_id_matches(application_id)
                && r.is_previous == previous
                && r.is_latest == latest
        })
    }

    pub fn contains_type(&self, type_name: &str) -> bool {
        self.state
            .read()
            .all_records()
            .any(|r| r.linked_type() == Some(type_name))
    }

    pub fn linked_objects(&self, type_name: &str, application_id: &str) -> Vec<Arc<ExchangeObject>> {
        self.state
            .read()
            .all_records()
            .filter(|r| r.linked_type() == Some(type_name) && r.application_id_matches(application_id))
            .filter_map(|r| r.linked.clone())
            .collect()
    }

    /// Linked objects of a type by native index; latest records win
    pub fn indexed_objects(&self, type_name: &str) -> BTreeMap<u32, Arc<ExchangeObject>> {
        let state = self.state.read();
        let mut objects: BTreeMap<u32, (bool, Arc<ExchangeObject>)> = BTreeMap::new();
        for record in state.all_records() {
            let Some(object) = record.linked.as_ref() else {
                continue;
            };
            if object.type_name != type_name {
                continue;
            }
            let replace = objects
                .get(&record.index)
                .map_or(true, |(was_latest, _)| !was_latest && record.is_latest);
            if replace {
                objects.insert(record.index, (record.is_latest, object.clone()));
            }
        }
        objects.into_iter().map(|(i, (_, o))| (i, o)).collect()
    }

    /// Every record, cloned (diagnostics and tests)
    pub fn records(&self) -> Vec<CacheRecord> {
        self.state.read().all_records().cloned().collect()
    }

    /// Every record rendered as the command that would write it
    pub fn set_commands(&self) -> Vec<String> {
        self.state
            .read()
            .all_records()
            .map(|r| gwa::set_command(r.command_kind, r.index, &r.payload))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest_count(&self) -> usize {
        self.state
            .read()
            .all_records()
            .filter(|r| r.is_latest)
            .count()
    }

    /// Verify the structural invariants
    ///
    /// - per (keyword, application id): at most one stale and one fresh record
    /// - per keyword: payloads are unique
    /// - per keyword: no two latest records share an index
    pub fn check_invariants(&self) -> CacheResult<()> {
        let state = self.state.read();
        for (keyword, table) in &state.tables {
            let mut stale: HashMap<&str, usize> = HashMap::new();
            let mut fresh: HashMap<&str, usize> = HashMap::new();
            let mut payloads: HashMap<&str, usize> = HashMap::new();
            let mut latest_indices: HashMap<u32, usize> = HashMap::new();

            for record in table {
                if let Some(id) = record.application_id.as_deref() {
                    if record.is_stale() {
                        *stale.entry(id).or_default() += 1;
                    }
                    if record.is_fresh() {
                        *fresh.entry(id).or_default() += 1;
                    }
                }
                *payloads.entry(record.payload.as_str()).or_default() += 1;
                if record.is_latest {
                    *latest_indices.entry(record.index).or_default() += 1;
                }
            }

            if let Some((id, n)) = stale.iter().chain(fresh.iter()).find(|(_, n)| **n > 1) {
                return Err(CacheError::InvariantViolation(format!(
                    "{} records in the same generation for application id '{}' under {}",
                    n, id, keyword
                )));
            }
            if let Some((_, n)) = payloads.iter().find(|(_, n)| **n > 1) {
                return Err(CacheError::DuplicatePayload {
                    keyword: keyword.clone(),
                    count: *n,
                });
            }
            if let Some((index, n)) = latest_indices.iter().find(|(_, n)| **n > 1) {
                return Err(CacheError::InvariantViolation(format!(
                    "{} latest records share index {} under {}",
                    n, index, keyword
                )));
            }
        }
        Ok(())
    }
}
