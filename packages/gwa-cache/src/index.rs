//! Native index resolution
//!
//! Maps a cross-system identity (keyword, object type, application id) to
//! a native slot. An identity that already occupies a slot keeps it across
//! cycles; a new identity gets the lowest positive index not used by a live
//! record or a reservation.

use crate::store::{table_key, GwaCache};
use std::collections::BTreeSet;
use tracing::debug;

impl GwaCache {
    /// Index for an identity, allocating one when it has none yet
    ///
    /// Latest records win over previous ones, so an object that was already
    /// re-sent this cycle resolves to the slot it was written to. Within a
    /// generation a record linked to `type_name` wins over an unlinked one;
    /// unlinked records come from native loads and still carry the identity.
    /// Records linked to another type never match. Without an application
    /// id there is no identity to look up and a new index is allocated.
    /// Read-only: the caller claims the index by upserting.
    pub fn resolve_index(&self, keyword: &str, type_name: &str, application_id: &str) -> u32 {
        let state = self.state.read();
        let table = state.table(keyword);

        if !application_id.is_empty() {
            let existing = table
                .iter()
                .filter(|r| r.application_id_matches(application_id))
                .filter_map(|r| {
                    let generation = match (r.is_latest, r.is_previous) {
                        (true, _) => 0,
                        (false, true) => 1,
                        (false, false) => return None,
                    };
                    let linkage = match r.linked_type() {
                        Some(t) if t == type_name => 0,
                        Some(_) => return None,
                        None => 1,
                    };
                    Some(((generation, linkage), r.index))
                })
                .min_by_key(|(rank, _)| *rank);
            if let Some((_, index)) = existing {
                return index;
            }
        }

        let mut used: BTreeSet<u32> = table
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.index)
            .collect();
        if let Some(reserved) = state.reservations.get(&table_key(keyword)) {
            used.extend(reserved.iter().copied());
        }
        lowest_free(&used)
    }

    /// Existing index of an identity, without allocating
    pub fn lookup_index(&self, keyword: &str, type_name: &str, application_id: &str) -> Option<u32> {
        let state = self.state.read();
        let table = state.table(keyword);
        let matching = |r: &&crate::record::CacheRecord| {
            r.application_id_matches(application_id) && r.linked_type() == Some(type_name)
        };
        table
            .iter()
            .filter(matching)
            .find(|r| r.is_latest)
            .or_else(|| table.iter().filter(matching).find(|r| r.is_live()))
            .map(|r| r.index)
    }

    /// Existing indices of several identities, in the order requested
    pub fn lookup_indices<S: AsRef<str>>(
        &self,
        keyword: &str,
        type_name: &str,
        application_ids: &[S],
    ) -> Vec<Option<u32>> {
        application_ids
            .iter()
            .map(|id| self.lookup_index(keyword, type_name, id.as_ref()))
            .collect()
    }

    /// Every index used by a live record of a keyword, ascending
    pub fn keyword_indices(&self, keyword: &str) -> Vec<u32> {
        let state = self.state.read();
        let indices: BTreeSet<u32> = state
            .table(keyword)
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.index)
            .collect();
        indices.into_iter().collect()
    }

    /// Mark indices as taken natively so allocation skips them
    pub fn reserve_indices<I: IntoIterator<Item = u32>>(&self, keyword: &str, indices: I) {
        let mut state = self.state.write();
        state
            .reservations
            .entry(table_key(keyword))
            .or_default()
            .extend(indices.into_iter().filter(|i| *i > 0));
    }

    pub fn reserved_indices(&self, keyword: &str) -> Vec<u32> {
        self.state
            .read()
            .reservations
            .get(&table_key(keyword))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remember the current reservations as the per-cycle starting point
    pub fn set_baseline(&self) {
        let mut state = self.state.write();
        state.baseline = state.reservations.clone();
        debug!(keywords = state.baseline.len(), "index baseline set");
    }

    /// Drop reservations made since the baseline
    pub fn reset_to_baseline(&self) {
        let mut state = self.state.write();
        state.reservations = state.baseline.clone();
    }
}

fn lowest_free(used: &BTreeSet<u32>) -> u32 {
    let mut candidate = 1;
    for &index in used.range(1..) {
        if index != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}
