//! Multi-cycle behaviour of the record cache
//!
//! Each "cycle" here is what an orchestrator does: snapshot, then upsert
//! everything the source currently holds at the index the resolver picks.

use gwa_cache::{ExchangeObject, GwaCache, Generation, RecordEntry, UpsertOutcome};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

const KEYWORDS: [(&str, &str); 4] = [
    ("NODE.3", "Node"),
    ("MEMB.8", "Member"),
    ("LOAD_BEAM", "BeamLoad"),
    ("PROP_SEC", "Section"),
];

/// One source collection per keyword, 25 objects each
fn source(changed: usize) -> Vec<(&'static str, &'static str, String, String)> {
    let mut out = Vec::new();
    let mut n = 0;
    for (keyword, type_name) in KEYWORDS {
        for i in 0..25 {
            let app_id = format!("gh/{}/{}", type_name, i);
            let suffix = if n < changed { "v2" } else { "v1" };
            out.push((keyword, type_name, app_id, suffix.to_string()));
            n += 1;
        }
    }
    out
}

fn run_cycle(cache: &GwaCache, objects: &[(&str, &str, String, String)]) {
    cache.snapshot();
    for (keyword, type_name, app_id, version) in objects {
        let index = cache.resolve_index(keyword, type_name, app_id);
        let payload = format!("{}:{{speckle_app_id:{}}}\t{}\t{}", keyword, app_id, index, version);
        let object = ExchangeObject::new(*type_name).with_application_id(app_id.clone());
        cache
            .upsert(
                RecordEntry::new(*keyword, index, payload)
                    .application_id(app_id.clone())
                    .linked(Arc::new(object)),
            )
            .unwrap();
    }
}

#[test]
fn test_hundred_records_then_ten_changed() {
    let cache = GwaCache::default();

    run_cycle(&cache, &source(0));
    assert_eq!(cache.latest_count(), 100);
    assert_eq!(cache.len(), 100);
    assert!(cache
        .records()
        .iter()
        .all(|r| r.application_id.is_some() && r.linked_type().is_some()));

    run_cycle(&cache, &source(10));
    assert_eq!(cache.latest_count(), 100);
    assert_eq!(cache.len(), 110);
    assert_eq!(cache.expired_data().len(), 10);
    cache.check_invariants().unwrap();
}

#[test]
fn test_merge_stability_across_cycles() {
    let cache = GwaCache::default();
    let objects = source(0);

    run_cycle(&cache, &objects);
    let after_first = cache.latest_count();
    run_cycle(&cache, &objects);

    assert_eq!(cache.latest_count(), after_first);
    assert!(cache.expired_data().is_empty());
    assert_eq!(cache.len(), 100);
}

#[test]
fn test_detects_removal() {
    let cache = GwaCache::default();
    let mut objects = source(0);
    run_cycle(&cache, &objects);

    let removed = objects.pop().unwrap();
    run_cycle(&cache, &objects);

    let expired = cache.expired_data();
    assert_eq!(expired.len(), 1);
    assert!(expired[0].payload.contains(&removed.2));

    cache.snapshot();
    assert!(!cache
        .records()
        .iter()
        .any(|r| r.application_id.as_deref() == Some(removed.2.as_str())));
}

#[test]
fn test_index_stability() {
    let cache = GwaCache::default();
    let objects = source(0);
    run_cycle(&cache, &objects);
    let first = cache.resolve_index("MEMB.8", "Member", "gh/Member/3");

    run_cycle(&cache, &source(100));
    assert_eq!(cache.resolve_index("MEMB.8", "Member", "gh/Member/3"), first);
}

#[test]
fn test_gap_filling_after_purge() {
    let cache = GwaCache::default();
    let objects: Vec<_> = source(0)
        .into_iter()
        .filter(|o| o.0 == "PROP_SEC")
        .take(4)
        .collect();
    run_cycle(&cache, &objects);
    assert_eq!(cache.keyword_indices("PROP_SEC"), vec![1, 2, 3, 4]);

    // Drop the third object and let the purge free its slot
    let kept: Vec<_> = objects
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 2)
        .map(|(_, o)| o.clone())
        .collect();
    run_cycle(&cache, &kept);
    cache.snapshot();

    assert_eq!(cache.keyword_indices("PROP_SEC"), vec![1, 2, 4]);
    assert_eq!(cache.resolve_index("PROP_SEC", "Section", "gh/Section/new"), 3);
}

#[test]
fn test_generations_through_a_cycle() {
    let cache = GwaCache::default();
    cache
        .upsert(RecordEntry::new("MEMB.8", 1, "a").application_id("m1"))
        .unwrap();
    assert_eq!(cache.records()[0].generation(), Generation::Fresh);

    cache.snapshot();
    assert_eq!(cache.records()[0].generation(), Generation::Stale);

    cache
        .upsert(RecordEntry::new("MEMB.8", 1, "a").application_id("m1"))
        .unwrap();
    assert_eq!(cache.records()[0].generation(), Generation::Carried);
}

proptest! {
    #[test]
    fn prop_reaffirmation_never_grows(payloads in prop::collection::btree_set("[a-z]{1,8}", 1..20), repeats in 1usize..4) {
        let cache = GwaCache::default();
        for (i, payload) in payloads.iter().enumerate() {
            cache.upsert(RecordEntry::new("MEMB.8", i as u32 + 1, payload.clone())).unwrap();
        }
        let live = cache.len();

        for _ in 0..repeats {
            cache.snapshot();
            for (i, payload) in payloads.iter().enumerate() {
                let outcome = cache.upsert(RecordEntry::new("memb.8", i as u32 + 1, payload.clone())).unwrap();
                prop_assert_eq!(outcome, UpsertOutcome::Reaffirmed);
            }
            prop_assert_eq!(cache.len(), live);
            prop_assert_eq!(cache.latest_count(), live);
        }
    }
}
