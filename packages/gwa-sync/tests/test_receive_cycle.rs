//! Receiver cycles: exchange objects written back as native commands

mod common;

use common::{structural_registry, MockSource, MockTransport};
use gwa_cache::ExchangeObject;
use gwa_sync::{
    CycleOutcome, CycleState, OrchestratorError, Receiver, Sender, SyncConfig, SyncContext,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const STREAM: &str = "s1";

fn object(type_name: &str, app_id: &str, properties: serde_json::Value) -> ExchangeObject {
    ExchangeObject::new(type_name)
        .with_application_id(app_id)
        .with_properties(properties)
}

fn model() -> Vec<ExchangeObject> {
    vec![
        object("Node", "gh/n1", json!({ "value": 10 })),
        object("Node", "gh/n2", json!({ "value": 20 })),
        object("Member", "gh/m1", json!({ "node": "gh/n1", "value": 1 })),
        object("Member", "gh/m2", json!({ "node": "gh/n2", "value": 2 })),
        object("BeamLoad", "gh/b1", json!({ "node": "gh/m1", "value": 5 })),
        object("Annotation", "gh/t1", json!({ "text": "note" })),
    ]
}

fn line(keyword: &str, app_id: &str, fields: &str) -> String {
    format!(
        "SET\t{}:{{speckle_app_id:{}}}{{speckle_stream_id:{}}}\t{}",
        keyword, app_id, STREAM, fields
    )
}

struct Harness {
    source: Arc<MockSource>,
    transport: Arc<MockTransport>,
    ctx: SyncContext,
    receiver: Receiver,
}

/// Native model with two generated nodes and three untracked members
async fn harness() -> Harness {
    let source = Arc::new(MockSource::new());
    source.put("NODE.3", 1, None, "0\t0\t0");
    source.put("NODE.3", 2, None, "1\t0\t0");
    for i in 1..=3 {
        source.put("MEMB.8", i, None, "native");
    }

    let transport = Arc::new(MockTransport::new());
    transport.publish(STREAM, model());

    let ctx = SyncContext::new(SyncConfig::default(), structural_registry(), source.clone()).unwrap();
    let receiver = Receiver::new(ctx.clone(), transport.clone()).unwrap();
    let loaded = receiver.initialize(vec![STREAM.to_string(), " ".to_string()]).await.unwrap();
    assert_eq!(loaded, 5);
    assert_eq!(receiver.stream_ids(), vec![STREAM]);

    Harness {
        source,
        transport,
        ctx,
        receiver,
    }
}

#[tokio::test]
async fn test_initialize_reserves_native_indices() {
    let h = harness().await;
    assert_eq!(h.ctx.cache.reserved_indices("NODE.3"), vec![1, 2]);
    assert_eq!(h.ctx.cache.reserved_indices("MEMB.8"), vec![1, 2, 3]);
    assert!(h.ctx.cache.reserved_indices("LOAD_BEAM").is_empty());
    // Only HIGHEST queries so far
    assert!(h.source.commands().iter().all(|c| c.starts_with("HIGHEST\t")));
}

#[tokio::test]
async fn test_first_receive_writes_new_slots() {
    let h = harness().await;
    h.source.take_commands();

    let report = h.receiver.trigger().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    assert_eq!(report.objects_received, 6);
    assert_eq!(report.objects_unhandled, 1);
    assert_eq!(report.native_commands, 5);
    assert_eq!(report.batch.wave_of("BeamLoad"), Some(2));
    assert_eq!(h.receiver.state(), CycleState::Idle);

    let mut commands = h.source.take_commands();
    commands.sort();
    let mut expected = vec![
        line("LOAD_BEAM", "gh/b1", "1\t4\t5"),
        line("MEMB.8", "gh/m1", "4\t3\t1"),
        line("MEMB.8", "gh/m2", "5\t4\t2"),
        line("NODE.3", "gh/n1", "3\t10"),
        line("NODE.3", "gh/n2", "4\t20"),
    ];
    expected.sort();
    assert_eq!(commands, expected);

    // Native members were never touched
    assert_eq!(h.source.len(), 10);
}

#[tokio::test]
async fn test_repeat_receive_is_idempotent() {
    let h = harness().await;
    h.receiver.trigger().await.unwrap();
    h.source.take_commands();

    let report = h.receiver.trigger().await.unwrap();
    assert_eq!(report.native_commands, 0);
    assert!(h.source.take_commands().is_empty());
    assert_eq!(h.ctx.cache.lookup_index("MEMB.8", "Member", "gh/m2"), Some(5));
}

#[tokio::test]
async fn test_removed_object_is_blanked() {
    let h = harness().await;
    h.receiver.trigger().await.unwrap();
    h.source.take_commands();

    let remaining: Vec<_> = model()
        .into_iter()
        .filter(|o| o.application_id.as_deref() != Some("gh/m2"))
        .collect();
    h.transport.publish(STREAM, remaining);

    h.receiver.trigger().await.unwrap();
    assert_eq!(h.source.take_commands(), vec!["BLANK\tMEMB\t5"]);
    assert_eq!(h.source.len(), 9);
}

#[tokio::test]
async fn test_changed_object_is_rewritten_in_place() {
    let h = harness().await;
    h.receiver.trigger().await.unwrap();
    h.source.take_commands();

    let changed: Vec<_> = model()
        .into_iter()
        .map(|o| match o.application_id.as_deref() {
            Some("gh/m1") => object("Member", "gh/m1", json!({ "node": "gh/n1", "value": 9 })),
            _ => o,
        })
        .collect();
    h.transport.publish(STREAM, changed);

    h.receiver.trigger().await.unwrap();
    assert_eq!(
        h.source.take_commands(),
        vec![line("MEMB.8", "gh/m1", "4\t3\t9")]
    );
}

#[tokio::test]
async fn test_receive_failure_restores_cache() {
    let h = harness().await;
    h.receiver.trigger().await.unwrap();
    let before = h.ctx.cache.set_commands();
    h.source.take_commands();

    h.transport.fail_receive.store(true, Ordering::SeqCst);
    let err = h.receiver.trigger().await.unwrap_err();

    assert!(matches!(err, OrchestratorError::Transport(_)));
    assert_eq!(h.ctx.cache.set_commands(), before);
    assert_eq!(h.receiver.state(), CycleState::Idle);
    assert!(!h.receiver.is_busy());
    assert!(h.source.take_commands().is_empty());
}

#[tokio::test]
async fn test_overlapping_receive_is_skipped() {
    let h = harness().await;
    let (first, second) = tokio::join!(h.receiver.trigger(), h.receiver.trigger());

    assert_eq!(first.unwrap().outcome, CycleOutcome::Completed);
    assert_eq!(second.unwrap().outcome, CycleOutcome::Skipped);
}

#[tokio::test]
async fn test_reinitialize_reloads_native_model() {
    let h = harness().await;
    h.receiver.trigger().await.unwrap();
    h.source.take_commands();

    // gh/m2 deleted natively while the receiver was idle
    h.source.remove("MEMB.8", 5);
    let loaded = h.receiver.initialize(vec![STREAM.to_string()]).await.unwrap();
    assert_eq!(loaded, 9);
    assert_eq!(h.ctx.cache.len(), 9);
    assert_eq!(h.ctx.cache.reserved_indices("MEMB.8"), vec![1, 2, 3, 4]);
    h.source.take_commands();

    let report = h.receiver.trigger().await.unwrap();
    assert_eq!(report.native_commands, 1);
    assert_eq!(
        h.source.take_commands(),
        vec![line("MEMB.8", "gh/m2", "5\t4\t2")]
    );
    assert_eq!(h.source.len(), 10);
    assert_eq!(h.ctx.cache.lookup_index("NODE.3", "Node", "gh/n1"), Some(3));
}

#[tokio::test]
async fn test_delete_received_blanks_stream_records_only() {
    let h = harness().await;
    h.receiver.trigger().await.unwrap();
    h.source.take_commands();

    let deleted = h.receiver.delete_received().await.unwrap();
    assert_eq!(deleted, 5);

    let mut commands = h.source.take_commands();
    commands.sort();
    assert_eq!(
        commands,
        vec![
            "BLANK\tLOAD_BEAM\t1",
            "BLANK\tMEMB\t4",
            "BLANK\tMEMB\t5",
            "BLANK\tNODE\t3",
            "BLANK\tNODE\t4",
        ]
    );
    // The two generated nodes and three native members remain
    assert_eq!(h.source.len(), 5);
    assert_eq!(h.ctx.cache.lookup_index("MEMB.8", "Member", "gh/m1"), None);
    assert!(!h.receiver.is_busy());

    // The stream is still published, so the next cycle writes it again
    let report = h.receiver.trigger().await.unwrap();
    assert_eq!(report.native_commands, 5);
    assert_eq!(h.source.len(), 10);
}

#[tokio::test]
async fn test_delete_received_before_any_cycle_is_a_no_op() {
    let h = harness().await;
    h.source.take_commands();

    assert_eq!(h.receiver.delete_received().await.unwrap(), 0);
    assert!(h.source.take_commands().is_empty());
    assert_eq!(h.ctx.cache.len(), 5);
}

#[tokio::test]
async fn test_send_and_receive_on_one_context_do_not_overlap() {
    let h = harness().await;
    let sender = Sender::new(h.ctx.clone(), h.transport.clone()).unwrap();

    let (sent, received) = tokio::join!(sender.trigger(), h.receiver.trigger());
    assert_ne!(sent.unwrap().outcome, CycleOutcome::Skipped);
    assert_eq!(received.unwrap().outcome, CycleOutcome::Skipped);
    assert!(!h.ctx.gate.is_busy());

    let report = h.receiver.trigger().await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Completed);
    h.ctx.cache.check_invariants().unwrap();
}

#[tokio::test]
async fn test_initialize_refused_while_cycle_runs() {
    let h = harness().await;
    let _busy = h.ctx.gate.try_enter().unwrap();

    let err = h.receiver.initialize(vec![STREAM.to_string()]).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Busy));
    assert!(matches!(
        h.receiver.delete_received().await,
        Err(OrchestratorError::Busy)
    ));
    assert_eq!(h.receiver.trigger().await.unwrap().outcome, CycleOutcome::Skipped);
}

#[tokio::test]
async fn test_polling_triggers_first_cycle_immediately() {
    let h = harness().await;
    h.source.take_commands();
    let receiver = Arc::new(h.receiver);

    let polling = receiver.spawn_polling();
    tokio::time::sleep(Duration::from_millis(300)).await;
    polling.abort();

    // Default interval is two seconds, so exactly one cycle ran
    assert_eq!(h.source.take_commands().len(), 5);
    assert_eq!(h.ctx.cache.lookup_index("MEMB.8", "Member", "gh/m2"), Some(5));
}
