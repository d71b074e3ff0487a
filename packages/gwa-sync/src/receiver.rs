//! Inbound cycle: exchange streams -> native model
//!
//! Initialisation loads the native model into the cache and reserves every
//! native index in use, so slots the engine does not track are never
//! reallocated. Each trigger then receives all streams, writes the objects
//! back wave by wave and issues the resulting native commands.
//! [`Receiver::delete_received`] undoes everything written from the
//! receiver's streams.

use crate::context::SyncContext;
use crate::cycle::{CycleOutcome, CycleReport, CycleState, CycleStateMachine, Direction};
use crate::dag::TypeDependencyGraph;
use crate::error::{OrchestratorError, Result};
use crate::plugin::ReceivedObject;
use crate::scheduler::{BatchReport, BatchScheduler};
use crate::source::Transport;
use gwa_cache::{gwa, GwaCache, RecordSummary};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Type name -> received objects of that type
pub type ObjectsByType = BTreeMap<String, Vec<ReceivedObject>>;

pub struct Receiver {
    ctx: SyncContext,
    transport: Arc<dyn Transport>,
    graph: Arc<TypeDependencyGraph>,
    scheduler: Arc<BatchScheduler>,
    state: Mutex<CycleStateMachine>,
    stream_ids: Mutex<Vec<String>>,
}

impl Receiver {
    pub fn new(ctx: SyncContext, transport: Arc<dyn Transport>) -> Result<Self> {
        let graph = ctx.registry.write_graph(ctx.config.target_layer)?;
        graph.waves()?;
        info!("Receive plan:\n{}", graph.execution_plan());

        let scheduler = BatchScheduler::from_config(&ctx.config)?;
        Ok(Self {
            ctx,
            transport,
            graph: Arc::new(graph),
            scheduler: Arc::new(scheduler),
            state: Mutex::new(CycleStateMachine::new(Direction::Receive)),
            stream_ids: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> CycleState {
        self.state.lock().state()
    }

    pub fn is_busy(&self) -> bool {
        self.ctx.gate.is_busy()
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.stream_ids.lock().clone()
    }

    /// Load the native model, reserve its indices and set the baseline
    ///
    /// Anything cached by an earlier initialisation is discarded first.
    /// Returns the number of native records loaded.
    pub async fn initialize(&self, stream_ids: Vec<String>) -> Result<usize> {
        let Some(_busy) = self.ctx.gate.try_enter() else {
            return Err(OrchestratorError::Busy);
        };
        let ids: Vec<String> = stream_ids
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        self.ctx.status.status("Loading native model", None);

        let ctx = self.ctx.clone();
        let loaded = tokio::task::spawn_blocking(move || load_native_model(&ctx))
            .await
            .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("receive worker: {}", e)))??;

        info!(records = loaded, streams = ids.len(), "receiver initialised");
        *self.stream_ids.lock() = ids;
        Ok(loaded)
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await.map_err(OrchestratorError::transport)
    }

    /// Run one receive cycle; dropped (reported as skipped) while another runs
    pub async fn trigger(&self) -> Result<CycleReport> {
        let Some(_busy) = self.ctx.gate.try_enter() else {
            debug!("a sync cycle is already running, receive trigger dropped");
            return Ok(CycleReport::skipped(Direction::Receive));
        };

        let checkpoint = self.ctx.cache.checkpoint();
        match self.run_cycle().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.ctx.cache.restore(checkpoint);
                self.state.lock().abort();
                error!(category = %e.category(), "receive cycle failed: {}", e);
                self.ctx.status.error(&format!("Receive failed: {}", e));
                Err(e)
            }
        }
    }

    /// Run [`trigger`](Self::trigger) on a background task
    pub fn spawn_trigger(self: &Arc<Self>) -> JoinHandle<Result<CycleReport>> {
        let receiver = Arc::clone(self);
        tokio::spawn(async move { receiver.trigger().await })
    }

    /// Trigger a cycle every `polling_rate_ms` until the handle is aborted
    pub fn spawn_polling(self: &Arc<Self>) -> JoinHandle<()> {
        let receiver = Arc::clone(self);
        let period = self.ctx.config.polling_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = receiver.trigger().await {
                    debug!("polled receive cycle failed: {}", e);
                }
            }
        })
    }

    /// Delete every native record written from the receiver's streams
    ///
    /// Records created natively, or written from other streams, stay. The
    /// deleted records are dropped from the cache, so a later cycle writes
    /// them again. Returns the number of native commands issued.
    pub async fn delete_received(&self) -> Result<usize> {
        let Some(_busy) = self.ctx.gate.try_enter() else {
            return Err(OrchestratorError::Busy);
        };
        self.ctx.status.status("Deleting received objects", None);

        let checkpoint = self.ctx.cache.checkpoint();
        let ctx = self.ctx.clone();
        let stream_ids = self.stream_ids();
        let result = tokio::task::spawn_blocking(move || delete_from_native(&ctx, &stream_ids))
            .await
            .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("receive worker: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(commands) => {
                info!(commands, "received objects deleted");
                Ok(commands)
            }
            Err(e) => {
                self.ctx.cache.restore(checkpoint);
                error!(category = %e.category(), "deleting received objects failed: {}", e);
                self.ctx.status.error(&format!("Delete failed: {}", e));
                Err(e)
            }
        }
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::begin(Direction::Receive);
        self.state.lock().advance(CycleState::Receiving)?;
        self.ctx.status.status("Receiving", None);

        let stream_ids = self.stream_ids();
        let received = futures::future::join_all(stream_ids.iter().map(|id| async move {
            (id.clone(), self.transport.receive(id).await)
        }))
        .await;

        let mut objects = Vec::new();
        for (stream_id, result) in received {
            let batch = result.map_err(|e| {
                OrchestratorError::Transport(format!("stream {}: {:#}", stream_id, e))
            })?;
            objects.extend(
                batch
                    .into_iter()
                    .map(|o| ReceivedObject::new(stream_id.clone(), o)),
            );
        }
        report.objects_received = objects.len();

        let by_type = group_by_type(objects);
        for (type_name, objects) in &by_type {
            if !self.graph.contains(type_name) {
                warn!(type_name = %type_name, count = objects.len(), "no plugin for received type");
                self.ctx.status.message(&format!(
                    "{} received object(s) of type {} were not converted",
                    objects.len(),
                    type_name
                ));
                report.objects_unhandled += objects.len();
            }
        }

        self.state.lock().advance(CycleState::Writing)?;
        self.ctx.status.status("Writing native model", None);

        let ctx = self.ctx.clone();
        let graph = self.graph.clone();
        let scheduler = self.scheduler.clone();
        let (batch, commands) = tokio::task::spawn_blocking(move || {
            write_and_apply(&ctx, &graph, &scheduler, &by_type, &stream_ids)
        })
        .await
        .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("receive worker: {}", e)))??;

        report.batch = batch;
        report.native_commands = commands;
        for (type_name, message) in report.batch.failures() {
            self.ctx
                .status
                .error(&format!("Writing {} failed: {}", type_name, message));
        }

        self.state.lock().advance(CycleState::Idle)?;
        let report = report.finish(CycleOutcome::Completed);
        info!(
            cycle = %report.id,
            received = report.objects_received,
            unhandled = report.objects_unhandled,
            commands = report.native_commands,
            duration_ms = report.duration_ms(),
            "receive cycle complete"
        );
        Ok(report)
    }
}

/// De-duplicate by (type, application id), first occurrence wins, and group
/// by type. Objects without an application id are all kept.
pub fn group_by_type(objects: Vec<ReceivedObject>) -> ObjectsByType {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut by_type = ObjectsByType::new();
    for received in objects {
        if let Some(id) = received.application_id() {
            if !seen.insert((received.object.type_name.clone(), id.to_string())) {
                continue;
            }
        }
        by_type
            .entry(received.object.type_name.clone())
            .or_default()
            .push(received);
    }
    by_type
}

fn load_native_model(ctx: &SyncContext) -> Result<usize> {
    ctx.cache.clear();
    let keywords = ctx.keywords();
    let records = ctx
        .source
        .fetch_all(&keywords)
        .map_err(OrchestratorError::native)?;
    let loaded = records.len();
    for record in records {
        ctx.cache.upsert(record.into())?;
    }

    for keyword in &keywords {
        let highest = ctx
            .source
            .highest_index(keyword)
            .map_err(OrchestratorError::native)?;
        if highest > 0 {
            ctx.cache.reserve_indices(keyword, 1..=highest);
        }
    }
    ctx.cache.set_baseline();
    Ok(loaded)
}

fn delete_from_native(ctx: &SyncContext, stream_ids: &[String]) -> Result<usize> {
    let ours: Vec<RecordSummary> = ctx
        .cache
        .deletable_data()
        .into_iter()
        .filter(|r| {
            r.stream_id
                .as_deref()
                .is_some_and(|s| stream_ids.iter().any(|id| id == s))
        })
        .collect();
    for record in &ours {
        let command = gwa::delete_command(record.command_kind, &record.keyword, record.index);
        ctx.source
            .run_command(&command)
            .map_err(OrchestratorError::native)?;
    }
    let removed = ctx.cache.remove_streams(stream_ids);
    debug!(commands = ours.len(), removed, "stream records deleted");
    Ok(ours.len())
}

fn write_and_apply(
    ctx: &SyncContext,
    graph: &TypeDependencyGraph,
    scheduler: &BatchScheduler,
    by_type: &ObjectsByType,
    stream_ids: &[String],
) -> Result<(BatchReport, usize)> {
    ctx.cache.reset_to_baseline();
    ctx.cache.snapshot();

    let batch = scheduler.run_batches(graph, |type_name| {
        let Some(plugin) = ctx.registry.get(type_name) else {
            return Ok(false);
        };
        let objects = by_type.get(type_name).map(Vec::as_slice).unwrap_or(&[]);
        plugin.write_back(&ctx.cache, objects)?;
        Ok(!objects.is_empty())
    })?;

    ctx.cache.check_invariants()?;

    let commands = native_commands(&ctx.cache, stream_ids);
    for command in &commands {
        ctx.source
            .run_command(command)
            .map_err(OrchestratorError::native)?;
    }
    Ok((batch, commands.len()))
}

/// Deletes for expired records written from one of `stream_ids`, then sets
/// for fresh records
///
/// A delete is skipped when a fresh record was written to the same slot.
/// Records without a matching stream id were created natively and are left
/// in place.
pub fn native_commands(cache: &GwaCache, stream_ids: &[String]) -> Vec<String> {
    let fresh = cache.newly_added();
    let rewritten: HashSet<(String, u32)> = fresh
        .iter()
        .map(|r| (r.keyword.to_ascii_uppercase(), r.index))
        .collect();

    let mut commands = Vec::new();
    for expired in cache.expired_data() {
        let ours = expired
            .stream_id
            .as_deref()
            .is_some_and(|s| stream_ids.iter().any(|id| id == s));
        let slot = (expired.keyword.to_ascii_uppercase(), expired.index);
        if ours && !rewritten.contains(&slot) {
            commands.push(gwa::delete_command(
                expired.command_kind,
                &expired.keyword,
                expired.index,
            ));
        }
    }
    for record in fresh {
        commands.push(gwa::set_command(record.command_kind, record.index, &record.payload));
    }
    commands
}
