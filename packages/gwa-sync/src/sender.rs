//! Outbound cycle: native model -> exchange streams
//!
//! ```text
//! trigger ─▶ snapshot ─▶ fetch + upsert ─▶ read waves (convert)
//!              │
//!              ├─ unchanged ─▶ idle
//!              └─ changed ──▶ bucket latest objects ─▶ send per stream ─▶ idle
//! ```
//!
//! A failed cycle restores the cache to its pre-cycle checkpoint.

use crate::context::SyncContext;
use crate::cycle::{CycleOutcome, CycleReport, CycleState, CycleStateMachine, Direction};
use crate::dag::TypeDependencyGraph;
use crate::error::{OrchestratorError, Result};
use crate::scheduler::{BatchReport, BatchScheduler};
use crate::source::Transport;
use gwa_cache::ExchangeObject;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Stream name -> type name -> objects
pub type Buckets = BTreeMap<String, BTreeMap<String, Vec<ExchangeObject>>>;

pub struct Sender {
    ctx: SyncContext,
    transport: Arc<dyn Transport>,
    graph: Arc<TypeDependencyGraph>,
    scheduler: Arc<BatchScheduler>,
    state: Mutex<CycleStateMachine>,
    /// Bucket name -> stream id
    streams: Mutex<BTreeMap<String, String>>,
}

impl Sender {
    pub fn new(ctx: SyncContext, transport: Arc<dyn Transport>) -> Result<Self> {
        let graph = ctx.registry.read_graph(ctx.config.target_layer)?;
        graph.waves()?;
        info!("Send plan:\n{}", graph.execution_plan());

        let scheduler = BatchScheduler::from_config(&ctx.config)?;
        Ok(Self {
            ctx,
            transport,
            graph: Arc::new(graph),
            scheduler: Arc::new(scheduler),
            state: Mutex::new(CycleStateMachine::new(Direction::Send)),
            streams: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn state(&self) -> CycleState {
        self.state.lock().state()
    }

    pub fn is_busy(&self) -> bool {
        self.ctx.gate.is_busy()
    }

    /// Bucket name -> stream id of every opened stream
    pub fn streams(&self) -> BTreeMap<String, String> {
        self.streams.lock().clone()
    }

    /// Names of the outbound buckets for the configured layer
    pub fn bucket_names(&self) -> Vec<String> {
        let config = &self.ctx.config;
        if !config.separate_streams {
            return vec![config.full_model_stream.clone()];
        }
        let names: BTreeSet<String> = self
            .ctx
            .registry
            .for_layer(config.target_layer)
            .iter()
            .map(|p| p.stream().to_string())
            .collect();
        names.into_iter().collect()
    }

    /// Open one stream per bucket
    pub async fn initialize(&self) -> Result<()> {
        for name in self.bucket_names() {
            self.stream_id(&name).await?;
        }
        self.ctx
            .status
            .message(&format!("Opened {} outbound stream(s)", self.streams.lock().len()));
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.transport.close().await.map_err(OrchestratorError::transport)?;
        self.streams.lock().clear();
        Ok(())
    }

    /// Run one send cycle; dropped (reported as skipped) while another runs
    pub async fn trigger(&self) -> Result<CycleReport> {
        let Some(_busy) = self.ctx.gate.try_enter() else {
            debug!("a sync cycle is already running, send trigger dropped");
            return Ok(CycleReport::skipped(Direction::Send));
        };

        let checkpoint = self.ctx.cache.checkpoint();
        match self.run_cycle().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.ctx.cache.restore(checkpoint);
                self.state.lock().abort();
                error!(category = %e.category(), "send cycle failed: {}", e);
                self.ctx.status.error(&format!("Send failed: {}", e));
                Err(e)
            }
        }
    }

    /// Run [`trigger`](Self::trigger) on a background task
    pub fn spawn_trigger(self: &Arc<Self>) -> JoinHandle<Result<CycleReport>> {
        let sender = Arc::clone(self);
        tokio::spawn(async move { sender.trigger().await })
    }

    /// Trigger a cycle every `polling_rate_ms` until the handle is aborted
    pub fn spawn_polling(self: &Arc<Self>) -> JoinHandle<()> {
        let sender = Arc::clone(self);
        let period = self.ctx.config.polling_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = sender.trigger().await {
                    debug!("polled send cycle failed: {}", e);
                }
            }
        })
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::begin(Direction::Send);
        self.state.lock().advance(CycleState::Reading)?;
        self.ctx.status.status("Reading native model", None);

        let ctx = self.ctx.clone();
        let graph = self.graph.clone();
        let scheduler = self.scheduler.clone();
        let (records_read, batch, expired) =
            tokio::task::spawn_blocking(move || read_and_convert(&ctx, &graph, &scheduler))
                .await
                .map_err(|e| OrchestratorError::Other(anyhow::anyhow!("send worker: {}", e)))??;

        report.records_read = records_read;
        report.batch = batch;
        for (type_name, message) in report.batch.failures() {
            self.ctx
                .status
                .error(&format!("Conversion of {} failed: {}", type_name, message));
        }

        if !report.batch.changed && expired == 0 {
            self.state.lock().advance(CycleState::Idle)?;
            self.ctx.status.message("No changes since the last send");
            return Ok(report.finish(CycleOutcome::Unchanged));
        }

        self.state.lock().advance(CycleState::Bucketing)?;
        let buckets = self.bucket_objects();

        self.state.lock().advance(CycleState::Transmitting)?;
        let total = buckets.len();
        for (i, (bucket, objects)) in buckets.into_iter().enumerate() {
            let stream_id = self.stream_id(&bucket).await?;
            let count: usize = objects.values().map(Vec::len).sum();
            self.ctx.status.status(
                &format!("Sending {} objects to {}", count, bucket),
                Some(100.0 * i as f64 / total as f64),
            );
            self.transport
                .send(&stream_id, objects)
                .await
                .map_err(OrchestratorError::transport)?;
            report.objects_sent += count;
        }

        self.state.lock().advance(CycleState::Idle)?;
        let report = report.finish(CycleOutcome::Completed);
        info!(
            cycle = %report.id,
            records = report.records_read,
            sent = report.objects_sent,
            expired,
            duration_ms = report.duration_ms(),
            "send cycle complete"
        );
        self.ctx
            .status
            .message(&format!("Sent {} objects", report.objects_sent));
        Ok(report)
    }

    /// Latest linked objects grouped by outbound bucket and type, hashed
    pub fn bucket_objects(&self) -> Buckets {
        let config = &self.ctx.config;
        let mut buckets = Buckets::new();
        for linked in self.ctx.cache.latest_linked_objects() {
            let bucket = match self.ctx.registry.get(&linked.type_name) {
                Some(plugin) => config.bucket_for(plugin.stream()).to_string(),
                None => config.full_model_stream.clone(),
            };
            let mut object = (*linked).clone();
            object.generate_hash();
            buckets
                .entry(bucket)
                .or_default()
                .entry(object.type_name.clone())
                .or_default()
                .push(object);
        }
        buckets
    }

    async fn stream_id(&self, bucket: &str) -> Result<String> {
        let existing = self.streams.lock().get(bucket).cloned();
        if let Some(id) = existing {
            return Ok(id);
        }
        let id = self
            .transport
            .open_stream(bucket)
            .await
            .map_err(OrchestratorError::transport)?;
        info!(bucket, stream_id = %id, "stream opened");
        self.streams.lock().insert(bucket.to_string(), id.clone());
        Ok(id)
    }
}

/// Snapshot, reload the native model, convert wave by wave
///
/// Returns records read, the batch report and the number of expired records.
fn read_and_convert(
    ctx: &SyncContext,
    graph: &TypeDependencyGraph,
    scheduler: &BatchScheduler,
) -> Result<(usize, BatchReport, usize)> {
    ctx.cache.snapshot();

    let keywords = ctx.keywords();
    let records = ctx
        .source
        .fetch_all(&keywords)
        .map_err(OrchestratorError::native)?;
    let records_read = records.len();
    for record in records {
        ctx.cache.upsert(record.into())?;
    }
    debug!(records_read, keywords = keywords.len(), "native model loaded");

    let batch = scheduler.run_batches(graph, |type_name| match ctx.registry.get(type_name) {
        Some(plugin) => plugin.convert(&ctx.cache),
        None => Ok(false),
    })?;

    let expired = ctx.cache.expired_data().len();
    Ok((records_read, batch, expired))
}
