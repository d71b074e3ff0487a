//! Wave-by-wave batch scheduler
//!
//! Types whose prerequisites are all done form a wave. A wave's types run
//! concurrently on a dedicated rayon pool; the next wave is computed only
//! after every worker of the current one has returned. A failing or
//! panicking type is recorded and counts as done with no output, so its
//! siblings and later waves still run.

use crate::config::SyncConfig;
use crate::dag::TypeDependencyGraph;
use crate::error::{OrchestratorError, Result};
use dashmap::DashMap;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of processing one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeOutcome {
    Produced,
    NoOutput,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRun {
    /// Zero-based wave the type ran in
    pub wave: usize,
    pub outcome: TypeOutcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub waves: Vec<Vec<String>>,
    /// Set when any type produced output
    pub changed: bool,
    pub runs: BTreeMap<String, TypeRun>,
}

impl BatchReport {
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.runs
            .iter()
            .filter_map(|(t, run)| match &run.outcome {
                TypeOutcome::Failed(message) => Some((t.as_str(), message.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn produced(&self) -> usize {
        self.runs
            .values()
            .filter(|r| r.outcome == TypeOutcome::Produced)
            .count()
    }

    pub fn wave_of(&self, type_name: &str) -> Option<usize> {
        self.runs.get(type_name).map(|r| r.wave)
    }
}

pub struct BatchScheduler {
    pool: ThreadPool,
    sequential: bool,
}

impl BatchScheduler {
    pub fn new(parallelism: usize, sequential: bool) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(|i| format!("gwa-wave-{}", i))
            .build()
            .map_err(|e| OrchestratorError::WorkerPool(e.to_string()))?;
        Ok(Self { pool, sequential })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.effective_parallelism(), config.sequential)
    }

    pub fn parallelism(&self) -> usize {
        if self.sequential {
            1
        } else {
            self.pool.current_num_threads()
        }
    }

    /// Run `process` once per type, wave by wave
    ///
    /// `process` returns whether the type produced output. Fails with
    /// `UnsatisfiableGraph` when types remain that never became ready.
    pub fn run_batches<F>(&self, graph: &TypeDependencyGraph, process: F) -> Result<BatchReport>
    where
        F: Fn(&str) -> anyhow::Result<bool> + Sync,
    {
        let mut done: BTreeSet<String> = BTreeSet::new();
        let mut waves = Vec::new();
        // Monotonic: workers only ever set it
        let changed = AtomicBool::new(false);
        let runs: DashMap<String, TypeRun> = DashMap::new();

        loop {
            let wave = graph.ready(&done);
            if wave.is_empty() {
                break;
            }
            let wave_index = waves.len();
            debug!(wave = wave_index + 1, types = ?wave, "starting wave");

            let run_one = |type_name: &String| {
                let start = Instant::now();
                let result = catch_unwind(AssertUnwindSafe(|| process(type_name)));
                let outcome = match result {
                    Ok(Ok(true)) => {
                        changed.store(true, Ordering::Relaxed);
                        TypeOutcome::Produced
                    }
                    Ok(Ok(false)) => TypeOutcome::NoOutput,
                    Ok(Err(e)) => {
                        warn!(type_name = %type_name, "conversion failed: {:#}", e);
                        TypeOutcome::Failed(format!("{:#}", e))
                    }
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        warn!(type_name = %type_name, "worker panicked: {}", message);
                        TypeOutcome::Failed(format!("panicked: {}", message))
                    }
                };
                runs.insert(
                    type_name.clone(),
                    TypeRun {
                        wave: wave_index,
                        outcome,
                        duration_ms: start.elapsed().as_millis() as u64,
                    },
                );
            };

            if self.sequential || wave.len() == 1 {
                wave.iter().for_each(run_one);
            } else {
                self.pool.install(|| wave.par_iter().for_each(run_one));
            }

            done.extend(wave.iter().cloned());
            waves.push(wave);
        }

        let unresolved = graph.unresolved(&done);
        if !unresolved.is_empty() {
            return Err(OrchestratorError::UnsatisfiableGraph { unresolved });
        }

        let report = BatchReport {
            waves,
            changed: changed.load(Ordering::Relaxed),
            runs: runs.into_iter().collect(),
        };
        info!(
            waves = report.waves.len(),
            types = report.runs.len(),
            produced = report.produced(),
            failed = report.failures().len(),
            "batches complete"
        );
        Ok(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
