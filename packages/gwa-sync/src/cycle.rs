//! Cycle bookkeeping shared by the sender and receiver
//!
//! - [`CycleGate`]: at most one cycle per context; a trigger while busy is dropped
//! - [`CycleStateMachine`]: legal phase transitions of a cycle
//! - [`CycleReport`]: what a cycle did

use crate::error::{OrchestratorError, Result};
use crate::scheduler::BatchReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Receive => "receive",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Busy flag; clones share it
#[derive(Debug, Clone, Default)]
pub struct CycleGate {
    busy: Arc<AtomicBool>,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when a cycle is already running
    pub fn try_enter(&self) -> Option<BusyGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears the busy flag when dropped, on every exit path
#[derive(Debug)]
pub struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    Idle,
    /// Sender: native read and conversion
    Reading,
    Bucketing,
    Transmitting,
    Receiving,
    /// Receiver: conversion back to native records
    Writing,
}

impl CycleState {
    pub fn state_name(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Reading => "reading",
            CycleState::Bucketing => "bucketing",
            CycleState::Transmitting => "transmitting",
            CycleState::Receiving => "receiving",
            CycleState::Writing => "writing",
        }
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self, CycleState::Idle)
    }
}

#[derive(Debug, Clone)]
pub struct CycleStateMachine {
    direction: Direction,
    state: CycleState,
}

impl CycleStateMachine {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: CycleState::Idle,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Sender: `Idle → Reading → (Idle | Bucketing → Transmitting → Idle)`;
    /// receiver: `Idle → Receiving → Writing → Idle`
    pub fn advance(&mut self, to: CycleState) -> Result<()> {
        use CycleState::*;
        let allowed = match self.direction {
            Direction::Send => matches!(
                (self.state, to),
                (Idle, Reading)
                    | (Reading, Idle)
                    | (Reading, Bucketing)
                    | (Bucketing, Transmitting)
                    | (Transmitting, Idle)
            ),
            Direction::Receive => matches!(
                (self.state, to),
                (Idle, Receiving) | (Receiving, Writing) | (Writing, Idle)
            ),
        };
        if !allowed {
            return Err(OrchestratorError::InvalidStateTransition {
                from: self.state.state_name().to_string(),
                to: to.state_name().to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Back to idle from any phase after a failed cycle
    pub fn abort(&mut self) {
        self.state = CycleState::Idle;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleOutcome {
    /// Another cycle was running; nothing was done
    Skipped,
    /// Nothing changed since the previous cycle
    Unchanged,
    Completed,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub id: Uuid,
    pub direction: Direction,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub records_read: usize,
    pub objects_sent: usize,
    pub objects_received: usize,
    /// Received objects no registered type handles
    pub objects_unhandled: usize,
    pub native_commands: usize,
    pub batch: BatchReport,
}

impl CycleReport {
    pub fn begin(direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            direction,
            started_at: now,
            finished_at: now,
            outcome: CycleOutcome::Skipped,
            records_read: 0,
            objects_sent: 0,
            objects_received: 0,
            objects_unhandled: 0,
            native_commands: 0,
            batch: BatchReport::default(),
        }
    }

    pub fn skipped(direction: Direction) -> Self {
        Self::begin(direction)
    }

    pub fn finish(mut self, outcome: CycleOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }
}
