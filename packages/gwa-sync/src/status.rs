//! Progress and message sinks
//!
//! Purely observational: nothing written here feeds back into scheduling.

use parking_lot::Mutex;
use tracing::{error, info};

pub trait StatusSink: Send + Sync {
    /// Current activity, with a completion percentage when known
    fn status(&self, message: &str, percent: Option<f64>);

    fn message(&self, text: &str);

    fn error(&self, text: &str);
}

/// Forwards everything to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn status(&self, message: &str, percent: Option<f64>) {
        match percent {
            Some(p) => info!(target: "gwa_sync::status", "{} ({:.0}%)", message, p),
            None => info!(target: "gwa_sync::status", "{}", message),
        }
    }

    fn message(&self, text: &str) {
        info!(target: "gwa_sync::status", "{}", text);
    }

    fn error(&self, text: &str) {
        error!(target: "gwa_sync::status", "{}", text);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEntry {
    Status { message: String, percent: Option<f64> },
    Message(String),
    Error(String),
}

/// Buffers entries for a UI to drain
#[derive(Debug, Default)]
pub struct MemoryStatus {
    entries: Mutex<Vec<StatusEntry>>,
}

impl MemoryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<StatusEntry> {
        self.entries.lock().clone()
    }

    pub fn drain(&self) -> Vec<StatusEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEntry::Message(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|e| match e {
                StatusEntry::Error(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }
}

impl StatusSink for MemoryStatus {
    fn status(&self, message: &str, percent: Option<f64>) {
        self.entries.lock().push(StatusEntry::Status {
            message: message.to_string(),
            percent,
        });
    }

    fn message(&self, text: &str) {
        self.entries.lock().push(StatusEntry::Message(text.to_string()));
    }

    fn error(&self, text: &str) {
        self.entries.lock().push(StatusEntry::Error(text.to_string()));
    }
}
