//! Error types for the record cache

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// More than one record under a keyword carries the same payload
    #[error("Duplicate payload: {count} records under keyword '{keyword}' match the same GWA")]
    DuplicatePayload { keyword: String, count: usize },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("GWA parse error: {0}")]
    Parse(String),

    #[error("Invalid index {index} for keyword '{keyword}': indices start at 1")]
    InvalidIndex { keyword: String, index: u32 },
}

impl CacheError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    /// Errors after which the cache contents can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::DuplicatePayload { .. } | CacheError::InvariantViolation(_)
        )
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
