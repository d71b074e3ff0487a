use crate::config::ConfigError;
use gwa_cache::CacheError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Type registered twice: {0}")]
    DuplicateType(String),

    #[error("Unsatisfiable type graph: {} types never became ready ({})", unresolved.len(), unresolved.join(", "))]
    UnsatisfiableGraph { unresolved: Vec<String> },

    #[error("A sync cycle is already running")]
    Busy,

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Conversion failed for {type_name}: {message}")]
    Conversion { type_name: String, message: String },

    #[error("Native source error: {0}")]
    NativeSource(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn native<E: std::fmt::Display>(e: E) -> Self {
        Self::NativeSource(e.to_string())
    }

    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Cache(_)
            | OrchestratorError::MissingDependency(_)
            | OrchestratorError::UnsatisfiableGraph { .. }
            | OrchestratorError::Busy
            | OrchestratorError::InvalidStateTransition { .. } => ErrorCategory::Consistency,
            OrchestratorError::Conversion { .. } | OrchestratorError::Parse(_) => {
                ErrorCategory::Conversion
            }
            OrchestratorError::NativeSource(_)
            | OrchestratorError::Transport(_)
            | OrchestratorError::Other(_) => ErrorCategory::Transport,
            OrchestratorError::Config(_)
            | OrchestratorError::DuplicateType(_)
            | OrchestratorError::WorkerPool(_) => ErrorCategory::Configuration,
        }
    }
}

/// How a failure affects the running cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Cache or type graph can no longer be trusted - abort the cycle
    Consistency,
    /// One type failed to convert - siblings continue
    Conversion,
    /// Native source or exchange unreachable - roll back and retry next trigger
    Transport,
    /// Invalid settings or registry
    Configuration,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Consistency => "consistency",
            ErrorCategory::Conversion => "conversion",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Configuration => "configuration",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "consistency" => Ok(ErrorCategory::Consistency),
            "conversion" => Ok(ErrorCategory::Conversion),
            "transport" => Ok(ErrorCategory::Transport),
            "configuration" => Ok(ErrorCategory::Configuration),
            _ => Err(OrchestratorError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
