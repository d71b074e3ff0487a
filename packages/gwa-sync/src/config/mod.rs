//! Synchronisation settings
//!
//! Settings are built in code (`SyncConfig::default()` plus field updates)
//! or loaded from a versioned YAML file. Either way they are validated
//! before an orchestrator accepts them.

pub mod error;
pub mod io;

pub use error::{ConfigError, ConfigResult};
pub use io::SyncConfigExportV1;

use gwa_cache::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Model layer a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLayer {
    #[default]
    Design,
    Analysis,
}

impl TargetLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetLayer::Design => "design",
            TargetLayer::Analysis => "analysis",
        }
    }
}

impl std::fmt::Display for TargetLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for validatable configuration objects
pub trait Validatable {
    fn validate(&self) -> ConfigResult<()>;

    fn config_name(&self) -> &'static str {
        "Config"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub target_layer: TargetLayer,
    /// One outbound stream per plugin stream name instead of a single stream
    pub separate_streams: bool,
    pub full_model_stream: String,
    /// Worker threads per wave; 0 = one per CPU
    pub max_parallelism: usize,
    /// Process types of a wave one at a time
    pub sequential: bool,
    pub foreign_keywords: Vec<String>,
    pub native_id_prefix: String,
    pub polling_rate_ms: u64,
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let policy = RetentionPolicy::default();
        Self {
            target_layer: TargetLayer::Design,
            separate_streams: false,
            full_model_stream: "Full Model".to_string(),
            max_parallelism: 0,
            sequential: false,
            foreign_keywords: policy.foreign_keywords,
            native_id_prefix: policy.native_id_prefix,
            polling_rate_ms: 2000,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    const POLLING_RATE_MS: (u64, u64) = (100, 3_600_000);
    const MAX_PARALLELISM: (usize, usize) = (0, 1024);
    const SUPPORTED_VERSIONS: [u32; 1] = [1];

    /// Load from YAML file (v1 schema)
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let export: SyncConfigExportV1 = serde_yaml::from_str(content)?;

        match export.version {
            None => return Err(ConfigError::MissingVersion),
            Some(v) if !Self::SUPPORTED_VERSIONS.contains(&v) => {
                return Err(ConfigError::UnsupportedVersion {
                    found: v,
                    supported: Self::SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }

        let mut config = Self::default();
        export.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(&SyncConfigExportV1::from(self))?)
    }

    /// Worker threads for a wave
    pub fn effective_parallelism(&self) -> usize {
        if self.sequential {
            1
        } else if self.max_parallelism == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_parallelism
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_rate_ms)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            foreign_keywords: self.foreign_keywords.clone(),
            native_id_prefix: self.native_id_prefix.clone(),
        }
    }

    /// Outbound stream an object of a plugin stream is bucketed into
    pub fn bucket_for<'a>(&'a self, plugin_stream: &'a str) -> &'a str {
        if self.separate_streams {
            plugin_stream
        } else {
            &self.full_model_stream
        }
    }
}

impl Validatable for SyncConfig {
    fn validate(&self) -> ConfigResult<()> {
        let (min, max) = Self::POLLING_RATE_MS;
        if !(min..=max).contains(&self.polling_rate_ms) {
            return Err(ConfigError::range(
                "polling_rate_ms",
                self.polling_rate_ms,
                min,
                max,
                "Use a polling interval between 100ms and one hour.",
            ));
        }

        let (min, max) = Self::MAX_PARALLELISM;
        if !(min..=max).contains(&self.max_parallelism) {
            return Err(ConfigError::range(
                "max_parallelism",
                self.max_parallelism,
                min,
                max,
                "Use 0 to size the pool from the number of CPUs.",
            ));
        }

        if self.full_model_stream.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "full_model_stream".to_string(),
            });
        }
        Ok(())
    }

    fn config_name(&self) -> &'static str {
        "SyncConfig"
    }
}
