//! YAML schema (v1)

use super::{SyncConfig, TargetLayer};
use serde::{Deserialize, Serialize};

/// On-disk form of [`SyncConfig`]
///
/// Every setting is optional so a file only needs to name what it changes;
/// `version` is checked by the loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfigExportV1 {
    /// Schema version (always 1 for v1)
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_layer: Option<TargetLayer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separate_streams: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_model_stream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallelism: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequential: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreign_keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_id_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_rate_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl SyncConfigExportV1 {
    pub(super) fn apply(self, config: &mut SyncConfig) {
        if let Some(v) = self.target_layer {
            config.target_layer = v;
        }
        if let Some(v) = self.separate_streams {
            config.separate_streams = v;
        }
        if let Some(v) = self.full_model_stream {
            config.full_model_stream = v;
        }
        if let Some(v) = self.max_parallelism {
            config.max_parallelism = v;
        }
        if let Some(v) = self.sequential {
            config.sequential = v;
        }
        if let Some(v) = self.foreign_keywords {
            config.foreign_keywords = v;
        }
        if let Some(v) = self.native_id_prefix {
            config.native_id_prefix = v;
        }
        if let Some(v) = self.polling_rate_ms {
            config.polling_rate_ms = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
    }
}

impl From<&SyncConfig> for SyncConfigExportV1 {
    fn from(config: &SyncConfig) -> Self {
        Self {
            version: Some(1),
            target_layer: Some(config.target_layer),
            separate_streams: Some(config.separate_streams),
            full_model_stream: Some(config.full_model_stream.clone()),
            max_parallelism: Some(config.max_parallelism),
            sequential: Some(config.sequential),
            foreign_keywords: Some(config.foreign_keywords.clone()),
            native_id_prefix: Some(config.native_id_prefix.clone()),
            polling_rate_ms: Some(config.polling_rate_ms),
            log_level: Some(config.log_level.clone()),
        }
    }
}
