//! Typed objects exchanged with the object-exchange service

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A converted domain object
///
/// `type_name` identifies the plugin type that produced or consumes it;
/// `application_id` is the cross-system identity that survives native index
/// reassignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeObject {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "applicationId", default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ExchangeObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            application_id: None,
            name: None,
            properties: serde_json::Value::Null,
            hash: None,
        }
    }

    pub fn with_application_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.application_id = if id.is_empty() { None } else { Some(id) };
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }

    /// Content hash over type, application id and properties
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.type_name.as_bytes());
        hasher.update([0u8]);
        if let Some(id) = &self.application_id {
            hasher.update(id.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.properties.to_string().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn generate_hash(&mut self) {
        self.hash = Some(self.content_hash());
    }
}
