//! data structures for deserializing incoming alerts
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnError};

/// status of an alert group or a single alert
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
	Firing,
	Resolved,
	#[default]
	Unknown,
	/// any other status string, passed through as received
	#[serde(untagged)]
	Other(String),
}

impl AlertStatus {
	pub fn as_str(&self) -> &str {
		match self {
			AlertStatus::Firing => "firing",
			AlertStatus::Resolved => "resolved",
			AlertStatus::Unknown => "unknown",
			AlertStatus::Other(status) => status.as_str(),
		}
	}
}

impl std::fmt::Display for AlertStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

// Every field falls back to its default if it is null or has an unexpected
// type. Only scalar json bodies are rejected.

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
/// data from prometheus received by the alertmanager webhook receiver
#[allow(clippy::missing_docs_in_private_items)]
pub struct AlertBatch {
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub version: Option<String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub group_key: Option<String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub receiver: Option<String>,

	#[serde_as(deserialize_as = "DefaultOnError")]
	pub status: AlertStatus,
	#[serde_as(deserialize_as = "DefaultOnError<Vec<DefaultOnError>>")]
	pub alerts: Vec<Alert>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub group_labels: HashMap<String, String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub common_labels: HashMap<String, String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub common_annotations: HashMap<String, String>,
	#[serde(rename = "externalURL")]
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub external_url: String,
}

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::missing_docs_in_private_items)]
pub struct Alert {
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub status: Option<AlertStatus>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub labels: HashMap<String, String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub annotations: HashMap<String, String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub starts_at: Option<DateTime<Utc>>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub ends_at: Option<DateTime<Utc>>,
	#[serde(rename = "generatorURL")]
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub generator_url: Option<String>,
	#[serde_as(deserialize_as = "DefaultOnError")]
	pub fingerprint: Option<String>,
}

impl Alert {
	/// label value or an empty string if the label is absent
	pub fn label(&self, key: &str) -> &str {
		self.labels.get(key).map(String::as_str).unwrap_or_default()
	}

	/// annotation value or an empty string if the annotation is absent
	pub fn annotation(&self, key: &str) -> &str {
		self.annotations.get(key).map(String::as_str).unwrap_or_default()
	}
}
