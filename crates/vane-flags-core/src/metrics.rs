// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::EvaluationContext;

/// Per-flag yes/no plus per-variant counters accumulated within one bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagCounts {
	pub yes: u64,
	pub no: u64,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub variants: HashMap<String, u64>,
}

/// A rotating window of accumulated usage counters, drained by the metrics
/// upload task every `metrics_interval`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsBucket {
	pub start: DateTime<Utc>,
	pub stop: DateTime<Utc>,
	pub flags: HashMap<String, FlagCounts>,
	pub missing: HashMap<String, u64>,
}

impl MetricsBucket {
	/// True when there is nothing worth uploading.
	pub fn is_empty(&self) -> bool {
		self.flags.is_empty() && self.missing.is_empty()
	}
}

/// The wire body posted to the metrics endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsPayload {
	#[serde(rename = "appName")]
	pub app_name: String,
	pub environment: String,
	#[serde(rename = "sdkName")]
	pub sdk_name: String,
	#[serde(rename = "sdkVersion")]
	pub sdk_version: String,
	#[serde(rename = "connectionId")]
	pub connection_id: String,
	pub bucket: MetricsBucket,
}

/// The kind of access that produced an [`ImpressionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImpressionEventType {
	IsEnabled,
	GetVariant,
}

/// A record that the application read a specific flag's value under a specific
/// context, uploaded out-of-band as telemetry (best-effort, never blocks reads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpressionEvent {
	pub event_type: ImpressionEventType,
	pub event_id: String,
	pub context: EvaluationContext,
	pub enabled: bool,
	pub feature_name: String,
	pub impression_data: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub variant_name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_bucket_has_no_flags_or_missing() {
		let bucket = MetricsBucket {
			start: Utc::now(),
			stop: Utc::now(),
			flags: HashMap::new(),
			missing: HashMap::new(),
		};
		assert!(bucket.is_empty());
	}

	#[test]
	fn bucket_with_missing_flag_is_not_empty() {
		let mut missing = HashMap::new();
		missing.insert("nonexistent".to_string(), 1);
		let bucket = MetricsBucket {
			start: Utc::now(),
			stop: Utc::now(),
			flags: HashMap::new(),
			missing,
		};
		assert!(!bucket.is_empty());
	}
}
