// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Metrics accumulation and best-effort upload (§4.8).
//!
//! [`MetricsAccumulator`] is the single place every flag access funnels
//! through for counting; `count_flag`/`count_variant`/`record_missing` feed
//! the rotating bucket uploaded by [`upload`], and `maybe_impression` emits
//! the public `impression` event when a flag opts into impression tracking.
//! None of this ever blocks or fails a variation call — counting is
//! in-memory, and upload failures are reported through events, not errors.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use vane_flags_core::{
	EvaluatedFlag, EvaluationContext, FlagCounts, ImpressionEvent, ImpressionEventType, MetricsBucket,
	MetricsPayload,
};

use crate::config::ClientConfig;
use crate::events::{names, EventArgs, EventEmitter};
use crate::{SDK_NAME, SDK_VERSION};

fn new_bucket() -> MetricsBucket {
	let now = Utc::now();
	MetricsBucket { start: now, stop: now, flags: HashMap::new(), missing: HashMap::new() }
}

/// Accumulates usage counters between metrics uploads. Every method is a
/// cheap, non-blocking in-memory update.
pub struct MetricsAccumulator {
	bucket: Mutex<MetricsBucket>,
}

impl Default for MetricsAccumulator {
	fn default() -> Self {
		Self::new()
	}
}

impl MetricsAccumulator {
	pub fn new() -> Self {
		Self { bucket: Mutex::new(new_bucket()) }
	}

	pub fn record_missing(&self, flag_name: &str) {
		let mut bucket = self.bucket.lock().expect("metrics bucket poisoned");
		*bucket.missing.entry(flag_name.to_string()).or_insert(0) += 1;
	}

	pub fn count_flag(&self, flag_name: &str, enabled: bool) {
		let mut bucket = self.bucket.lock().expect("metrics bucket poisoned");
		let counts = bucket.flags.entry(flag_name.to_string()).or_insert_with(FlagCounts::default);
		if enabled {
			counts.yes += 1;
		} else {
			counts.no += 1;
		}
	}

	pub fn count_variant(&self, flag_name: &str, variant_name: &str) {
		let mut bucket = self.bucket.lock().expect("metrics bucket poisoned");
		if let Some(counts) = bucket.flags.get_mut(flag_name) {
			*counts.variants.entry(variant_name.to_string()).or_insert(0) += 1;
		}
	}

	/// Emits an `impression` event if `flag.impression_data` or
	/// `impression_data_all` requests it. Counting (`count_flag`/
	/// `count_variant`) is the caller's responsibility via
	/// [`crate::proxy::record_access`] — this only decides whether to emit
	/// telemetry for the access that already happened. Returns whether an
	/// impression was actually emitted, so callers can keep a lifetime count.
	pub fn maybe_impression(
		&self,
		emitter: &EventEmitter,
		context: &EvaluationContext,
		flag: &EvaluatedFlag,
		event_type: ImpressionEventType,
		impression_data_all: bool,
	) -> bool {
		let should_track = impression_data_all || flag.impression_data.unwrap_or(false);
		if !should_track {
			return false;
		}

		let variant_name = if flag.variant.enabled && flag.variant.name != vane_flags_core::DISABLED_VARIANT_NAME {
			Some(flag.variant.name.clone())
		} else {
			None
		};

		let event = ImpressionEvent {
			event_type,
			event_id: Uuid::new_v4().to_string(),
			context: context.clone(),
			enabled: flag.enabled,
			feature_name: flag.name.clone(),
			impression_data: true,
			variant_name,
			reason: flag.reason.clone(),
		};
		emitter.emit_args(names::IMPRESSION, EventArgs::one(event));
		true
	}

	/// Swaps in a fresh, empty bucket and returns the one that was
	/// accumulated since the last rotation.
	pub fn rotate(&self) -> MetricsBucket {
		let mut bucket = self.bucket.lock().expect("metrics bucket poisoned");
		let drained = std::mem::replace(&mut *bucket, new_bucket());
		bucket.start = drained.stop;
		MetricsBucket { stop: Utc::now(), ..drained }
	}
}

/// Uploads `bucket` to `{apiUrl}/client/metrics`, retrying transient
/// failures twice (2s, then 4s) before giving up. A 4xx other than 408/429
/// is treated as permanent and not retried.
pub async fn upload(
	http: &reqwest::Client,
	config: &ClientConfig,
	connection_id: &str,
	bucket: MetricsBucket,
) -> Result<(), String> {
	let base = config.api_url.trim_end_matches('/');
	let payload = MetricsPayload {
		app_name: config.app_name.clone(),
		environment: config.environment.clone(),
		sdk_name: SDK_NAME.to_string(),
		sdk_version: SDK_VERSION.to_string(),
		connection_id: connection_id.to_string(),
		bucket,
	};

	const MAX_RETRIES: u32 = 2;
	let mut last_error = String::new();

	let headers = crate::fetch::common_headers(config, connection_id);

	for attempt in 0..=MAX_RETRIES {
		let request = http.post(format!("{base}/client/metrics")).headers(headers.clone());
		let response = request.json(&payload).send().await;

		match response {
			Ok(resp) if resp.status().is_success() => return Ok(()),
			Ok(resp) => {
				let status = resp.status().as_u16();
				last_error = format!("metrics upload failed with status {status}");
				if (400..500).contains(&status) && status != 408 && status != 429 {
					break;
				}
			}
			Err(e) => {
				last_error = e.to_string();
			}
		}

		if attempt < MAX_RETRIES {
			tokio::time::sleep(Duration::from_secs(1 << (attempt + 1))).await;
		}
	}

	Err(last_error)
}

#[cfg(test)]
mod tests {
	use super::*;
	use vane_flags_core::{ValueType, Variant};

	fn flag(name: &str, impression_data: Option<bool>) -> EvaluatedFlag {
		EvaluatedFlag {
			name: name.to_string(),
			enabled: true,
			variant: Variant { name: "on".to_string(), enabled: true, value: None },
			value_type: ValueType::None,
			version: 1,
			reason: None,
			impression_data,
		}
	}

	#[test]
	fn count_flag_accumulates_yes_no() {
		let acc = MetricsAccumulator::new();
		acc.count_flag("f", true);
		acc.count_flag("f", true);
		acc.count_flag("f", false);
		let bucket = acc.rotate();
		let counts = &bucket.flags["f"];
		assert_eq!(counts.yes, 2);
		assert_eq!(counts.no, 1);
	}

	#[test]
	fn count_variant_only_applies_to_known_flag() {
		let acc = MetricsAccumulator::new();
		acc.count_variant("never-counted", "a");
		acc.count_flag("f", true);
		acc.count_variant("f", "a");
		let bucket = acc.rotate();
		assert!(!bucket.flags.contains_key("never-counted"));
		assert_eq!(bucket.flags["f"].variants["a"], 1);
	}

	#[test]
	fn record_missing_accumulates_per_flag() {
		let acc = MetricsAccumulator::new();
		acc.record_missing("ghost");
		acc.record_missing("ghost");
		let bucket = acc.rotate();
		assert_eq!(bucket.missing["ghost"], 2);
	}

	#[test]
	fn rotate_returns_empty_bucket_after_drain() {
		let acc = MetricsAccumulator::new();
		acc.count_flag("f", true);
		acc.rotate();
		let second = acc.rotate();
		assert!(second.is_empty());
	}

	#[test]
	fn maybe_impression_skips_when_not_requested() {
		let acc = MetricsAccumulator::new();
		let emitter = EventEmitter::new();
		let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.on(
			names::IMPRESSION,
			"",
			std::sync::Arc::new(move |_: &EventArgs| {
				count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			}),
		);
		acc.maybe_impression(&emitter, &EvaluationContext::default(), &flag("f", None), ImpressionEventType::IsEnabled, false);
		assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
	}

	#[test]
	fn maybe_impression_fires_when_flag_requests_it() {
		let acc = MetricsAccumulator::new();
		let emitter = EventEmitter::new();
		let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.on(
			names::IMPRESSION,
			"",
			std::sync::Arc::new(move |_: &EventArgs| {
				count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			}),
		);
		acc.maybe_impression(
			&emitter,
			&EvaluationContext::default(),
			&flag("f", Some(true)),
			ImpressionEventType::IsEnabled,
			false,
		);
		assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
	}

	#[test]
	fn maybe_impression_fires_for_impression_data_all() {
		let acc = MetricsAccumulator::new();
		let emitter = EventEmitter::new();
		let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.on(
			names::IMPRESSION,
			"",
			std::sync::Arc::new(move |_: &EventArgs| {
				count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			}),
		);
		acc.maybe_impression(&emitter, &EvaluationContext::default(), &flag("f", None), ImpressionEventType::GetVariant, true);
		assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
	}
}
