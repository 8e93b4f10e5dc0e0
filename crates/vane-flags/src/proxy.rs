// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag proxy (§4.10): a thin, name-plus-provider handle with no cached flag
//! state of its own. Every read goes back through [`FlagAccessor`] so a
//! proxy obtained once and read from repeatedly always reflects the latest
//! generation, including across an explicit-sync commit.
//!
//! [`record_access`] is the single accounting path both [`FlagProxy`] and
//! [`crate::client::FlagsClient`]'s direct variation methods funnel through,
//! so a read via either surface counts exactly once.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use vane_flags_core::{EvaluatedFlag, EvaluationContext, FeatureError, ImpressionEventType, Variant, VariationDetails};

use crate::events::EventEmitter;
use crate::metrics::MetricsAccumulator;
use crate::variation;

/// Backs a [`FlagProxy`]: resolves a flag by name and records the access.
/// Implemented by the client's shared inner state.
#[cfg_attr(test, mockall::automock)]
pub trait FlagAccessor: Send + Sync {
	fn lookup(&self, flag_name: &str) -> Option<EvaluatedFlag>;
	fn record_access(&self, flag_name: &str, flag: Option<&EvaluatedFlag>, event_type: ImpressionEventType, variant_name: Option<&str>);
}

/// The single accounting path: records the enabled/disabled count, the
/// variant count (if one was resolved), and — if the flag requests it —
/// emits an `impression` event. Called from [`FlagAccessor`] implementations
/// so every caller (proxy or direct client method) accounts identically.
/// Returns whether an impression was actually emitted, so the caller can
/// keep a lifetime impression count.
pub fn record_access(
	metrics: &MetricsAccumulator,
	emitter: &EventEmitter,
	context: &EvaluationContext,
	impression_data_all: bool,
	flag_name: &str,
	flag: Option<&EvaluatedFlag>,
	event_type: ImpressionEventType,
	variant_name: Option<&str>,
) -> bool {
	let Some(flag) = flag else {
		metrics.record_missing(flag_name);
		return false;
	};
	metrics.count_flag(flag_name, flag.enabled);
	if let Some(variant_name) = variant_name {
		metrics.count_variant(flag_name, variant_name);
	}
	metrics.maybe_impression(emitter, context, flag, event_type, impression_data_all)
}

fn resolved_variant_name(flag: &EvaluatedFlag) -> Option<&str> {
	if flag.variant.enabled && flag.variant.name != vane_flags_core::DISABLED_VARIANT_NAME {
		Some(&flag.variant.name)
	} else {
		None
	}
}

/// A name-bound handle onto the live flag cache. Cheap to create and to
/// clone; never holds a snapshot of the flag itself.
pub struct FlagProxy {
	flag_name: String,
	accessor: Arc<dyn FlagAccessor>,
}

impl FlagProxy {
	pub fn new(flag_name: impl Into<String>, accessor: Arc<dyn FlagAccessor>) -> Self {
		Self { flag_name: flag_name.into(), accessor }
	}

	pub fn name(&self) -> &str {
		&self.flag_name
	}

	pub fn exists(&self) -> bool {
		self.accessor.lookup(&self.flag_name).is_some()
	}

	/// `isEnabled`: records an `IsEnabled` access with no variant attribution.
	pub fn enabled(&self) -> bool {
		let flag = self.accessor.lookup(&self.flag_name);
		let enabled = flag.as_ref().map(|f| f.enabled).unwrap_or(false);
		self.accessor.record_access(&self.flag_name, flag.as_ref(), ImpressionEventType::IsEnabled, None);
		enabled
	}

	/// The resolved variant, or the synthetic disabled variant for a missing
	/// or disabled flag. Records a `GetVariant` access.
	pub fn variant(&self) -> Variant {
		let flag = self.accessor.lookup(&self.flag_name);
		let variant = flag.as_ref().map(|f| f.variant.clone()).unwrap_or_else(Variant::disabled);
		let variant_name = flag.as_ref().and_then(resolved_variant_name).map(str::to_string);
		self.accessor.record_access(&self.flag_name, flag.as_ref(), ImpressionEventType::GetVariant, variant_name.as_deref());
		variant
	}

	/// The resolved variant name, or `fallback` if the flag is missing,
	/// disabled, or its variant is the synthetic disabled variant.
	pub fn variation(&self, fallback: &str) -> String {
		let flag = self.accessor.lookup(&self.flag_name);
		let variant_name = flag.as_ref().and_then(resolved_variant_name).map(str::to_string);
		self.accessor.record_access(&self.flag_name, flag.as_ref(), ImpressionEventType::GetVariant, variant_name.as_deref());
		match (&flag, &variant_name) {
			(Some(f), Some(name)) if f.enabled => name.clone(),
			_ => fallback.to_string(),
		}
	}

	fn lookup_and_account(&self, event_type: ImpressionEventType) -> Option<EvaluatedFlag> {
		let flag = self.accessor.lookup(&self.flag_name);
		let variant_name = flag.as_ref().and_then(resolved_variant_name).map(str::to_string);
		self.accessor.record_access(&self.flag_name, flag.as_ref(), event_type, variant_name.as_deref());
		flag
	}

	pub fn bool_variation(&self, fallback: bool) -> bool {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::bool_variation(flag.as_ref(), fallback)
	}

	pub fn bool_variation_details(&self, fallback: bool) -> VariationDetails<bool> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::bool_details(flag.as_ref(), fallback)
	}

	pub fn bool_variation_or_throw(&self) -> Result<bool, FeatureError> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::bool_or_throw(flag.as_ref())
	}

	pub fn string_variation(&self, fallback: &str) -> String {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::string_variation(flag.as_ref(), fallback)
	}

	pub fn string_variation_details(&self, fallback: &str) -> VariationDetails<String> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::string_details(flag.as_ref(), fallback)
	}

	pub fn string_variation_or_throw(&self) -> Result<String, FeatureError> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::string_or_throw(flag.as_ref())
	}

	pub fn int_variation(&self, fallback: i64) -> i64 {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::int_variation(flag.as_ref(), fallback)
	}

	pub fn int_variation_details(&self, fallback: i64) -> VariationDetails<i64> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::int_details(flag.as_ref(), fallback)
	}

	pub fn int_variation_or_throw(&self) -> Result<i64, FeatureError> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::int_or_throw(flag.as_ref())
	}

	pub fn float_variation(&self, fallback: f64) -> f64 {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::float_variation(flag.as_ref(), fallback)
	}

	pub fn float_variation_details(&self, fallback: f64) -> VariationDetails<f64> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::float_details(flag.as_ref(), fallback)
	}

	pub fn float_variation_or_throw(&self) -> Result<f64, FeatureError> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::float_or_throw(flag.as_ref())
	}

	pub fn json_variation(&self, fallback: JsonValue) -> JsonValue {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::json_variation(flag.as_ref(), fallback)
	}

	pub fn json_variation_details(&self, fallback: JsonValue) -> VariationDetails<JsonValue> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::json_details(flag.as_ref(), fallback)
	}

	pub fn json_variation_or_throw(&self) -> Result<JsonValue, FeatureError> {
		let flag = self.lookup_and_account(ImpressionEventType::GetVariant);
		variation::json_or_throw(flag.as_ref())
	}
}

/// Batch management for multiple flag watchers (§4.11), mirroring the
/// ergonomics of subscribing to several flags under one disposable group.
pub struct WatchFlagGroup {
	name: String,
	tokens: Vec<(String, u64)>,
}

impl WatchFlagGroup {
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), tokens: Vec::new() }
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn size(&self) -> usize {
		self.tokens.len()
	}

	pub fn track(&mut self, event: impl Into<String>, token: u64) {
		self.tokens.push((event.into(), token));
	}

	pub fn unwatch_all(&mut self, emitter: &EventEmitter) {
		for (event, token) in self.tokens.drain(..) {
			emitter.off(&event, token);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;
	use vane_flags_core::{FlagGeneration, ValueType};

	struct FakeAccessor {
		flags: Mutex<FlagGeneration>,
		recorded: Mutex<Vec<(String, bool, Option<String>)>>,
	}

	impl FakeAccessor {
		fn new(flags: FlagGeneration) -> Self {
			Self { flags: Mutex::new(flags), recorded: Mutex::new(Vec::new()) }
		}
	}

	impl FlagAccessor for FakeAccessor {
		fn lookup(&self, flag_name: &str) -> Option<EvaluatedFlag> {
			self.flags.lock().unwrap().get(flag_name).cloned()
		}

		fn record_access(&self, flag_name: &str, flag: Option<&EvaluatedFlag>, _event_type: ImpressionEventType, variant_name: Option<&str>) {
			self.recorded.lock().unwrap().push((flag_name.to_string(), flag.is_some(), variant_name.map(str::to_string)));
		}
	}

	fn enabled_flag(name: &str) -> EvaluatedFlag {
		EvaluatedFlag {
			name: name.to_string(),
			enabled: true,
			variant: Variant { name: "on".to_string(), enabled: true, value: None },
			value_type: ValueType::None,
			version: 1,
			reason: None,
			impression_data: None,
		}
	}

	#[test]
	fn enabled_reads_through_accessor_and_records_once() {
		let mut gen = FlagGeneration::new();
		gen.insert("f".to_string(), enabled_flag("f"));
		let accessor = Arc::new(FakeAccessor::new(gen));
		let proxy = FlagProxy::new("f", accessor.clone());

		assert!(proxy.enabled());
		let recorded = accessor.recorded.lock().unwrap();
		assert_eq!(recorded.len(), 1);
		assert_eq!(recorded[0].2, None);
	}

	#[test]
	fn missing_flag_falls_back_and_records_as_missing() {
		let accessor = Arc::new(FakeAccessor::new(FlagGeneration::new()));
		let proxy = FlagProxy::new("missing", accessor.clone());

		assert!(!proxy.enabled());
		assert_eq!(proxy.variation("fallback"), "fallback");
		let recorded = accessor.recorded.lock().unwrap();
		assert!(recorded.iter().all(|(_, exists, _)| !exists));
	}

	#[test]
	fn variation_records_resolved_variant_name() {
		let mut gen = FlagGeneration::new();
		gen.insert("f".to_string(), enabled_flag("f"));
		let accessor = Arc::new(FakeAccessor::new(gen));
		let proxy = FlagProxy::new("f", accessor.clone());

		assert_eq!(proxy.variation("fallback"), "on");
		let recorded = accessor.recorded.lock().unwrap();
		assert_eq!(recorded[0].2, Some("on".to_string()));
	}

	#[test]
	fn proxy_reflects_live_updates_between_reads() {
		let accessor = Arc::new(FakeAccessor::new(FlagGeneration::new()));
		let proxy = FlagProxy::new("f", accessor.clone());
		assert!(!proxy.exists());

		accessor.flags.lock().unwrap().insert("f".to_string(), enabled_flag("f"));
		assert!(proxy.exists());
		assert!(proxy.enabled());
	}

	#[test]
	fn enabled_calls_lookup_then_records_exactly_once() {
		let mut accessor = MockFlagAccessor::new();
		accessor.expect_lookup().times(1).withf(|name| name == "f").returning(|_| Some(enabled_flag("f")));
		accessor
			.expect_record_access()
			.times(1)
			.withf(|name, flag, event_type, variant| {
				name == "f" && flag.is_some() && *event_type == ImpressionEventType::IsEnabled && variant.is_none()
			})
			.returning(|_, _, _, _| ());

		let proxy = FlagProxy::new("f", Arc::new(accessor));
		assert!(proxy.enabled());
	}

	#[test]
	fn missing_flag_records_access_with_none() {
		let mut accessor = MockFlagAccessor::new();
		accessor.expect_lookup().times(1).returning(|_| None);
		accessor.expect_record_access().times(1).withf(|_, flag, _, _| flag.is_none()).returning(|_, _, _, _| ());

		let proxy = FlagProxy::new("missing", Arc::new(accessor));
		assert!(!proxy.enabled());
	}

	#[test]
	fn watch_flag_group_tracks_and_unwatches() {
		let emitter = EventEmitter::new();
		let mut group = WatchFlagGroup::new("g");
		let token = emitter.on("flags.f.change", "", Arc::new(|_: &crate::events::EventArgs| {}));
		group.track("flags.f.change", token);
		assert_eq!(group.size(), 1);
		group.unwatch_all(&emitter);
		assert_eq!(group.size(), 0);
	}
}
