// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Strict typed extraction: the pure value-extraction half of the variation
//! API (§4.9). These functions take an `Option<&EvaluatedFlag>` and a
//! fallback and return a [`VariationDetails`] or a [`FeatureError`] — they
//! perform no accounting. [`crate::proxy::FlagProxy`] and
//! [`crate::client::FlagsClient`] both route through this module so that a
//! single extraction implementation backs every call surface; accounting
//! happens once, in the caller, via the same `record_access` path regardless
//! of which facet was used.
//!
//! Extraction is keyed off the flag's *declared* `value_type`, not the
//! requested Rust type: calling `stringVariation` against a flag whose
//! `value_type` is `Number` is a type mismatch (fallback + reason string),
//! exactly as §8 property 5 requires. The one exception is `bool`: a flag
//! with `value_type: None` (the common plain on/off flag, carrying no typed
//! payload of its own) resolves a bool request from `enabled` rather than
//! treating it as a mismatch — see DESIGN.md's Open Question notes for why.

use serde_json::Value as JsonValue;
use vane_flags_core::{
	type_mismatch_reason, EvaluatedFlag, FeatureError, ValueType, VariantValue, VariationDetails,
	REASON_EVALUATED, REASON_FLAG_NOT_FOUND,
};

fn value_type_tag(vt: ValueType) -> &'static str {
	match vt {
		ValueType::None => "none",
		ValueType::Boolean => "boolean",
		ValueType::String => "string",
		ValueType::Number => "number",
		ValueType::Json => "json",
	}
}

fn not_found<T>(fallback: T) -> VariationDetails<T> {
	VariationDetails { value: fallback, reason: REASON_FLAG_NOT_FOUND.to_string(), flag_exists: false, enabled: false }
}

fn evaluated<T>(flag: &EvaluatedFlag, value: T) -> VariationDetails<T> {
	VariationDetails {
		value,
		reason: flag.reason.clone().unwrap_or_else(|| REASON_EVALUATED.to_string()),
		flag_exists: true,
		enabled: flag.enabled,
	}
}

fn mismatch<T>(flag: &EvaluatedFlag, expected: &str, fallback: T) -> VariationDetails<T> {
	VariationDetails {
		value: fallback,
		reason: type_mismatch_reason(expected, value_type_tag(flag.value_type)),
		flag_exists: true,
		enabled: flag.enabled,
	}
}

fn truthy_string(s: &str) -> bool {
	!s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false")
}

fn truthy_json(v: &JsonValue) -> bool {
	match v {
		JsonValue::Null => false,
		JsonValue::Bool(b) => *b,
		JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
		JsonValue::String(s) => truthy_string(s),
		JsonValue::Array(a) => !a.is_empty(),
		JsonValue::Object(o) => !o.is_empty(),
	}
}

// ------------------------------------------------------------------- bool

pub fn bool_details(flag: Option<&EvaluatedFlag>, fallback: bool) -> VariationDetails<bool> {
	let Some(flag) = flag else { return not_found(fallback) };
	match flag.value_type {
		ValueType::None => evaluated(flag, flag.enabled),
		ValueType::Boolean => {
			let value = match &flag.variant.value {
				Some(VariantValue::Bool(b)) => *b,
				Some(VariantValue::String(s)) => s.eq_ignore_ascii_case("true") || truthy_string(s),
				Some(VariantValue::Number(n)) => *n != 0.0,
				Some(VariantValue::Json(j)) => truthy_json(j),
				None => flag.enabled,
			};
			evaluated(flag, value)
		}
		_ => mismatch(flag, "boolean", fallback),
	}
}

pub fn bool_variation(flag: Option<&EvaluatedFlag>, fallback: bool) -> bool {
	bool_details(flag, fallback).value
}

pub fn bool_or_throw(flag: Option<&EvaluatedFlag>) -> Result<bool, FeatureError> {
	let flag = flag.ok_or_else(|| FeatureError::NotFound(String::new()))?;
	if !flag.enabled {
		return Err(FeatureError::Disabled(flag.name.clone()));
	}
	Ok(bool_details(Some(flag), false).value)
}

// ----------------------------------------------------------------- string

pub fn string_details(flag: Option<&EvaluatedFlag>, fallback: &str) -> VariationDetails<String> {
	let Some(flag) = flag else { return not_found(fallback.to_string()) };
	if flag.value_type != ValueType::String {
		return mismatch(flag, "string", fallback.to_string());
	}
	match &flag.variant.value {
		Some(VariantValue::String(s)) => evaluated(flag, s.clone()),
		Some(VariantValue::Bool(b)) => evaluated(flag, b.to_string()),
		Some(VariantValue::Number(n)) => evaluated(flag, format_number(*n)),
		Some(VariantValue::Json(j)) => evaluated(flag, j.to_string()),
		None => evaluated(flag, fallback.to_string()),
	}
}

pub fn string_variation(flag: Option<&EvaluatedFlag>, fallback: &str) -> String {
	string_details(flag, fallback).value
}

pub fn string_or_throw(flag: Option<&EvaluatedFlag>) -> Result<String, FeatureError> {
	let flag = flag.ok_or_else(|| FeatureError::NotFound(String::new()))?;
	if !flag.enabled {
		return Err(FeatureError::Disabled(flag.name.clone()));
	}
	if flag.value_type != ValueType::String || flag.variant.value.is_none() {
		return Err(FeatureError::MissingPayload { flag: flag.name.clone(), expected: "string" });
	}
	Ok(string_details(Some(flag), "").value)
}

// ----------------------------------------------------------------- number

fn format_number(n: f64) -> String {
	if n.fract() == 0.0 && n.abs() < 1e15 {
		format!("{}", n as i64)
	} else {
		n.to_string()
	}
}

fn extract_f64(value: &VariantValue) -> Option<f64> {
	match value {
		VariantValue::Number(n) => Some(*n),
		VariantValue::String(s) => s.trim().parse::<f64>().ok(),
		_ => None,
	}
}

pub fn float_details(flag: Option<&EvaluatedFlag>, fallback: f64) -> VariationDetails<f64> {
	let Some(flag) = flag else { return not_found(fallback) };
	if flag.value_type != ValueType::Number {
		return mismatch(flag, "number", fallback);
	}
	match flag.variant.value.as_ref().and_then(extract_f64) {
		Some(n) => evaluated(flag, n),
		None => evaluated(flag, fallback),
	}
}

pub fn float_variation(flag: Option<&EvaluatedFlag>, fallback: f64) -> f64 {
	float_details(flag, fallback).value
}

pub fn float_or_throw(flag: Option<&EvaluatedFlag>) -> Result<f64, FeatureError> {
	let flag = flag.ok_or_else(|| FeatureError::NotFound(String::new()))?;
	if !flag.enabled {
		return Err(FeatureError::Disabled(flag.name.clone()));
	}
	if flag.value_type != ValueType::Number {
		return Err(FeatureError::MissingPayload { flag: flag.name.clone(), expected: "number" });
	}
	match flag.variant.value.as_ref().and_then(extract_f64) {
		Some(n) => Ok(n),
		None => Err(FeatureError::InvalidPayload { flag: flag.name.clone(), expected: "number" }),
	}
}

pub fn int_details(flag: Option<&EvaluatedFlag>, fallback: i64) -> VariationDetails<i64> {
	let details = float_details(flag, fallback as f64);
	VariationDetails { value: details.value.round() as i64, reason: details.reason, flag_exists: details.flag_exists, enabled: details.enabled }
}

pub fn int_variation(flag: Option<&EvaluatedFlag>, fallback: i64) -> i64 {
	int_details(flag, fallback).value
}

pub fn int_or_throw(flag: Option<&EvaluatedFlag>) -> Result<i64, FeatureError> {
	float_or_throw(flag).map(|n| n.round() as i64)
}

// ------------------------------------------------------------------- json

pub fn json_details(flag: Option<&EvaluatedFlag>, fallback: JsonValue) -> VariationDetails<JsonValue> {
	let Some(flag) = flag else { return not_found(fallback) };
	if flag.value_type != ValueType::Json {
		return mismatch(flag, "json", fallback);
	}
	match &flag.variant.value {
		Some(VariantValue::Json(j)) => evaluated(flag, j.clone()),
		Some(VariantValue::String(s)) => match serde_json::from_str(s) {
			Ok(parsed) => evaluated(flag, parsed),
			Err(_) => evaluated(flag, fallback),
		},
		Some(VariantValue::Bool(b)) => evaluated(flag, JsonValue::Bool(*b)),
		Some(VariantValue::Number(n)) => evaluated(flag, serde_json::json!(n)),
		None => evaluated(flag, fallback),
	}
}

pub fn json_variation(flag: Option<&EvaluatedFlag>, fallback: JsonValue) -> JsonValue {
	json_details(flag, fallback).value
}

pub fn json_or_throw(flag: Option<&EvaluatedFlag>) -> Result<JsonValue, FeatureError> {
	let flag = flag.ok_or_else(|| FeatureError::NotFound(String::new()))?;
	if !flag.enabled {
		return Err(FeatureError::Disabled(flag.name.clone()));
	}
	if flag.value_type != ValueType::Json || flag.variant.value.is_none() {
		return Err(FeatureError::MissingPayload { flag: flag.name.clone(), expected: "JSON" });
	}
	match &flag.variant.value {
		Some(VariantValue::Json(j)) => Ok(j.clone()),
		Some(VariantValue::String(s)) => {
			serde_json::from_str(s).map_err(|_| FeatureError::InvalidPayload { flag: flag.name.clone(), expected: "JSON" })
		}
		Some(VariantValue::Bool(b)) => Ok(JsonValue::Bool(*b)),
		Some(VariantValue::Number(n)) => Ok(serde_json::json!(n)),
		None => unreachable!("checked above"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use vane_flags_core::Variant;

	fn flag_with(value_type: ValueType, value: Option<VariantValue>, enabled: bool) -> EvaluatedFlag {
		EvaluatedFlag {
			name: "f".to_string(),
			enabled,
			variant: Variant { name: "v".to_string(), enabled: true, value },
			value_type,
			version: 1,
			reason: None,
			impression_data: None,
		}
	}

	#[test]
	fn missing_flag_returns_fallback_with_not_found_reason() {
		let details = bool_details(None, true);
		assert_eq!(details.value, true);
		assert_eq!(details.reason, REASON_FLAG_NOT_FOUND);
		assert!(!details.flag_exists);
	}

	#[test]
	fn bool_with_no_declared_type_uses_enabled() {
		let flag = flag_with(ValueType::None, None, true);
		assert!(bool_variation(Some(&flag), false));
	}

	#[test]
	fn bool_accepts_true_string_case_insensitive() {
		let flag = flag_with(ValueType::Boolean, Some(VariantValue::String("TRUE".to_string())), true);
		assert!(bool_variation(Some(&flag), false));
	}

	#[test]
	fn bool_coerces_truthiness_for_non_bool_strings() {
		let flag = flag_with(ValueType::Boolean, Some(VariantValue::String("yes".to_string())), true);
		assert!(bool_variation(Some(&flag), false));
		let flag = flag_with(ValueType::Boolean, Some(VariantValue::String("".to_string())), true);
		assert!(!bool_variation(Some(&flag), true));
	}

	#[test]
	fn number_flag_rejects_bool_request() {
		let flag = flag_with(ValueType::Number, Some(VariantValue::Number(42.0)), true);
		let details = bool_details(Some(&flag), false);
		assert_eq!(details.reason, "type_mismatch:expected_boolean_got_number");
		assert_eq!(details.value, false);
	}

	#[test]
	fn int_variation_extracts_number() {
		let flag = flag_with(ValueType::Number, Some(VariantValue::Number(42.0)), true);
		assert_eq!(int_variation(Some(&flag), 0), 42);
	}

	#[test]
	fn string_variation_on_number_flag_is_type_mismatch() {
		let flag = flag_with(ValueType::Number, Some(VariantValue::Number(42.0)), true);
		let details = string_details(Some(&flag), "");
		assert_eq!(details.value, "");
		assert_eq!(details.reason, "type_mismatch:expected_string_got_number");
	}

	#[test]
	fn string_variation_coerces_number_to_text() {
		let flag = flag_with(ValueType::String, Some(VariantValue::Number(42.0)), true);
		// value_type says String but payload happens to be numeric JSON; declared
		// type wins, so this is NOT a mismatch — it's evaluated with coercion.
		assert_eq!(string_variation(Some(&flag), ""), "42");
	}

	#[test]
	fn json_variation_returns_object_as_is() {
		let obj = serde_json::json!({"a": 1});
		let flag = flag_with(ValueType::Json, Some(VariantValue::Json(obj.clone())), true);
		assert_eq!(json_variation(Some(&flag), JsonValue::Null), obj);
	}

	#[test]
	fn json_variation_parses_string_payload() {
		let flag = flag_with(ValueType::Json, Some(VariantValue::String(r#"{"a":1}"#.to_string())), true);
		assert_eq!(json_variation(Some(&flag), JsonValue::Null), serde_json::json!({"a": 1}));
	}

	#[test]
	fn json_variation_falls_back_on_unparseable_string() {
		let flag = flag_with(ValueType::Json, Some(VariantValue::String("not json".to_string())), true);
		assert_eq!(json_variation(Some(&flag), serde_json::json!(null)), serde_json::json!(null));
	}

	#[test]
	fn or_throw_raises_not_found_for_missing_flag() {
		assert!(matches!(bool_or_throw(None), Err(FeatureError::NotFound(_))));
	}

	#[test]
	fn or_throw_raises_disabled_for_disabled_flag() {
		let flag = flag_with(ValueType::None, None, false);
		assert!(matches!(bool_or_throw(Some(&flag)), Err(FeatureError::Disabled(_))));
	}

	#[test]
	fn string_or_throw_raises_missing_payload() {
		let flag = flag_with(ValueType::String, None, true);
		assert!(matches!(string_or_throw(Some(&flag)), Err(FeatureError::MissingPayload { .. })));
	}

	#[test]
	fn json_or_throw_raises_invalid_payload_on_bad_json_string() {
		let flag = flag_with(ValueType::Json, Some(VariantValue::String("nope".to_string())), true);
		assert!(matches!(json_or_throw(Some(&flag)), Err(FeatureError::InvalidPayload { .. })));
	}

	#[test]
	fn float_variation_parses_numeric_string() {
		let flag = flag_with(ValueType::Number, Some(VariantValue::String("3.5".to_string())), true);
		assert_eq!(float_variation(Some(&flag), 0.0), 3.5);
	}

	use proptest::prelude::*;

	proptest! {
		/// §8 property 5: requesting a number flag as a string always falls
		/// back and reports the exact mismatch reason, for any numeric payload.
		#[test]
		fn number_flag_read_as_string_is_always_a_mismatch(n in any::<f64>().prop_filter("finite", |n| n.is_finite())) {
			let flag = flag_with(ValueType::Number, Some(VariantValue::Number(n)), true);
			let details = string_details(Some(&flag), "fallback");
			prop_assert_eq!(details.value, "fallback");
			prop_assert_eq!(details.reason, "type_mismatch:expected_string_got_number");
		}

		/// §8 property 5, the json facet: a plain string-valued flag is never
		/// json-extractable regardless of payload contents.
		#[test]
		fn string_flag_read_as_json_is_always_a_mismatch(s in ".*") {
			let flag = flag_with(ValueType::String, Some(VariantValue::String(s)), true);
			let details = json_details(Some(&flag), serde_json::Value::Null);
			prop_assert_eq!(details.value, serde_json::Value::Null);
			prop_assert_eq!(details.reason, "type_mismatch:expected_json_got_string");
		}

		/// A boolean flag's int/float facets always mismatch, whatever the
		/// declared boolean payload.
		#[test]
		fn bool_flag_read_as_number_is_always_a_mismatch(b in any::<bool>()) {
			let flag = flag_with(ValueType::Boolean, Some(VariantValue::Bool(b)), true);
			let details = float_details(Some(&flag), 7.0);
			prop_assert_eq!(details.value, 7.0);
			prop_assert_eq!(details.reason, "type_mismatch:expected_number_got_boolean");
		}
	}
}
