// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Variant name reserved for a flag that is absent from the active cache.
pub const MISSING_VARIANT_NAME: &str = "$missing";
/// Variant name reserved for a requested type that doesn't match the stored value type.
pub const TYPE_MISMATCH_VARIANT_NAME: &str = "$type-mismatch";
/// Variant name used when a flag exists but carries no variant of its own.
pub const DISABLED_VARIANT_NAME: &str = "$disabled";

/// The declared shape of a variant's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueType {
	None,
	Boolean,
	String,
	Number,
	Json,
}

impl Default for ValueType {
	fn default() -> Self {
		ValueType::None
	}
}

/// A raw variant value, one of the five value-type shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
	Bool(bool),
	Number(f64),
	String(String),
	Json(serde_json::Value),
}

/// The chosen output of an evaluation: a named bucket that may carry a typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
	pub name: String,
	#[serde(default)]
	pub enabled: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<VariantValue>,
}

impl Variant {
	/// The synthetic variant returned for a flag that has no variant of its own.
	pub fn disabled() -> Self {
		Self {
			name: DISABLED_VARIANT_NAME.to_string(),
			enabled: false,
			value: None,
		}
	}
}

impl Default for Variant {
	fn default() -> Self {
		Self::disabled()
	}
}

/// A flag whose targeting has already been resolved server-side into a variant.
///
/// The client never re-evaluates rules; it only stores and serves this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedFlag {
	pub name: String,
	#[serde(default)]
	pub enabled: bool,
	#[serde(default)]
	pub variant: Variant,
	#[serde(rename = "valueType", default)]
	pub value_type: ValueType,
	#[serde(default)]
	pub version: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(rename = "impressionData", default, skip_serializing_if = "Option::is_none")]
	pub impression_data: Option<bool>,
}

impl EvaluatedFlag {
	/// Equality used for diff purposes: enabled, version, variant name, variant
	/// enabled, and variant value. Reason/impression_data are not part of the
	/// change predicate.
	pub fn changed_from(&self, other: &EvaluatedFlag) -> bool {
		self.enabled != other.enabled
			|| self.version != other.version
			|| self.variant.name != other.variant.name
			|| self.variant.enabled != other.variant.enabled
			|| self.variant.value != other.variant.value
	}
}

/// A mapping from flag name to its evaluated flag: one complete generation.
pub type FlagGeneration = HashMap<String, EvaluatedFlag>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn disabled_variant_is_not_enabled() {
		assert!(!Variant::disabled().enabled);
		assert_eq!(Variant::disabled().name, DISABLED_VARIANT_NAME);
	}

	#[test]
	fn changed_from_detects_version_bump() {
		let a = EvaluatedFlag {
			name: "x".into(),
			enabled: true,
			variant: Variant::disabled(),
			value_type: ValueType::None,
			version: 1,
			reason: None,
			impression_data: None,
		};
		let mut b = a.clone();
		b.version = 2;
		assert!(b.changed_from(&a));
		assert!(!a.changed_from(&a));
	}

	#[test]
	fn changed_from_ignores_reason_and_impression_data() {
		let a = EvaluatedFlag {
			name: "x".into(),
			enabled: true,
			variant: Variant::disabled(),
			value_type: ValueType::None,
			version: 1,
			reason: Some("default".into()),
			impression_data: Some(false),
		};
		let mut b = a.clone();
		b.reason = Some("override".into());
		b.impression_data = Some(true);
		assert!(!b.changed_from(&a));
	}
}
