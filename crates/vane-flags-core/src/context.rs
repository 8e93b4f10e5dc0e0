// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A scalar property value attached to an evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
	String(String),
	Number(f64),
	Boolean(bool),
}

impl std::fmt::Display for PropertyValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			PropertyValue::String(s) => write!(f, "{s}"),
			PropertyValue::Number(n) => write!(f, "{n}"),
			PropertyValue::Boolean(b) => write!(f, "{b}"),
		}
	}
}

/// The identity and attributes used by the server to pick a variant.
///
/// Never mutated in place once handed to the fetch engine; replaced wholesale
/// by context updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationContext {
	#[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(rename = "currentTime", default, skip_serializing_if = "Option::is_none")]
	pub current_time: Option<String>,
	#[serde(default, skip_serializing_if = "HashMap::is_empty")]
	pub properties: HashMap<String, PropertyValue>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	pub fn with_current_time(mut self, current_time: impl Into<String>) -> Self {
		self.current_time = Some(current_time.into());
		self
	}

	pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
		self.properties.insert(key.into(), value.into());
		self
	}
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		PropertyValue::String(value.to_string())
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		PropertyValue::String(value)
	}
}

impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		PropertyValue::Number(value)
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		PropertyValue::Boolean(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_sets_fields() {
		let ctx = EvaluationContext::new()
			.with_user_id("u1")
			.with_session_id("s1")
			.with_property("plan", "pro");

		assert_eq!(ctx.user_id.as_deref(), Some("u1"));
		assert_eq!(ctx.session_id.as_deref(), Some("s1"));
		assert_eq!(ctx.properties.get("plan"), Some(&PropertyValue::String("pro".into())));
	}

	#[test]
	fn default_context_has_no_identity() {
		let ctx = EvaluationContext::default();
		assert!(ctx.user_id.is_none());
		assert!(ctx.properties.is_empty());
	}
}
