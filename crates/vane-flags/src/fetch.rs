// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Conditional HTTP fetch engine (§4.5): builds the GET/POST request for
//! `/client/features`, classifies the response, and computes the backoff
//! delay for the next poll. Owns no client state — [`crate::client::FlagsClient`]
//! drives the cache, storage, and event emission around it.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

use vane_flags_core::{EvaluatedFlag, EvaluationContext, FlagGeneration, PropertyValue};

use crate::config::{ClientConfig, FetchRetryOptions};
use crate::{SDK_NAME, SDK_VERSION};

/// The outcome of one fetch attempt that completed without a transport error.
pub enum FetchOutcome {
	/// Server replied 304; the caller's cached generation is still current.
	NotModified,
	/// Server replied with a fresh flag generation and (usually) a new ETag.
	Updated { flags: FlagGeneration, etag: Option<String> },
}

/// A fetch attempt that failed, either at the transport level or with a
/// non-2xx/304 status.
#[derive(Debug, Clone)]
pub struct FetchFailure {
	pub status: Option<u16>,
	pub message: String,
}

impl FetchFailure {
	pub fn transport(message: impl Into<String>) -> Self {
		Self { status: None, message: message.into() }
	}

	pub fn status(status: u16, message: impl Into<String>) -> Self {
		Self { status: Some(status), message: message.into() }
	}

	/// A non-retryable failure (§4.3/§4.5) halts polling entirely rather than
	/// scheduling another attempt with backoff.
	pub fn is_non_retryable(&self, retry: &FetchRetryOptions) -> bool {
		match self.status {
			Some(status) => retry.non_retryable_status_codes.contains(&status),
			None => false,
		}
	}
}

#[derive(Deserialize)]
struct FetchResponseBody {
	data: FetchResponseData,
}

#[derive(Deserialize)]
struct FetchResponseData {
	#[serde(default)]
	flags: Vec<EvaluatedFlag>,
}

fn property_to_string(value: &PropertyValue) -> String {
	match value {
		PropertyValue::String(s) => s.clone(),
		PropertyValue::Number(n) => n.to_string(),
		PropertyValue::Boolean(b) => b.to_string(),
	}
}

pub(crate) fn context_query_string(context: &EvaluationContext, app_name: &str, environment: &str) -> String {
	let mut params = Vec::new();
	params.push(format!("appName={}", urlencoding_encode(app_name)));
	params.push(format!("environment={}", urlencoding_encode(environment)));
	if let Some(user_id) = &context.user_id {
		params.push(format!("userId={}", urlencoding_encode(user_id)));
	}
	if let Some(session_id) = &context.session_id {
		params.push(format!("sessionId={}", urlencoding_encode(session_id)));
	}
	if let Some(current_time) = &context.current_time {
		params.push(format!("currentTime={}", urlencoding_encode(current_time)));
	}
	for (key, value) in &context.properties {
		params.push(format!("properties[{}]={}", urlencoding_encode(key), urlencoding_encode(&property_to_string(value))));
	}
	params.join("&")
}

/// Minimal percent-encoding for query-string components; avoids pulling in a
/// second URL-encoding crate when `url`'s own form-encoding isn't exposed for
/// this shape of ad hoc query building.
fn urlencoding_encode(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for byte in value.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}
	out
}

fn context_body(context: &EvaluationContext, app_name: &str, environment: &str) -> serde_json::Value {
	let mut body = serde_json::Map::new();
	body.insert("appName".to_string(), serde_json::Value::String(app_name.to_string()));
	body.insert("environment".to_string(), serde_json::Value::String(environment.to_string()));
	if let Some(user_id) = &context.user_id {
		body.insert("userId".to_string(), serde_json::Value::String(user_id.clone()));
	}
	if let Some(session_id) = &context.session_id {
		body.insert("sessionId".to_string(), serde_json::Value::String(session_id.clone()));
	}
	if let Some(current_time) = &context.current_time {
		body.insert("currentTime".to_string(), serde_json::Value::String(current_time.clone()));
	}
	if !context.properties.is_empty() {
		let props = serde_json::to_value(&context.properties).unwrap_or(serde_json::Value::Null);
		body.insert("properties".to_string(), props);
	}
	serde_json::Value::Object(body)
}

pub(crate) fn common_headers(config: &ClientConfig, connection_id: &str) -> HeaderMap {
	let mut headers = HeaderMap::new();
	headers.insert("X-API-Token", HeaderValue::from_str(&config.api_token).unwrap_or(HeaderValue::from_static("")));
	headers.insert("X-Application-Name", HeaderValue::from_str(&config.app_name).unwrap_or(HeaderValue::from_static("")));
	headers.insert("X-Connection-Id", HeaderValue::from_str(connection_id).unwrap_or(HeaderValue::from_static("")));
	headers.insert("X-SDK-Version", HeaderValue::from_str(&format!("{SDK_NAME}/{SDK_VERSION}")).unwrap());
	headers.insert("X-Environment", HeaderValue::from_str(&config.environment).unwrap_or(HeaderValue::from_static("")));
	for (key, value) in &config.custom_headers {
		if let (Ok(name), Ok(val)) = (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(value)) {
			headers.insert(name, val);
		}
	}
	headers
}

/// Runs one conditional fetch attempt. `etag`, when present, is sent as
/// `If-None-Match` so an unchanged generation costs a 304 instead of a full
/// payload.
pub async fn fetch_flags(
	http: &reqwest::Client,
	config: &ClientConfig,
	connection_id: &str,
	etag: Option<&str>,
) -> Result<FetchOutcome, FetchFailure> {
	let base = config.api_url.trim_end_matches('/');
	let mut headers = common_headers(config, connection_id);
	if let Some(etag) = etag {
		headers.insert("If-None-Match", HeaderValue::from_str(etag).map_err(|e| FetchFailure::transport(e.to_string()))?);
	}

	let request = if config.use_post_requests {
		let body = context_body(&config.context, &config.app_name, &config.environment);
		http.post(format!("{base}/client/features")).headers(headers).json(&body)
	} else {
		let qs = context_query_string(&config.context, &config.app_name, &config.environment);
		http.get(format!("{base}/client/features?{qs}")).headers(headers)
	};

	let response = request.send().await.map_err(|e| FetchFailure::transport(e.to_string()))?;

	if response.status().as_u16() == 304 {
		return Ok(FetchOutcome::NotModified);
	}

	if !response.status().is_success() {
		let status = response.status().as_u16();
		let message = response.text().await.unwrap_or_default();
		return Err(FetchFailure::status(status, message));
	}

	let etag = response.headers().get(reqwest::header::ETAG).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
	let body: FetchResponseBody = response.json().await.map_err(|e| FetchFailure::transport(e.to_string()))?;

	let mut flags = FlagGeneration::new();
	for flag in body.data.flags {
		flags.insert(flag.name.clone(), flag);
	}

	Ok(FetchOutcome::Updated { flags, etag })
}

/// §4.5 backoff: `min(initial * 2^(failures-1), max)` once failures > 0,
/// otherwise the configured refresh interval.
pub fn next_refresh_delay(retry: &FetchRetryOptions, refresh_interval: Duration, consecutive_failures: u32) -> Duration {
	if consecutive_failures == 0 {
		return refresh_interval;
	}
	let shift = consecutive_failures.saturating_sub(1).min(32);
	let scaled = retry.initial_backoff_ms.saturating_mul(1u64 << shift);
	Duration::from_millis(scaled.min(retry.max_backoff_ms))
}
