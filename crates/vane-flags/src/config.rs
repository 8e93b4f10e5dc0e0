// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration surface and pre-start validation.
//!
//! [`validate`] runs once before any network activity and rejects malformed
//! configuration with [`FlagsError::Config`]. No timer, request, or
//! connection is ever created from an unvalidated config.

use std::collections::HashMap;
use std::time::Duration;

use vane_flags_core::EvaluationContext;

use crate::error::{FlagsError, Result};

/// Retry/backoff configuration for fetch requests.
#[derive(Debug, Clone)]
pub struct FetchRetryOptions {
	pub non_retryable_status_codes: Vec<u16>,
	pub initial_backoff_ms: u64,
	pub max_backoff_ms: u64,
}

impl Default for FetchRetryOptions {
	fn default() -> Self {
		Self {
			non_retryable_status_codes: vec![401, 403],
			initial_backoff_ms: 1_000,
			max_backoff_ms: 60_000,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingTransport {
	Sse,
	WebSocket,
}

#[derive(Debug, Clone)]
pub struct SseStreamingConfig {
	pub url: Option<String>,
	pub reconnect_base: Duration,
	pub reconnect_max: Duration,
}

impl Default for SseStreamingConfig {
	fn default() -> Self {
		Self { url: None, reconnect_base: Duration::from_secs(1), reconnect_max: Duration::from_secs(30) }
	}
}

#[derive(Debug, Clone)]
pub struct WebSocketStreamingConfig {
	pub url: Option<String>,
	pub reconnect_base: Duration,
	pub reconnect_max: Duration,
	pub ping_interval: Duration,
}

impl Default for WebSocketStreamingConfig {
	fn default() -> Self {
		Self {
			url: None,
			reconnect_base: Duration::from_secs(1),
			reconnect_max: Duration::from_secs(30),
			ping_interval: Duration::from_secs(30),
		}
	}
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
	pub enabled: bool,
	pub transport: StreamingTransport,
	pub sse: SseStreamingConfig,
	pub ws: WebSocketStreamingConfig,
}

impl Default for StreamingConfig {
	fn default() -> Self {
		Self { enabled: false, transport: StreamingTransport::Sse, sse: Default::default(), ws: Default::default() }
	}
}

/// The full configuration surface recognized by the client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	// Required
	pub api_url: String,
	pub api_token: String,
	pub app_name: String,
	pub environment: String,

	// Context
	pub context: EvaluationContext,

	// Advanced
	pub custom_headers: HashMap<String, String>,
	pub offline_mode: bool,
	pub enable_dev_mode: bool,
	pub cache_key_prefix: String,

	// Polling / refresh
	pub refresh_interval: Duration,
	pub disable_refresh: bool,
	pub use_post_requests: bool,
	pub fetch_retry_options: FetchRetryOptions,

	// Metrics
	pub disable_metrics: bool,
	pub disable_stats: bool,
	pub impression_data_all: bool,
	pub metrics_interval: Duration,
	pub metrics_interval_initial: Duration,

	// Explicit sync / bootstrap
	pub explicit_sync_mode: bool,
	pub bootstrap: Vec<vane_flags_core::EvaluatedFlag>,
	pub bootstrap_override: bool,

	// Streaming
	pub streaming: StreamingConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			api_url: String::new(),
			api_token: String::new(),
			app_name: String::new(),
			environment: String::new(),
			context: EvaluationContext::default(),
			custom_headers: HashMap::new(),
			offline_mode: false,
			enable_dev_mode: false,
			cache_key_prefix: "vane_cache".to_string(),
			refresh_interval: Duration::from_secs(30),
			disable_refresh: false,
			use_post_requests: false,
			fetch_retry_options: FetchRetryOptions::default(),
			disable_metrics: false,
			disable_stats: false,
			impression_data_all: false,
			metrics_interval: Duration::from_secs(60),
			metrics_interval_initial: Duration::from_secs(2),
			explicit_sync_mode: false,
			bootstrap: Vec::new(),
			bootstrap_override: true,
			streaming: StreamingConfig::default(),
		}
	}
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(FlagsError::config(format!("{field} must not be empty")));
	}
	Ok(())
}

fn no_surrounding_whitespace(value: &str, field: &str) -> Result<()> {
	if value != value.trim() {
		return Err(FlagsError::config(format!("{field} must not have surrounding whitespace")));
	}
	Ok(())
}

fn validate_range_secs(value: Duration, field: &str, min: u64, max: u64) -> Result<()> {
	let secs = value.as_secs_f64();
	if secs < min as f64 || secs > max as f64 {
		return Err(FlagsError::config(format!(
			"{field} must be within [{min}, {max}] seconds, got {secs}"
		)));
	}
	Ok(())
}

fn validate_range_ms(value: u64, field: &str, min: u64, max: u64) -> Result<()> {
	if value < min || value > max {
		return Err(FlagsError::config(format!("{field} must be within [{min}, {max}] ms, got {value}")));
	}
	Ok(())
}

/// Validates `config` against every rule in §4.3, failing closed on the
/// first violation encountered.
pub fn validate(config: &ClientConfig) -> Result<()> {
	require_non_empty(&config.api_url, "apiUrl")?;
	require_non_empty(&config.api_token, "apiToken")?;
	require_non_empty(&config.app_name, "appName")?;
	require_non_empty(&config.environment, "environment")?;

	let parsed = url::Url::parse(&config.api_url)
		.map_err(|e| FlagsError::config(format!("apiUrl is not a valid URL: {e}")))?;
	if parsed.scheme() != "http" && parsed.scheme() != "https" {
		return Err(FlagsError::config(format!(
			"apiUrl scheme must be http or https, got {}",
			parsed.scheme()
		)));
	}

	no_surrounding_whitespace(&config.api_url, "apiUrl")?;
	no_surrounding_whitespace(&config.api_token, "apiToken")?;

	if config.cache_key_prefix.chars().count() > 100 {
		return Err(FlagsError::config("cacheKeyPrefix must be <= 100 characters"));
	}

	validate_range_secs(config.refresh_interval, "refreshInterval", 1, 86_400)?;
	validate_range_secs(config.metrics_interval, "metricsInterval", 1, 86_400)?;
	validate_range_secs(config.metrics_interval_initial, "metricsIntervalInitial", 0, 3_600)?;

	let retry = &config.fetch_retry_options;
	validate_range_ms(retry.initial_backoff_ms, "initialBackoffMs", 100, 60_000)?;
	validate_range_ms(retry.max_backoff_ms, "maxBackoffMs", 1_000, 600_000)?;
	if retry.initial_backoff_ms > retry.max_backoff_ms {
		return Err(FlagsError::config(format!(
			"initialBackoffMs ({}) must be <= maxBackoffMs ({})",
			retry.initial_backoff_ms, retry.max_backoff_ms
		)));
	}
	for code in &retry.non_retryable_status_codes {
		if !(400..=599).contains(code) {
			return Err(FlagsError::config(format!(
				"nonRetryableStatusCodes contains invalid status code: {code} (must be 400-599)"
			)));
		}
	}

	Ok(())
}
