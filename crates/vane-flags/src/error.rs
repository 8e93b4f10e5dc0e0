// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error taxonomy for the client.
//!
//! No error raised from the I/O paths (fetch, streaming, metrics) ever
//! reaches the caller synchronously — they are surfaced as events instead.
//! Only configuration errors (rejected before `start()`) and `*_or_throw`
//! variation errors are ever returned from a method call.

use vane_flags_core::FeatureError;

pub type Result<T> = std::result::Result<T, FlagsError>;

/// Top-level error type. Configuration errors are fatal to `build()`;
/// fetch/streaming/metrics errors are carried in events only and never
/// constructed as a return value from the public API, except where noted.
#[derive(thiserror::Error, Debug)]
pub enum FlagsError {
	/// Raised by the config validator before any network activity.
	#[error("invalid configuration: {0}")]
	Config(String),

	/// Transport or HTTP-level fetch failure. Retriable unless the status is
	/// in the configured non-retryable set.
	#[error("fetch failed: {0}")]
	Fetch(String),

	/// Streaming transport failure; always triggers reconnection.
	#[error("streaming error: {0}")]
	Streaming(String),

	/// Metrics upload failure. Never affects cache correctness.
	#[error("metrics upload failed: {0}")]
	Metrics(String),

	/// Missing flag, type mismatch, or null value on an `or_throw` variation.
	#[error(transparent)]
	Feature(#[from] FeatureError),

	#[error("storage error: {0}")]
	Storage(String),
}

impl FlagsError {
	pub fn config(msg: impl Into<String>) -> Self {
		FlagsError::Config(msg.into())
	}
}
