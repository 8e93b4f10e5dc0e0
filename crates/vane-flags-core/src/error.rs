// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Raised by `or-throw` variation facets for a missing flag, a type mismatch,
/// or a null value where one was required.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
	#[error("flag '{0}' not found")]
	NotFound(String),
	#[error("flag '{0}' is disabled")]
	Disabled(String),
	#[error("flag '{flag}' has no {expected} payload")]
	MissingPayload { flag: String, expected: &'static str },
	#[error("flag '{flag}' payload is not a valid {expected}")]
	InvalidPayload { flag: String, expected: &'static str },
}
