// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// The result of a `*_variation_details` call: the extracted value plus enough
/// context to explain how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationDetails<T> {
	pub value: T,
	pub reason: String,
	pub flag_exists: bool,
	pub enabled: bool,
}

/// Reason string for a details result when the flag exists and the requested
/// type matched the stored value type.
pub const REASON_EVALUATED: &str = "evaluated";
/// Reason string for a details result when the flag is absent from the active slot.
pub const REASON_FLAG_NOT_FOUND: &str = "flag_not_found";

/// Builds the `type_mismatch:expected_X_got_Y` reason string used by details facets.
pub fn type_mismatch_reason(expected: &str, got: &str) -> String {
	format!("type_mismatch:expected_{expected}_got_{got}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn type_mismatch_reason_format() {
		assert_eq!(
			type_mismatch_reason("string", "number"),
			"type_mismatch:expected_string_got_number"
		);
	}
}
