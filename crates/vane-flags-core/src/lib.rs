// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core data types for the Vane feature-flag client SDK.
//!
//! This crate holds the wire shapes and pure domain logic shared by the
//! `vane-flags` client: evaluation context, the evaluated-flag/variant model,
//! metrics bucket and impression-event shapes, and the variation-details
//! result type. It carries no I/O, no timers, and no targeting-rule
//! evaluation — the server has already resolved every flag into a variant by
//! the time any of these types are constructed.
//!
//! # Example
//!
//! ```
//! use vane_flags_core::{EvaluationContext, EvaluatedFlag, Variant, ValueType};
//!
//! let ctx = EvaluationContext::new()
//!     .with_user_id("user123")
//!     .with_property("plan", "enterprise");
//!
//! let flag = EvaluatedFlag {
//!     name: "checkout.new_flow".to_string(),
//!     enabled: true,
//!     variant: Variant { name: "treatment".to_string(), enabled: true, value: None },
//!     value_type: ValueType::None,
//!     version: 1,
//!     reason: None,
//!     impression_data: None,
//! };
//! assert!(flag.enabled);
//! assert!(ctx.user_id.is_some());
//! ```

pub mod context;
pub mod error;
pub mod flag;
pub mod metrics;
pub mod variation;

pub use context::{EvaluationContext, PropertyValue};
pub use error::FeatureError;
pub use flag::{
	EvaluatedFlag, FlagGeneration, ValueType, Variant, VariantValue, DISABLED_VARIANT_NAME,
	MISSING_VARIANT_NAME, TYPE_MISMATCH_VARIANT_NAME,
};
pub use metrics::{
	FlagCounts, ImpressionEvent, ImpressionEventType, MetricsBucket, MetricsPayload,
};
pub use variation::{type_mismatch_reason, VariationDetails, REASON_EVALUATED, REASON_FLAG_NOT_FOUND};
