// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side feature-flag evaluation cache for Vane.
//!
//! This crate fronts a remote flag-evaluation service: it polls (or
//! streams) pre-evaluated flags for the current context, caches them,
//! serves synchronous typed lookups, diffs each new generation against the
//! last one to fire per-flag change notifications, and reports aggregated
//! usage back to the server as best-effort telemetry. It never evaluates
//! targeting rules itself — the server has already resolved every flag into
//! a variant by the time this crate sees it.
//!
//! # Example
//!
//! ```ignore
//! use vane_flags::FlagsClient;
//! use vane_flags_core::EvaluationContext;
//!
//! #[tokio::main]
//! async fn main() -> vane_flags::Result<()> {
//!     let client = FlagsClient::builder()
//!         .api_url("https://flags.example.com")
//!         .api_token("server-token")
//!         .app_name("checkout")
//!         .environment("production")
//!         .context(EvaluationContext::new().with_user_id("user-123"))
//!         .build()
//!         .await?;
//!
//!     client.start().await;
//!
//!     let enabled = client.is_enabled("checkout.new_flow");
//!     let theme = client.string_variation("ui.theme", "light");
//!
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
pub mod config;
mod diff;
mod error;
pub mod events;
pub mod fetch;
pub mod metrics;
pub mod proxy;
pub mod storage;
pub mod streaming;
pub mod variation;

pub use cache::FlagCache;
pub use client::{ClientStats, FeatureStats, FlagsClient, FlagsClientBuilder};
pub use error::{FlagsError, Result};
pub use events::{EventArgs, EventEmitter};
pub use proxy::{FlagProxy, WatchFlagGroup};
pub use storage::{FileStorageProvider, InMemoryStorageProvider, StorageProvider};

// Re-export the shared domain types for convenience so callers rarely need
// a direct dependency on `vane-flags-core`.
pub use vane_flags_core::{
	EvaluatedFlag, EvaluationContext, FeatureError, FlagGeneration, PropertyValue, ValueType,
	Variant, VariantValue, VariationDetails,
};

/// Identifies this SDK in the `X-SDK-Version` header and metrics payloads.
pub const SDK_NAME: &str = "vane-flags-rust";
/// The crate version, reused verbatim as the SDK version component.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
