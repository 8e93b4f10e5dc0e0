// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The two-generation flag cache: an active slot always readable by
//! variation callers, and an optional pending slot used only in
//! explicit-sync mode.
//!
//! Both slots are replaced by whole-map substitution under a lock, never
//! mutated in place, so a reader that clones the `Arc` out from under the
//! lock always sees one coherent generation — never a mix of old and new
//! flags.

use std::sync::{Arc, RwLock};

use vane_flags_core::FlagGeneration;

/// Holds the active generation and the optional pending generation.
/// Writes are performed only by the fetch engine or the explicit-sync
/// commit path; reads never block writers longer than an `Arc` clone.
#[derive(Default)]
pub struct FlagCache {
	active: RwLock<Arc<FlagGeneration>>,
	pending: RwLock<Option<Arc<FlagGeneration>>>,
}

impl FlagCache {
	pub fn new() -> Self {
		Self { active: RwLock::new(Arc::new(FlagGeneration::new())), pending: RwLock::new(None) }
	}

	/// A cheap clone of the current active generation's `Arc`.
	pub fn active(&self) -> Arc<FlagGeneration> {
		self.active.read().expect("cache lock poisoned").clone()
	}

	/// Replaces the active generation wholesale.
	pub fn set_active(&self, generation: FlagGeneration) {
		*self.active.write().expect("cache lock poisoned") = Arc::new(generation);
	}

	/// The pending generation, if explicit-sync mode has a fetch staged.
	pub fn pending(&self) -> Option<Arc<FlagGeneration>> {
		self.pending.read().expect("cache lock poisoned").clone()
	}

	/// Stages a generation into the pending slot (explicit-sync fetch success).
	pub fn set_pending(&self, generation: FlagGeneration) {
		*self.pending.write().expect("cache lock poisoned") = Some(Arc::new(generation));
	}

	/// Clears the pending slot without touching active (used by `syncFlags`
	/// after commit, and when explicit-sync mode is toggled off).
	pub fn clear_pending(&self) {
		*self.pending.write().expect("cache lock poisoned") = None;
	}

	/// Atomically swaps pending into active, returning the generation that
	/// was swapped in (or `None` if there was nothing pending).
	pub fn commit_pending(&self) -> Option<Arc<FlagGeneration>> {
		let staged = self.pending.write().expect("cache lock poisoned").take()?;
		*self.active.write().expect("cache lock poisoned") = staged.clone();
		Some(staged)
	}
}
