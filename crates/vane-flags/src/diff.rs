// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Diff/notify engine (§4.7): a pure comparison between two flag
//! generations, plus the event fan-out that turns a diff into the public
//! `change`/`removed`/`<flag>.change` events.
//!
//! Both the fetch engine's immediate-apply path and `syncFlags`'s
//! explicit-sync commit path compute a diff the same way and notify through
//! the same [`notify`] function, so a caller never sees different event
//! shapes depending on which mode produced the new generation.

use vane_flags_core::{EvaluatedFlag, FlagGeneration};

use crate::events::{names, EventArgs, EventEmitter};

/// Whether a changed flag is newly present or was already known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	Created,
	Updated,
}

#[derive(Debug, Clone)]
pub struct FlagChange {
	pub flag_name: String,
	pub kind: ChangeKind,
	pub new_flag: EvaluatedFlag,
	pub old_flag: Option<EvaluatedFlag>,
}

#[derive(Debug, Clone, Default)]
pub struct DiffResult {
	pub changed: Vec<FlagChange>,
	pub removed: Vec<String>,
}

impl DiffResult {
	pub fn is_empty(&self) -> bool {
		self.changed.is_empty() && self.removed.is_empty()
	}
}

/// Compares `old` against `new`, returning every flag that was added or whose
/// change predicate (§3, [`EvaluatedFlag::changed_from`]) fired, plus the
/// names of every flag present in `old` but absent from `new`.
pub fn diff(old: &FlagGeneration, new: &FlagGeneration) -> DiffResult {
	let mut changed = Vec::new();
	for (name, new_flag) in new {
		match old.get(name) {
			None => changed.push(FlagChange {
				flag_name: name.clone(),
				kind: ChangeKind::Created,
				new_flag: new_flag.clone(),
				old_flag: None,
			}),
			Some(old_flag) => {
				if new_flag.changed_from(old_flag) {
					changed.push(FlagChange {
						flag_name: name.clone(),
						kind: ChangeKind::Updated,
						new_flag: new_flag.clone(),
						old_flag: Some(old_flag.clone()),
					});
				}
			}
		}
	}

	let removed: Vec<String> = old.keys().filter(|name| !new.contains_key(*name)).cloned().collect();

	DiffResult { changed, removed }
}

/// Emits the aggregate `change`/`removed` events plus one `<flag>.change`
/// event per changed flag. A no-op diff emits nothing.
pub fn notify(emitter: &EventEmitter, result: &DiffResult) {
	if result.changed.is_empty() && result.removed.is_empty() {
		return;
	}

	if !result.changed.is_empty() {
		let names: Vec<String> = result.changed.iter().map(|c| c.flag_name.clone()).collect();
		emitter.emit_args(names::CHANGE, EventArgs::one(names));

		for change in &result.changed {
			let kind = match change.kind {
				ChangeKind::Created => "created",
				ChangeKind::Updated => "updated",
			};
			emitter.emit_args(
				&names::flag_change(&change.flag_name),
				EventArgs::one(change.new_flag.clone()).push(change.old_flag.clone()).push(kind),
			);
		}
	}

	if !result.removed.is_empty() {
		emitter.emit_args(names::REMOVED, EventArgs::one(result.removed.clone()));
	}
}

/// Convenience used by the fetch engine: diffs the current generation
/// against a freshly-fetched one and notifies in one step.
pub fn apply_and_notify(emitter: &EventEmitter, old: &FlagGeneration, new: &FlagGeneration) -> DiffResult {
	let result = diff(old, new);
	notify(emitter, &result);
	result
}

#[cfg(test)]
mod tests {
	use super::*;
	use vane_flags_core::{ValueType, Variant};

	fn flag(name: &str, version: u64) -> EvaluatedFlag {
		EvaluatedFlag {
			name: name.to_string(),
			enabled: true,
			variant: Variant::disabled(),
			value_type: ValueType::None,
			version,
			reason: None,
			impression_data: None,
		}
	}

	#[test]
	fn new_flag_is_created() {
		let old = FlagGeneration::new();
		let mut new = FlagGeneration::new();
		new.insert("a".to_string(), flag("a", 1));

		let result = diff(&old, &new);
		assert_eq!(result.changed.len(), 1);
		assert_eq!(result.changed[0].kind, ChangeKind::Created);
		assert!(result.removed.is_empty());
	}

	#[test]
	fn bumped_version_is_updated() {
		let mut old = FlagGeneration::new();
		old.insert("a".to_string(), flag("a", 1));
		let mut new = FlagGeneration::new();
		new.insert("a".to_string(), flag("a", 2));

		let result = diff(&old, &new);
		assert_eq!(result.changed.len(), 1);
		assert_eq!(result.changed[0].kind, ChangeKind::Updated);
		assert_eq!(result.changed[0].old_flag.as_ref().unwrap().version, 1);
	}

	#[test]
	fn identical_generation_produces_no_changes() {
		let mut old = FlagGeneration::new();
		old.insert("a".to_string(), flag("a", 1));
		let new = old.clone();

		let result = diff(&old, &new);
		assert!(result.is_empty());
	}

	#[test]
	fn dropped_flag_is_removed() {
		let mut old = FlagGeneration::new();
		old.insert("a".to_string(), flag("a", 1));
		let new = FlagGeneration::new();

		let result = diff(&old, &new);
		assert!(result.changed.is_empty());
		assert_eq!(result.removed, vec!["a".to_string()]);
	}

	#[test]
	fn reason_only_change_is_not_a_change() {
		let mut a = flag("a", 1);
		a.reason = Some("default".to_string());
		let mut b = a.clone();
		b.reason = Some("override".to_string());

		let mut old = FlagGeneration::new();
		old.insert("a".to_string(), a);
		let mut new = FlagGeneration::new();
		new.insert("a".to_string(), b);

		assert!(diff(&old, &new).is_empty());
	}

	#[test]
	fn notify_emits_aggregate_and_per_flag_events() {
		let emitter = EventEmitter::new();
		let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
		let seen2 = seen.clone();
		emitter.on_any(
			"",
			std::sync::Arc::new(move |event: &str, _: &EventArgs| {
				seen2.lock().unwrap().push(event.to_string());
			}),
		);

		let mut old = FlagGeneration::new();
		old.insert("a".to_string(), flag("a", 1));
		let mut new = FlagGeneration::new();
		new.insert("a".to_string(), flag("a", 2));
		new.insert("b".to_string(), flag("b", 1));

		let result = diff(&old, &new);
		notify(&emitter, &result);

		let seen = seen.lock().unwrap();
		assert!(seen.contains(&names::CHANGE.to_string()));
		assert!(seen.contains(&names::flag_change("a")));
		assert!(seen.contains(&names::flag_change("b")));
	}

	#[test]
	fn per_flag_event_carries_created_or_updated_tag() {
		let emitter = EventEmitter::new();
		let tags = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
		let tags2 = tags.clone();
		emitter.on(
			&names::flag_change("a"),
			"",
			std::sync::Arc::new(move |args: &EventArgs| {
				tags2.lock().unwrap().push(*args.get::<&str>(2).unwrap());
			}),
		);

		let mut old = FlagGeneration::new();
		old.insert("a".to_string(), flag("a", 1));
		let mut new_created = FlagGeneration::new();
		new_created.insert("a".to_string(), flag("a", 1));
		notify(&emitter, &diff(&FlagGeneration::new(), &new_created));

		let mut new_updated = FlagGeneration::new();
		new_updated.insert("a".to_string(), flag("a", 2));
		notify(&emitter, &diff(&old, &new_updated));

		assert_eq!(*tags.lock().unwrap(), vec!["created", "updated"]);
	}

	#[test]
	fn notify_is_silent_on_empty_diff() {
		let emitter = EventEmitter::new();
		let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.on_any(
			"",
			std::sync::Arc::new(move |_: &str, _: &EventArgs| {
				count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			}),
		);
		notify(&emitter, &DiffResult::default());
		assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);
	}

	use proptest::prelude::*;

	proptest! {
		/// Any version bump on an already-known flag is reported as `Updated`,
		/// never `Created` and never dropped (§8 property 3).
		#[test]
		fn version_bump_is_always_updated(old_version in 1u64..1_000, bump in 1u64..1_000) {
			let mut old = FlagGeneration::new();
			old.insert("a".to_string(), flag("a", old_version));
			let mut new = FlagGeneration::new();
			new.insert("a".to_string(), flag("a", old_version + bump));

			let result = diff(&old, &new);
			prop_assert_eq!(result.changed.len(), 1);
			prop_assert_eq!(result.changed[0].kind, ChangeKind::Updated);
		}

		/// Diffing a generation against an identical clone is always empty,
		/// regardless of how many flags it holds or their versions.
		#[test]
		fn identical_generation_is_always_empty(names in prop::collection::vec("[a-z]{1,8}", 1..8), version in 1u64..1_000) {
			let mut old = FlagGeneration::new();
			for name in &names {
				old.insert(name.clone(), flag(name, version));
			}
			let new = old.clone();
			prop_assert!(diff(&old, &new).is_empty());
		}

		/// Every key present in `old` but absent from `new` appears in
		/// `removed`, and no other names do.
		#[test]
		fn removed_set_matches_dropped_keys(
			kept in prop::collection::vec("[a-z]{1,8}", 0..5),
			dropped in prop::collection::vec("[A-Z]{1,8}", 0..5),
		) {
			let mut old = FlagGeneration::new();
			for name in kept.iter().chain(dropped.iter()) {
				old.insert(name.clone(), flag(name, 1));
			}
			let mut new = FlagGeneration::new();
			for name in &kept {
				new.insert(name.clone(), flag(name, 1));
			}

			let result = diff(&old, &new);
			let mut removed = result.removed.clone();
			removed.sort();
			let mut expected: Vec<String> = dropped.clone();
			expected.sort();
			expected.dedup();
			removed.dedup();
			prop_assert_eq!(removed, expected);
		}
	}
}
