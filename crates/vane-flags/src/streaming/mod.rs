// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Streaming transport (§4.6): shared connection state, backoff, and event
//! dispatch used by both [`sse`] and [`websocket`]. Each transport owns its
//! own background task and wire format; everything about how a connection
//! ages through `disconnected -> connecting -> connected -> reconnecting ->
//! degraded` and how a `connected`/`flags_changed`/`heartbeat` payload turns
//! into cache invalidation lives here so the two transports can't drift.

pub mod sse;
pub mod websocket;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;

use crate::events::{names, EventArgs, EventEmitter};

/// Where a streaming connection currently sits in its reconnection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	Connected,
	Reconnecting,
	Degraded,
}

/// Reconnect attempts at or beyond this count flip the connection into
/// `Degraded` rather than plain `Reconnecting` (§4.6).
pub const DEGRADED_AFTER_ATTEMPTS: u32 = 5;

/// Callbacks a streaming connection uses to drive the rest of the client:
/// a revision bump on `connected` means a plain background re-fetch; a
/// revision bump on `flags_changed` additionally reports which keys moved.
pub trait StreamHandlers: Send + Sync {
	fn on_invalidation(&self, changed_keys: Vec<String>);
	fn on_fetch_request(&self);
}

/// Shared counters and lifecycle state for one streaming connection.
/// Written by the connection's background task, read by stats surfaces.
#[derive(Debug)]
pub struct StreamingState {
	state: Mutex<ConnectionState>,
	reconnect_attempt: AtomicU32,
	reconnect_count: AtomicU64,
	event_count: AtomicU64,
	error_count: AtomicU64,
	recovery_count: AtomicU64,
	local_global_revision: AtomicU64,
	last_error: Mutex<Option<String>>,
}

impl Default for StreamingState {
	fn default() -> Self {
		Self::new()
	}
}

impl StreamingState {
	pub fn new() -> Self {
		Self {
			state: Mutex::new(ConnectionState::Disconnected),
			reconnect_attempt: AtomicU32::new(0),
			reconnect_count: AtomicU64::new(0),
			event_count: AtomicU64::new(0),
			error_count: AtomicU64::new(0),
			recovery_count: AtomicU64::new(0),
			local_global_revision: AtomicU64::new(0),
			last_error: Mutex::new(None),
		}
	}

	pub fn state(&self) -> ConnectionState {
		*self.state.lock().expect("streaming state poisoned")
	}

	pub fn reconnect_attempt(&self) -> u32 {
		self.reconnect_attempt.load(Ordering::SeqCst)
	}

	pub fn reconnect_count(&self) -> u64 {
		self.reconnect_count.load(Ordering::SeqCst)
	}

	pub fn event_count(&self) -> u64 {
		self.event_count.load(Ordering::SeqCst)
	}

	pub fn error_count(&self) -> u64 {
		self.error_count.load(Ordering::SeqCst)
	}

	pub fn recovery_count(&self) -> u64 {
		self.recovery_count.load(Ordering::SeqCst)
	}

	pub fn last_error(&self) -> Option<String> {
		self.last_error.lock().expect("streaming state poisoned").clone()
	}

	fn set_state(&self, state: ConnectionState) {
		*self.state.lock().expect("streaming state poisoned") = state;
	}

	fn mark_connecting(&self) {
		self.set_state(ConnectionState::Connecting);
	}

	fn mark_connected(&self, emitter: &EventEmitter) {
		if self.reconnect_count.load(Ordering::SeqCst) > 0 {
			self.recovery_count.fetch_add(1, Ordering::SeqCst);
		}
		self.reconnect_attempt.store(0, Ordering::SeqCst);
		self.set_state(ConnectionState::Connected);
		emitter.emit(names::STREAMING_CONNECTED);
	}

	fn mark_disconnected(&self, emitter: &EventEmitter) {
		if self.state() != ConnectionState::Disconnected {
			self.set_state(ConnectionState::Reconnecting);
			emitter.emit(names::STREAMING_DISCONNECTED);
		}
	}

	fn mark_error(&self, emitter: &EventEmitter, message: String) {
		self.error_count.fetch_add(1, Ordering::SeqCst);
		*self.last_error.lock().expect("streaming state poisoned") = Some(message.clone());
		emitter.emit_args(names::STREAMING_ERROR, EventArgs::one(message));
	}

	fn stopped(&self) {
		self.set_state(ConnectionState::Disconnected);
	}

	/// Bumps the reconnect counters, emits `streaming.reconnecting`, flips to
	/// `Degraded` once [`DEGRADED_AFTER_ATTEMPTS`] is reached, and returns the
	/// delay to wait before the next attempt.
	fn schedule_reconnect(&self, emitter: &EventEmitter, base: Duration, max: Duration) -> Duration {
		let attempt = self.reconnect_attempt.fetch_add(1, Ordering::SeqCst) + 1;
		self.reconnect_count.fetch_add(1, Ordering::SeqCst);
		emitter.emit(names::STREAMING_RECONNECTING);
		if attempt >= DEGRADED_AFTER_ATTEMPTS {
			self.set_state(ConnectionState::Degraded);
		}
		reconnect_delay(attempt, base, max)
	}
}

/// §4.6 backoff: `min(base * 2^(attempt-1), max)` plus `uniform(0, 1s)`
/// jitter so many clients reconnecting at once don't thunder in lockstep.
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
	let shift = attempt.saturating_sub(1).min(32);
	let exponential = (base.as_millis().saturating_mul(1u128 << shift)) as u64;
	let bounded = exponential.min(max.as_millis() as u64);
	let jitter_ms = (fastrand::f64() * 1000.0) as u64;
	Duration::from_millis(bounded.saturating_add(jitter_ms))
}

#[derive(Deserialize, Default)]
struct ConnectedPayload {
	#[serde(rename = "globalRevision", default)]
	global_revision: u64,
}

#[derive(Deserialize, Default)]
struct FlagsChangedPayload {
	#[serde(rename = "globalRevision", default)]
	global_revision: u64,
	#[serde(rename = "changedKeys", default)]
	changed_keys: Vec<String>,
}

/// Parses and applies one decoded stream event against the shared revision
/// counter, dispatching to `handlers` when the server's revision moved past
/// what this connection has already observed.
pub fn dispatch_event(state: &StreamingState, emitter: &EventEmitter, handlers: &dyn StreamHandlers, event_type: &str, data: &str) {
	state.event_count.fetch_add(1, Ordering::SeqCst);

	match event_type {
		"connected" => {
			let Ok(payload) = serde_json::from_str::<ConnectedPayload>(data) else { return };
			let local = state.local_global_revision.load(Ordering::SeqCst);
			if local == 0 {
				state.local_global_revision.store(payload.global_revision, Ordering::SeqCst);
			} else if payload.global_revision > local {
				state.local_global_revision.store(payload.global_revision, Ordering::SeqCst);
				handlers.on_fetch_request();
			}
		}
		"flags_changed" => {
			let Ok(payload) = serde_json::from_str::<FlagsChangedPayload>(data) else { return };
			let local = state.local_global_revision.load(Ordering::SeqCst);
			if payload.global_revision > local {
				state.local_global_revision.store(payload.global_revision, Ordering::SeqCst);
				emitter.emit(names::STREAMING_INVALIDATED);
				handlers.on_invalidation(payload.changed_keys);
			}
		}
		"heartbeat" => {}
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex as StdMutex};

	struct RecordingHandlers {
		invalidations: StdMutex<Vec<Vec<String>>>,
		fetch_requests: std::sync::atomic::AtomicUsize,
	}

	impl RecordingHandlers {
		fn new() -> Self {
			Self { invalidations: StdMutex::new(Vec::new()), fetch_requests: std::sync::atomic::AtomicUsize::new(0) }
		}
	}

	impl StreamHandlers for RecordingHandlers {
		fn on_invalidation(&self, changed_keys: Vec<String>) {
			self.invalidations.lock().unwrap().push(changed_keys);
		}

		fn on_fetch_request(&self) {
			self.fetch_requests.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[test]
	fn first_connected_event_seeds_revision_without_fetching() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		let handlers = RecordingHandlers::new();
		dispatch_event(&state, &emitter, &handlers, "connected", r#"{"globalRevision": 5}"#);
		assert_eq!(state.local_global_revision.load(Ordering::SeqCst), 5);
		assert_eq!(handlers.fetch_requests.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn later_connected_event_with_higher_revision_triggers_fetch() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		let handlers = RecordingHandlers::new();
		dispatch_event(&state, &emitter, &handlers, "connected", r#"{"globalRevision": 5}"#);
		dispatch_event(&state, &emitter, &handlers, "connected", r#"{"globalRevision": 9}"#);
		assert_eq!(handlers.fetch_requests.load(Ordering::SeqCst), 1);
		assert_eq!(state.local_global_revision.load(Ordering::SeqCst), 9);
	}

	#[test]
	fn flags_changed_with_higher_revision_invalidates() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		let handlers = RecordingHandlers::new();
		dispatch_event(&state, &emitter, &handlers, "connected", r#"{"globalRevision": 3}"#);
		dispatch_event(
			&state,
			&emitter,
			&handlers,
			"flags_changed",
			r#"{"globalRevision": 4, "changedKeys": ["a", "b"]}"#,
		);
		assert_eq!(handlers.invalidations.lock().unwrap().len(), 1);
		assert_eq!(handlers.invalidations.lock().unwrap()[0], vec!["a".to_string(), "b".to_string()]);
	}

	#[test]
	fn stale_revision_is_ignored() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		let handlers = RecordingHandlers::new();
		dispatch_event(&state, &emitter, &handlers, "connected", r#"{"globalRevision": 10}"#);
		dispatch_event(&state, &emitter, &handlers, "flags_changed", r#"{"globalRevision": 3, "changedKeys": []}"#);
		assert!(handlers.invalidations.lock().unwrap().is_empty());
	}

	#[test]
	fn heartbeat_only_bumps_event_count() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		let handlers = RecordingHandlers::new();
		dispatch_event(&state, &emitter, &handlers, "heartbeat", "");
		assert_eq!(state.event_count(), 1);
	}

	#[test]
	fn reconnect_delay_grows_exponentially_and_caps_at_max() {
		let base = Duration::from_secs(1);
		let max = Duration::from_secs(30);
		assert!(reconnect_delay(1, base, max) < Duration::from_millis(2_000));
		assert!(reconnect_delay(10, base, max) < Duration::from_millis(31_000));
		assert!(reconnect_delay(10, base, max) >= Duration::from_secs(30));
	}

	#[test]
	fn schedule_reconnect_flips_to_degraded_after_five_attempts() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		for _ in 0..4 {
			state.schedule_reconnect(&emitter, Duration::from_millis(1), Duration::from_millis(10));
		}
		assert_ne!(state.state(), ConnectionState::Degraded);
		state.schedule_reconnect(&emitter, Duration::from_millis(1), Duration::from_millis(10));
		assert_eq!(state.state(), ConnectionState::Degraded);
	}

	#[test]
	fn mark_connected_after_reconnects_counts_as_recovery() {
		let state = StreamingState::new();
		let emitter = EventEmitter::new();
		state.schedule_reconnect(&emitter, Duration::from_millis(1), Duration::from_millis(10));
		state.mark_connected(&emitter);
		assert_eq!(state.recovery_count(), 1);
		assert_eq!(state.reconnect_attempt(), 0);
	}

	#[test]
	fn arc_handlers_are_object_safe() {
		let _handlers: Arc<dyn StreamHandlers> = Arc::new(RecordingHandlers::new());
	}
}
