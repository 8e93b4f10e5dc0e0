// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thread-safe named-event emitter.
//!
//! Mirrors the `flags.*` event namespace: structural events (`init`,
//! `ready`, `fetch_start`, `fetch_success`, `fetch_error`, `fetch_end`,
//! `change`, `removed`, `sync`, `pending_sync`, `recovered`, `error`,
//! `impression`, `metrics.sent`, `metrics.error`, and the streaming
//! `streaming.*` events) plus per-flag `<name>.change` events.
//!
//! Handlers are stored under a coarse lock; emission takes a defensive copy
//! of the handler list, releases the lock, then invokes outside of it so a
//! handler is free to subscribe or unsubscribe without deadlocking or
//! perturbing the dispatch in progress. A handler that panics is caught so
//! sibling handlers still run.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// A boxed event argument. Handlers downcast via [`EventArgs::get`].
pub type EventArg = Arc<dyn Any + Send + Sync>;

/// Arguments passed to a handler, preserving emission order.
#[derive(Clone, Default)]
pub struct EventArgs(pub Vec<EventArg>);

impl EventArgs {
	pub fn new() -> Self {
		Self(Vec::new())
	}

	pub fn one(arg: impl Any + Send + Sync) -> Self {
		Self(vec![Arc::new(arg)])
	}

	pub fn push(mut self, arg: impl Any + Send + Sync) -> Self {
		self.0.push(Arc::new(arg));
		self
	}

	/// Downcast the argument at `index`, or `None` if absent or wrong type.
	pub fn get<T: 'static>(&self, index: usize) -> Option<&T> {
		self.0.get(index).and_then(|a| a.downcast_ref::<T>())
	}
}

pub type Handler = Arc<dyn Fn(&EventArgs) + Send + Sync>;
pub type AnyHandler = Arc<dyn Fn(&str, &EventArgs) + Send + Sync>;

/// Diagnostic snapshot of one registered handler.
#[derive(Debug, Clone)]
pub struct HandlerStats {
	pub name: String,
	pub call_count: u64,
	pub is_once: bool,
	pub registered_at_unix_ms: u64,
}

struct HandlerRecord {
	id: u64,
	callback: Handler,
	once: bool,
	name: String,
	call_count: Arc<AtomicU64>,
	registered_at_unix_ms: u64,
}

struct AnyHandlerRecord {
	id: u64,
	callback: AnyHandler,
	name: String,
	call_count: Arc<AtomicU64>,
	registered_at_unix_ms: u64,
}

struct Registry {
	handlers: std::collections::HashMap<String, Vec<HandlerRecord>>,
	any_handlers: Vec<AnyHandlerRecord>,
}

/// Thread-safe named-event emitter with any-event fan-out and one-shot handlers.
pub struct EventEmitter {
	registry: Mutex<Registry>,
	next_id: AtomicU64,
}

impl Default for EventEmitter {
	fn default() -> Self {
		Self::new()
	}
}

fn now_unix_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

impl EventEmitter {
	pub fn new() -> Self {
		Self {
			registry: Mutex::new(Registry {
				handlers: std::collections::HashMap::new(),
				any_handlers: Vec::new(),
			}),
			next_id: AtomicU64::new(1),
		}
	}

	fn alloc_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Subscribe a persistent handler for `event`, returning a token that can
	/// be passed to [`EventEmitter::off`].
	pub fn on(&self, event: impl Into<String>, name: impl Into<String>, callback: Handler) -> u64 {
		self.subscribe(event, name, callback, false)
	}

	/// Subscribe a handler that is automatically removed after one invocation.
	pub fn once(&self, event: impl Into<String>, name: impl Into<String>, callback: Handler) -> u64 {
		self.subscribe(event, name, callback, true)
	}

	fn subscribe(
		&self,
		event: impl Into<String>,
		name: impl Into<String>,
		callback: Handler,
		once: bool,
	) -> u64 {
		let id = self.alloc_id();
		let mut registry = self.registry.lock().expect("event registry poisoned");
		registry.handlers.entry(event.into()).or_default().push(HandlerRecord {
			id,
			callback,
			once,
			name: name.into(),
			call_count: Arc::new(AtomicU64::new(0)),
			registered_at_unix_ms: now_unix_ms(),
		});
		id
	}

	/// Unsubscribe a specific handler by the token returned from `on`/`once`.
	pub fn off(&self, event: &str, token: u64) {
		let mut registry = self.registry.lock().expect("event registry poisoned");
		if let Some(handlers) = registry.handlers.get_mut(event) {
			handlers.retain(|h| h.id != token);
		}
	}

	/// Unsubscribe every handler registered for `event`.
	pub fn off_all(&self, event: &str) {
		let mut registry = self.registry.lock().expect("event registry poisoned");
		registry.handlers.remove(event);
	}

	/// Subscribe a fan-out handler invoked for every emitted event.
	pub fn on_any(&self, name: impl Into<String>, callback: AnyHandler) -> u64 {
		let id = self.alloc_id();
		let mut registry = self.registry.lock().expect("event registry poisoned");
		registry.any_handlers.push(AnyHandlerRecord {
			id,
			callback,
			name: name.into(),
			call_count: Arc::new(AtomicU64::new(0)),
			registered_at_unix_ms: now_unix_ms(),
		});
		id
	}

	pub fn off_any(&self, token: u64) {
		let mut registry = self.registry.lock().expect("event registry poisoned");
		registry.any_handlers.retain(|h| h.id != token);
	}

	/// Emit `event` with no arguments.
	pub fn emit(&self, event: &str) {
		self.emit_args(event, EventArgs::new());
	}

	/// Emit `event` carrying `args`, invoking every subscriber outside the lock.
	pub fn emit_args(&self, event: &str, args: EventArgs) {
		let (handlers, any_handlers) = {
			let registry = self.registry.lock().expect("event registry poisoned");
			let handlers: Vec<_> = registry
				.handlers
				.get(event)
				.map(|v| v.iter().map(|h| (h.id, h.callback.clone(), h.once, h.call_count.clone())).collect())
				.unwrap_or_default();
			let any_handlers: Vec<_> = registry
				.any_handlers
				.iter()
				.map(|h| (h.callback.clone(), h.call_count.clone()))
				.collect();
			(handlers, any_handlers)
		};

		let mut once_ids = Vec::new();
		for (id, callback, once, call_count) in handlers {
			let result = catch_unwind(AssertUnwindSafe(|| callback(&args)));
			if result.is_err() {
				tracing::warn!(event, "event handler panicked; discarding");
			}
			call_count.fetch_add(1, Ordering::Relaxed);
			if once {
				once_ids.push(id);
			}
		}

		for (callback, call_count) in any_handlers {
			let result = catch_unwind(AssertUnwindSafe(|| callback(event, &args)));
			if result.is_err() {
				tracing::warn!(event, "any-event handler panicked; discarding");
			}
			call_count.fetch_add(1, Ordering::Relaxed);
		}

		if !once_ids.is_empty() {
			let mut registry = self.registry.lock().expect("event registry poisoned");
			if let Some(list) = registry.handlers.get_mut(event) {
				list.retain(|h| !once_ids.contains(&h.id));
			}
		}
	}

	/// Diagnostic snapshot of every registered handler, keyed by event name.
	pub fn handler_stats(&self) -> std::collections::HashMap<String, Vec<HandlerStats>> {
		let registry = self.registry.lock().expect("event registry poisoned");
		registry
			.handlers
			.iter()
			.map(|(event, handlers)| {
				let stats = handlers
					.iter()
					.map(|h| HandlerStats {
						name: h.name.clone(),
						call_count: h.call_count.load(Ordering::Relaxed),
						is_once: h.once,
						registered_at_unix_ms: h.registered_at_unix_ms,
					})
					.collect();
				(event.clone(), stats)
			})
			.collect()
	}
}

/// The `flags.*` event-name namespace, including the open-question
/// breadcrumb event `pending_sync` (see DESIGN.md).
pub mod names {
	pub const INIT: &str = "flags.init";
	pub const READY: &str = "flags.ready";
	pub const FETCH: &str = "flags.fetch";
	pub const FETCH_START: &str = "flags.fetch_start";
	pub const FETCH_SUCCESS: &str = "flags.fetch_success";
	pub const FETCH_ERROR: &str = "flags.fetch_error";
	pub const FETCH_END: &str = "flags.fetch_end";
	pub const CHANGE: &str = "flags.change";
	pub const REMOVED: &str = "flags.removed";
	pub const SYNC: &str = "flags.sync";
	pub const PENDING_SYNC: &str = "flags.pending_sync";
	pub const IMPRESSION: &str = "flags.impression";
	pub const METRICS_SENT: &str = "flags.metrics.sent";
	pub const METRICS_ERROR: &str = "flags.metrics.error";
	pub const ERROR: &str = "flags.error";
	pub const RECOVERED: &str = "flags.recovered";
	pub const STREAMING_CONNECTED: &str = "flags.streaming.connected";
	pub const STREAMING_DISCONNECTED: &str = "flags.streaming.disconnected";
	pub const STREAMING_RECONNECTING: &str = "flags.streaming.reconnecting";
	pub const STREAMING_ERROR: &str = "flags.streaming.error";
	pub const STREAMING_INVALIDATED: &str = "flags.invalidated";

	/// The per-flag named event `<flag>.change`.
	pub fn flag_change(flag_name: &str) -> String {
		format!("flags.{flag_name}.change")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	#[test]
	fn on_handler_receives_emit() {
		let emitter = EventEmitter::new();
		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.on("x", "", Arc::new(move |_: &EventArgs| {
			count2.fetch_add(1, Ordering::SeqCst);
		}));
		emitter.emit("x");
		emitter.emit("x");
		assert_eq!(count.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn once_handler_fires_only_once() {
		let emitter = EventEmitter::new();
		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.once("x", "", Arc::new(move |_: &EventArgs| {
			count2.fetch_add(1, Ordering::SeqCst);
		}));
		emitter.emit("x");
		emitter.emit("x");
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn off_removes_handler() {
		let emitter = EventEmitter::new();
		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();
		let token = emitter.on("x", "", Arc::new(move |_: &EventArgs| {
			count2.fetch_add(1, Ordering::SeqCst);
		}));
		emitter.off("x", token);
		emitter.emit("x");
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn any_handler_receives_event_name() {
		let emitter = EventEmitter::new();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let seen2 = seen.clone();
		emitter.on_any("", Arc::new(move |event: &str, _: &EventArgs| {
			seen2.lock().unwrap().push(event.to_string());
		}));
		emitter.emit("a");
		emitter.emit("b");
		assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
	}

	#[test]
	fn panicking_handler_does_not_block_siblings() {
		let emitter = EventEmitter::new();
		let count = Arc::new(AtomicUsize::new(0));
		let count2 = count.clone();
		emitter.on("x", "", Arc::new(|_: &EventArgs| panic!("boom")));
		emitter.on("x", "", Arc::new(move |_: &EventArgs| {
			count2.fetch_add(1, Ordering::SeqCst);
		}));
		emitter.emit("x");
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn handler_can_unsubscribe_during_emit() {
		let emitter = Arc::new(EventEmitter::new());
		let emitter2 = emitter.clone();
		let token_cell: Arc<Mutex<Option<u64>>> = Arc::new(Mutex::new(None));
		let token_cell2 = token_cell.clone();
		let token = emitter.on(
			"x",
			"",
			Arc::new(move |_: &EventArgs| {
				if let Some(t) = *token_cell2.lock().unwrap() {
					emitter2.off("x", t);
				}
			}),
		);
		*token_cell.lock().unwrap() = Some(token);
		// Defensive copy means this emit still invokes the handler once.
		emitter.emit("x");
		let stats = emitter.handler_stats();
		assert!(stats.get("x").map(|v| v.is_empty()).unwrap_or(true));
	}

	#[test]
	fn handler_stats_reports_call_count() {
		let emitter = EventEmitter::new();
		emitter.on("x", "watcher", Arc::new(|_: &EventArgs| {}));
		emitter.emit("x");
		emitter.emit("x");
		let stats = emitter.handler_stats();
		let entry = &stats["x"][0];
		assert_eq!(entry.name, "watcher");
		assert_eq!(entry.call_count, 2);
		assert!(!entry.is_once);
	}

	#[test]
	fn event_args_downcast() {
		let args = EventArgs::one(42i32).push("hello".to_string());
		assert_eq!(args.get::<i32>(0), Some(&42));
		assert_eq!(args.get::<String>(1), Some(&"hello".to_string()));
		assert_eq!(args.get::<i32>(1), None);
	}
}
