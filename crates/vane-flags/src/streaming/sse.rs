// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE transport for the streaming client (§4.6/§6.3).
//!
//! Parsing itself is delegated to `eventsource-stream`, which already
//! implements the line-oriented protocol this spec describes (`event:`/
//! `data:` accumulation, multi-line `data:` joined with `\n`, empty line
//! dispatch with `message` as the default event name, `id:`/`retry:`/`:`
//! comment lines ignored) — the same shape the teacher's own SSE client
//! uses for flag invalidation. Reconnection policy and event interpretation
//! live in [`super`]; this module only owns the connection loop.

use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{dispatch_event, StreamHandlers, StreamingState};
use crate::events::EventEmitter;

/// A running SSE connection task plus its shutdown handle.
pub struct SseHandle {
	shutdown_tx: mpsc::Sender<()>,
	task: JoinHandle<()>,
}

impl SseHandle {
	/// Requests shutdown and waits for the task to observe it. Idempotent
	/// with respect to the caller: safe to call once, from `stop()`.
	pub async fn stop(self) {
		let _ = self.shutdown_tx.send(()).await;
		self.task.abort();
		let _ = self.task.await;
	}
}

/// Spawns the SSE connection loop in the background. `url` already carries
/// identity as query parameters (§6.3); `headers` carries the same identity
/// again so a proxy that strips query strings doesn't blind the server.
pub fn spawn(
	url: String,
	headers: HeaderMap,
	state: Arc<StreamingState>,
	emitter: Arc<EventEmitter>,
	handlers: Arc<dyn StreamHandlers>,
	reconnect_base: Duration,
	reconnect_max: Duration,
) -> SseHandle {
	let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
	let task = tokio::spawn(run(url, headers, state, emitter, handlers, reconnect_base, reconnect_max, shutdown_rx));
	SseHandle { shutdown_tx, task }
}

async fn run(
	url: String,
	headers: HeaderMap,
	state: Arc<StreamingState>,
	emitter: Arc<EventEmitter>,
	handlers: Arc<dyn StreamHandlers>,
	reconnect_base: Duration,
	reconnect_max: Duration,
	mut shutdown_rx: mpsc::Receiver<()>,
) {
	let http = reqwest::Client::new();

	loop {
		if shutdown_rx.try_recv().is_ok() {
			state.stopped();
			return;
		}

		state.mark_connecting();
		match connect_and_process(&http, &url, &headers, &state, &emitter, handlers.as_ref(), &mut shutdown_rx).await {
			Ok(requested_shutdown) => {
				if requested_shutdown {
					state.stopped();
					return;
				}
			}
			Err(err) => {
				state.mark_error(&emitter, err);
			}
		}

		state.mark_disconnected(&emitter);
		let delay = state.schedule_reconnect(&emitter, reconnect_base, reconnect_max);
		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_rx.recv() => {
				state.stopped();
				return;
			}
		}
	}
}

/// Connects and processes frames until the server closes the stream, the
/// transport fails, or a shutdown is requested. Returns `Ok(true)` when the
/// loop should stop (shutdown observed mid-stream).
async fn connect_and_process(
	http: &reqwest::Client,
	url: &str,
	headers: &HeaderMap,
	state: &StreamingState,
	emitter: &EventEmitter,
	handlers: &dyn StreamHandlers,
	shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<bool, String> {
	let response = http
		.get(url)
		.headers(headers.clone())
		.header("Accept", "text/event-stream")
		.send()
		.await
		.map_err(|e| e.to_string())?;

	if !response.status().is_success() {
		return Err(format!("sse stream returned status {}", response.status().as_u16()));
	}

	state.mark_connected(emitter);
	debug!("sse stream connected");

	let mut events = response.bytes_stream().eventsource();
	loop {
		tokio::select! {
			next = events.next() => {
				match next {
					Some(Ok(event)) => {
						let event_type = if event.event.is_empty() { "message" } else { event.event.as_str() };
						dispatch_event(state, emitter, handlers, event_type, &event.data);
					}
					Some(Err(e)) => return Err(e.to_string()),
					None => {
						debug!("sse stream ended");
						return Ok(false);
					}
				}
			}
			_ = shutdown_rx.recv() => {
				return Ok(true);
			}
		}
	}
}
