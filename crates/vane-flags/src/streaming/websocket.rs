// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! WebSocket transport for the streaming client (§4.6/§6.3).
//!
//! Frames carry the same `{"type": "connected" | "flags_changed" | ..., ...}`
//! envelope the SSE transport's `event:`/`data:` pair encodes, so both
//! transports share [`super::dispatch_event`]. On top of that, this
//! transport owns an application-level heartbeat: it sends `{"type":"ping"}`
//! on a fixed interval and treats a `pong` not received by the next interval
//! as a dead connection, since TCP alone won't notice a silently dropped
//! proxy.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use super::{dispatch_event, StreamHandlers, StreamingState};
use crate::events::EventEmitter;

const PING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct Envelope {
	#[serde(rename = "type")]
	event_type: String,
	#[serde(flatten)]
	rest: serde_json::Value,
}

/// A running WebSocket connection task plus its shutdown handle.
pub struct WebSocketHandle {
	shutdown_tx: mpsc::Sender<()>,
	task: JoinHandle<()>,
}

impl WebSocketHandle {
	pub async fn stop(self) {
		let _ = self.shutdown_tx.send(()).await;
		self.task.abort();
		let _ = self.task.await;
	}
}

/// Spawns the WebSocket connection loop in the background. `url` should
/// already use the `ws`/`wss` scheme and carry identity as query parameters.
pub fn spawn(
	url: String,
	headers: HeaderMap,
	state: Arc<StreamingState>,
	emitter: Arc<EventEmitter>,
	handlers: Arc<dyn StreamHandlers>,
	reconnect_base: Duration,
	reconnect_max: Duration,
) -> WebSocketHandle {
	let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
	let task = tokio::spawn(run(url, headers, state, emitter, handlers, reconnect_base, reconnect_max, shutdown_rx));
	WebSocketHandle { shutdown_tx, task }
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
	loop {
		if shutdown_rx.try_recv().is_ok() {
			state.stopped();
			return;
		}

		state.mark_connecting();
		match connect_and_process(&url, &headers, &state, &emitter, handlers.as_ref(), &mut shutdown_rx).await {
			Ok(true) => {
				state.stopped();
				return;
			}
			Ok(false) => {}
			Err(err) => state.mark_error(&emitter, err),
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

/// Connects, exchanges frames, and runs the ping heartbeat until the socket
/// closes, a ping goes unanswered, or a shutdown is requested. Returns
/// `Ok(true)` when the loop should stop.
async fn connect_and_process(
	url: &str,
	headers: &HeaderMap,
	state: &StreamingState,
	emitter: &EventEmitter,
	handlers: &dyn StreamHandlers,
	shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<bool, String> {
	let mut request = url.into_client_request().map_err(|e| e.to_string())?;
	for (key, value) in headers.iter() {
		request.headers_mut().insert(key, value.clone());
	}

	let (stream, _response) = tokio_tungstenite::connect_async(request).await.map_err(|e| e.to_string())?;
	let (mut write, mut read) = stream.split();

	state.mark_connected(emitter);
	debug!("websocket stream connected");

	let mut ticker = tokio::time::interval(PING_INTERVAL);
	ticker.tick().await; // first tick fires immediately; consume it before the loop
	let mut awaiting_pong = false;

	loop {
		tokio::select! {
			frame = read.next() => {
				match frame {
					Some(Ok(Message::Text(text))) => {
						awaiting_pong = false;
						if let Ok(envelope) = serde_json::from_str::<Envelope>(&text) {
							if envelope.event_type == "pong" {
								continue;
							}
							dispatch_event(state, emitter, handlers, &envelope.event_type, &envelope.rest.to_string());
						}
					}
					Some(Ok(Message::Ping(payload))) => {
						let _ = write.send(Message::Pong(payload)).await;
					}
					Some(Ok(Message::Pong(_))) => {
						awaiting_pong = false;
					}
					Some(Ok(Message::Close(_))) | None => {
						debug!("websocket stream closed");
						return Ok(false);
					}
					Some(Ok(_)) => {}
					Some(Err(e)) => return Err(e.to_string()),
				}
			}
			_ = ticker.tick() => {
				if awaiting_pong {
					return Err("websocket heartbeat timed out".to_string());
				}
				let ping = json!({"type": "ping"}).to_string();
				if write.send(Message::Text(ping)).await.is_err() {
					return Err("failed to send websocket heartbeat".to_string());
				}
				awaiting_pong = true;
			}
			_ = shutdown_rx.recv() => {
				let _ = write.send(Message::Close(None)).await;
				return Ok(true);
			}
		}
	}
}
