// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The public client facade (§4.12/§4.13/§4.14): lifecycle, typed variation
//! shortcuts, watch groups, and the stats surface, wired over the cache,
//! fetch engine, metrics engine, diff engine, and streaming transports that
//! the rest of this crate implements.
//!
//! [`Inner`] is the single shared, reference-counted state every background
//! task and every [`FlagProxy`] reads through; [`FlagsClient`] is a thin
//! `Arc<Inner>` handle applications hold and clone freely.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use vane_flags_core::{
	EvaluatedFlag, EvaluationContext, FeatureError, FlagCounts, FlagGeneration, ImpressionEventType,
	Variant, VariationDetails,
};

use crate::cache::FlagCache;
use crate::config::{ClientConfig, StreamingTransport};
use crate::diff;
use crate::error::{FlagsError, Result};
use crate::events::{names, EventArgs, EventEmitter, Handler, HandlerStats};
use crate::fetch::{self, FetchOutcome};
use crate::metrics::{self, MetricsAccumulator};
use crate::proxy::{self, FlagAccessor, FlagProxy, WatchFlagGroup};
use crate::storage::{InMemoryStorageProvider, StorageProvider};
use crate::streaming::{self, ConnectionState, StreamHandlers, StreamingState};

/// Per-flag lifetime counters surfaced through [`ClientStats`]. Distinct from
/// [`MetricsAccumulator`]'s bucket, which drains on every upload — this state
/// never rotates, so `get_stats()` always reflects the whole session.
#[derive(Default)]
struct StatsState {
	start_time: Mutex<Option<DateTime<Utc>>>,
	error_count: AtomicU64,
	last_error: Mutex<Option<String>>,
	last_error_time: Mutex<Option<DateTime<Utc>>>,
	fetch_count: AtomicU64,
	update_count: AtomicU64,
	not_modified_count: AtomicU64,
	recovery_count: AtomicU64,
	sync_count: AtomicU64,
	context_change_count: AtomicU64,
	impression_count: AtomicU64,
	metrics_sent_count: AtomicU64,
	metrics_error_count: AtomicU64,
	last_fetch_time: Mutex<Option<DateTime<Utc>>>,
	last_update_time: Mutex<Option<DateTime<Utc>>>,
	last_recovery_time: Mutex<Option<DateTime<Utc>>>,
	enabled_counts: Mutex<HashMap<String, FlagCounts>>,
	missing_counts: Mutex<HashMap<String, u64>>,
	last_changed: Mutex<HashMap<String, DateTime<Utc>>>,
	watch_group_names: Mutex<HashSet<String>>,
	in_error_state: AtomicBool,
}

impl StatsState {
	fn record_lookup(&self, flag_name: &str, flag: Option<&EvaluatedFlag>, variant_name: Option<&str>) {
		let Some(flag) = flag else {
			*self.missing_counts.lock().expect("stats poisoned").entry(flag_name.to_string()).or_insert(0) += 1;
			return;
		};
		let mut counts = self.enabled_counts.lock().expect("stats poisoned");
		let entry = counts.entry(flag_name.to_string()).or_insert_with(FlagCounts::default);
		if flag.enabled {
			entry.yes += 1;
		} else {
			entry.no += 1;
		}
		if let Some(variant_name) = variant_name {
			*entry.variants.entry(variant_name.to_string()).or_insert(0) += 1;
		}
	}

	fn record_changed(&self, flag_names: impl Iterator<Item = String>) {
		let now = Utc::now();
		let mut last_changed = self.last_changed.lock().expect("stats poisoned");
		for name in flag_names {
			last_changed.insert(name, now);
		}
	}

	fn record_error(&self, message: String) {
		self.error_count.fetch_add(1, Ordering::Relaxed);
		let now = Utc::now();
		*self.last_error.lock().expect("stats poisoned") = Some(message);
		*self.last_error_time.lock().expect("stats poisoned") = Some(now);
		self.in_error_state.store(true, Ordering::Relaxed);
	}
}

/// Diagnostic snapshot of one tracked flag (§4.14).
#[derive(Debug, Clone)]
pub struct FeatureStats {
	pub total_flags: usize,
	pub missing: HashMap<String, u64>,
	pub fetch_count: u64,
	pub update_count: u64,
	pub not_modified_count: u64,
	pub recovery_count: u64,
	pub error_count: u64,
	pub state: String,
	pub last_fetch_time: Option<DateTime<Utc>>,
	pub last_update_time: Option<DateTime<Utc>>,
	pub last_recovery_time: Option<DateTime<Utc>>,
	pub last_error_time: Option<DateTime<Utc>>,
	pub enabled_counts: HashMap<String, FlagCounts>,
	pub sync_count: u64,
	pub active_watch_groups: Vec<String>,
	pub etag: Option<String>,
	pub impression_count: u64,
	pub context_change_count: u64,
	pub last_changed: HashMap<String, DateTime<Utc>>,
	pub metrics_sent_count: u64,
	pub metrics_error_count: u64,
}

/// Read-only diagnostic snapshot returned by [`FlagsClient::get_stats`].
/// Never used to drive control flow (§4.14).
#[derive(Debug, Clone)]
pub struct ClientStats {
	pub state: String,
	pub start_time: Option<DateTime<Utc>>,
	pub connection_id: String,
	pub error_count: u64,
	pub last_error: Option<String>,
	pub last_error_time: Option<DateTime<Utc>>,
	pub offline_mode: bool,
	pub features: FeatureStats,
	pub handlers: HashMap<String, Vec<HandlerStats>>,
}

fn sdk_state(polling_stopped: bool, in_error: bool) -> &'static str {
	if polling_stopped {
		"stopped"
	} else if in_error {
		"error"
	} else {
		"ready"
	}
}

/// Binds a `(client, force_realtime)` pair into the [`FlagAccessor`] shape
/// [`FlagProxy`] expects, resolving the gap that the proxy itself carries no
/// per-instance realtime flag (§4.10): each proxy gets its own accessor
/// instance instead.
struct BoundAccessor {
	inner: Arc<Inner>,
	force_realtime: bool,
}

impl FlagAccessor for BoundAccessor {
	fn lookup(&self, flag_name: &str) -> Option<EvaluatedFlag> {
		self.inner.lookup(flag_name, self.force_realtime)
	}

	fn record_access(&self, flag_name: &str, flag: Option<&EvaluatedFlag>, event_type: ImpressionEventType, variant_name: Option<&str>) {
		self.inner.record_access(flag_name, flag, event_type, variant_name);
	}
}

struct ClientStreamHandlers {
	inner: Arc<Inner>,
}

impl StreamHandlers for ClientStreamHandlers {
	fn on_invalidation(&self, changed_keys: Vec<String>) {
		debug!(?changed_keys, "streaming invalidation; requesting fetch");
		let inner = self.inner.clone();
		tokio::spawn(async move { inner.fetch_once().await });
	}

	fn on_fetch_request(&self) {
		let inner = self.inner.clone();
		tokio::spawn(async move { inner.fetch_once().await });
	}
}

enum StreamHandle {
	Sse(crate::streaming::sse::SseHandle),
	WebSocket(crate::streaming::websocket::WebSocketHandle),
}

impl StreamHandle {
	async fn stop(self) {
		match self {
			StreamHandle::Sse(h) => h.stop().await,
			StreamHandle::WebSocket(h) => h.stop().await,
		}
	}
}

struct BackgroundTasks {
	poll: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
	metrics: Option<(mpsc::Sender<()>, JoinHandle<()>)>,
	stream: Option<StreamHandle>,
	stream_state: Option<Arc<StreamingState>>,
}

struct Inner {
	config: RwLock<ClientConfig>,
	http: reqwest::Client,
	cache: FlagCache,
	storage: Arc<dyn StorageProvider>,
	emitter: Arc<EventEmitter>,
	metrics: MetricsAccumulator,
	connection_id: String,
	etag: RwLock<Option<String>>,
	explicit_sync_mode: AtomicBool,
	polling_stopped: AtomicBool,
	consecutive_failures: AtomicU32,
	started: AtomicBool,
	stats: StatsState,
	tasks: Mutex<BackgroundTasks>,
}

impl Inner {
	fn lookup(&self, flag_name: &str, force_realtime: bool) -> Option<EvaluatedFlag> {
		if force_realtime && self.explicit_sync_mode.load(Ordering::Relaxed) {
			if let Some(pending) = self.cache.pending() {
				return pending.get(flag_name).cloned();
			}
		}
		self.cache.active().get(flag_name).cloned()
	}

	fn record_access(&self, flag_name: &str, flag: Option<&EvaluatedFlag>, event_type: ImpressionEventType, variant_name: Option<&str>) {
		let (disable_stats, context, impression_data_all) = {
			let config = self.config.read().expect("config lock poisoned");
			(config.disable_stats, config.context.clone(), config.impression_data_all)
		};
		if disable_stats {
			return;
		}
		let impression_fired =
			proxy::record_access(&self.metrics, &self.emitter, &context, impression_data_all, flag_name, flag, event_type, variant_name);
		if impression_fired {
			self.stats.impression_count.fetch_add(1, Ordering::Relaxed);
		}
		self.stats.record_lookup(flag_name, flag, variant_name);
	}

	async fn persist(&self, flags: &FlagGeneration, etag: Option<&str>) {
		let prefix = self.config.read().expect("config lock poisoned").cache_key_prefix.clone();
		let list: Vec<EvaluatedFlag> = flags.values().cloned().collect();
		if let Ok(value) = serde_json::to_value(&list) {
			self.storage.save(&format!("{prefix}_flags"), value).await;
		}
		match etag {
			Some(etag) => self.storage.save(&format!("{prefix}_etag"), JsonValue::String(etag.to_string())).await,
			None => self.storage.delete(&format!("{prefix}_etag")).await,
		}
	}

	/// Applies a freshly fetched generation: stages into `pending` under
	/// explicit-sync mode (firing `pending_sync`), or diffs against the
	/// current active generation, notifies, and swaps the active slot last
	/// (§4.7) so handlers observe the prior generation during their own
	/// callback and the new one on any read-back afterward.
	async fn apply_generation(&self, new_gen: FlagGeneration) {
		if self.explicit_sync_mode.load(Ordering::Relaxed) {
			self.cache.set_pending(new_gen);
			self.emitter.emit(names::PENDING_SYNC);
			return;
		}

		let old = self.cache.active();
		let result = diff::diff(&old, &new_gen);
		diff::notify(&self.emitter, &result);
		self.stats.record_changed(result.changed.iter().map(|c| c.flag_name.clone()));
		self.cache.set_active(new_gen);
	}

	async fn maybe_recover(&self) {
		if self.stats.in_error_state.swap(false, Ordering::Relaxed) {
			self.stats.recovery_count.fetch_add(1, Ordering::Relaxed);
			*self.stats.last_recovery_time.lock().expect("stats poisoned") = Some(Utc::now());
			self.emitter.emit(names::RECOVERED);
		}
	}

	async fn fetch_once(&self) {
		let (offline, dev_mode) = {
			let config = self.config.read().expect("config lock poisoned");
			(config.offline_mode, config.enable_dev_mode)
		};
		if offline {
			return;
		}

		let config = self.config.read().expect("config lock poisoned").clone();
		let etag = self.etag.read().expect("etag lock poisoned").clone();

		if dev_mode {
			debug!(etag = etag.as_deref().unwrap_or(""), "[DEV] fetch attempt starting");
		}
		self.emitter.emit(names::FETCH_START);

		match fetch::fetch_flags(&self.http, &config, &self.connection_id, etag.as_deref()).await {
			Ok(FetchOutcome::NotModified) => {
				self.consecutive_failures.store(0, Ordering::Relaxed);
				self.stats.not_modified_count.fetch_add(1, Ordering::Relaxed);
				*self.stats.last_fetch_time.lock().expect("stats poisoned") = Some(Utc::now());
				self.emitter.emit(names::FETCH_SUCCESS);
				self.emitter.emit(names::FETCH_END);
				self.maybe_recover().await;
			}
			Ok(FetchOutcome::Updated { flags, etag: new_etag }) => {
				self.consecutive_failures.store(0, Ordering::Relaxed);
				self.stats.fetch_count.fetch_add(1, Ordering::Relaxed);
				self.stats.update_count.fetch_add(1, Ordering::Relaxed);
				let now = Utc::now();
				*self.stats.last_fetch_time.lock().expect("stats poisoned") = Some(now);
				*self.stats.last_update_time.lock().expect("stats poisoned") = Some(now);

				self.persist(&flags, new_etag.as_deref()).await;
				*self.etag.write().expect("etag lock poisoned") = new_etag;
				self.apply_generation(flags).await;

				self.emitter.emit(names::FETCH_SUCCESS);
				self.emitter.emit(names::FETCH_END);
				self.maybe_recover().await;
			}
			Err(failure) => {
				self.stats.record_error(failure.message.clone());
				self.emitter.emit_args(names::FETCH_ERROR, EventArgs::one(failure.message.clone()));
				self.emitter.emit_args(names::ERROR, EventArgs::one(failure.message.clone()));

				if failure.is_non_retryable(&config.fetch_retry_options) {
					warn!(status = ?failure.status, "non-retryable fetch failure; halting polling");
					self.polling_stopped.store(true, Ordering::Relaxed);
				} else {
					self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
				}
				self.emitter.emit(names::FETCH_END);
			}
		}
	}

	async fn upload_metrics_once(&self) {
		let (disable_metrics, config) = {
			let config = self.config.read().expect("config lock poisoned");
			(config.disable_metrics, config.clone())
		};
		if disable_metrics {
			return;
		}
		let bucket = self.metrics.rotate();
		if bucket.is_empty() {
			return;
		}
		match metrics::upload(&self.http, &config, &self.connection_id, bucket).await {
			Ok(()) => {
				self.stats.metrics_sent_count.fetch_add(1, Ordering::Relaxed);
				self.emitter.emit(names::METRICS_SENT);
			}
			Err(message) => {
				self.stats.metrics_error_count.fetch_add(1, Ordering::Relaxed);
				self.emitter.emit_args(names::METRICS_ERROR, EventArgs::one(message));
			}
		}
	}

	fn snapshot_stats(&self) -> ClientStats {
		let config = self.config.read().expect("config lock poisoned");
		let active = self.cache.active();
		let polling_stopped = self.polling_stopped.load(Ordering::Relaxed);
		let in_error = self.stats.in_error_state.load(Ordering::Relaxed);
		let state = sdk_state(polling_stopped, in_error).to_string();

		let features = FeatureStats {
			total_flags: active.len(),
			missing: self.stats.missing_counts.lock().expect("stats poisoned").clone(),
			fetch_count: self.stats.fetch_count.load(Ordering::Relaxed),
			update_count: self.stats.update_count.load(Ordering::Relaxed),
			not_modified_count: self.stats.not_modified_count.load(Ordering::Relaxed),
			recovery_count: self.stats.recovery_count.load(Ordering::Relaxed),
			error_count: self.stats.error_count.load(Ordering::Relaxed),
			state: state.clone(),
			last_fetch_time: *self.stats.last_fetch_time.lock().expect("stats poisoned"),
			last_update_time: *self.stats.last_update_time.lock().expect("stats poisoned"),
			last_recovery_time: *self.stats.last_recovery_time.lock().expect("stats poisoned"),
			last_error_time: *self.stats.last_error_time.lock().expect("stats poisoned"),
			enabled_counts: self.stats.enabled_counts.lock().expect("stats poisoned").clone(),
			sync_count: self.stats.sync_count.load(Ordering::Relaxed),
			active_watch_groups: self.stats.watch_group_names.lock().expect("stats poisoned").iter().cloned().collect(),
			etag: self.etag.read().expect("etag lock poisoned").clone(),
			impression_count: self.stats.impression_count.load(Ordering::Relaxed),
			context_change_count: self.stats.context_change_count.load(Ordering::Relaxed),
			last_changed: self.stats.last_changed.lock().expect("stats poisoned").clone(),
			metrics_sent_count: self.stats.metrics_sent_count.load(Ordering::Relaxed),
			metrics_error_count: self.stats.metrics_error_count.load(Ordering::Relaxed),
		};

		ClientStats {
			state,
			start_time: *self.stats.start_time.lock().expect("stats poisoned"),
			connection_id: self.connection_id.clone(),
			error_count: self.stats.error_count.load(Ordering::Relaxed),
			last_error: self.stats.last_error.lock().expect("stats poisoned").clone(),
			last_error_time: self.stats.last_error_time.lock().expect("stats poisoned").clone(),
			offline_mode: config.offline_mode,
			features,
			handlers: self.emitter.handler_stats(),
		}
	}
}

/// Builder for [`FlagsClient`]. Validates configuration and loads the
/// initial cache generation in [`FlagsClientBuilder::build`] — no timer,
/// request, or connection exists before that call returns.
pub struct FlagsClientBuilder {
	config: ClientConfig,
	storage: Option<Arc<dyn StorageProvider>>,
	http: Option<reqwest::Client>,
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self { config: ClientConfig::default(), storage: None, http: None }
	}
}

macro_rules! setter {
	($name:ident, $field:ident, $ty:ty) => {
		pub fn $name(mut self, value: $ty) -> Self {
			self.config.$field = value.into();
			self
		}
	};
}

impl FlagsClientBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	setter!(api_url, api_url, impl Into<String>);
	setter!(api_token, api_token, impl Into<String>);
	setter!(app_name, app_name, impl Into<String>);
	setter!(environment, environment, impl Into<String>);
	setter!(cache_key_prefix, cache_key_prefix, impl Into<String>);

	pub fn context(mut self, context: EvaluationContext) -> Self {
		self.config.context = context;
		self
	}

	pub fn custom_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.custom_headers.insert(key.into(), value.into());
		self
	}

	pub fn offline_mode(mut self, value: bool) -> Self {
		self.config.offline_mode = value;
		self
	}

	pub fn enable_dev_mode(mut self, value: bool) -> Self {
		self.config.enable_dev_mode = value;
		self
	}

	pub fn refresh_interval(mut self, value: Duration) -> Self {
		self.config.refresh_interval = value;
		self
	}

	pub fn disable_refresh(mut self, value: bool) -> Self {
		self.config.disable_refresh = value;
		self
	}

	pub fn use_post_requests(mut self, value: bool) -> Self {
		self.config.use_post_requests = value;
		self
	}

	pub fn fetch_retry_options(mut self, value: crate::config::FetchRetryOptions) -> Self {
		self.config.fetch_retry_options = value;
		self
	}

	pub fn disable_metrics(mut self, value: bool) -> Self {
		self.config.disable_metrics = value;
		self
	}

	pub fn disable_stats(mut self, value: bool) -> Self {
		self.config.disable_stats = value;
		self
	}

	pub fn impression_data_all(mut self, value: bool) -> Self {
		self.config.impression_data_all = value;
		self
	}

	pub fn metrics_interval(mut self, value: Duration) -> Self {
		self.config.metrics_interval = value;
		self
	}

	pub fn metrics_interval_initial(mut self, value: Duration) -> Self {
		self.config.metrics_interval_initial = value;
		self
	}

	pub fn explicit_sync_mode(mut self, value: bool) -> Self {
		self.config.explicit_sync_mode = value;
		self
	}

	pub fn bootstrap(mut self, value: Vec<EvaluatedFlag>) -> Self {
		self.config.bootstrap = value;
		self
	}

	pub fn bootstrap_override(mut self, value: bool) -> Self {
		self.config.bootstrap_override = value;
		self
	}

	pub fn streaming(mut self, value: crate::config::StreamingConfig) -> Self {
		self.config.streaming = value;
		self
	}

	/// Overrides the storage provider; defaults to an in-memory store if
	/// never called.
	pub fn storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn http_client(mut self, http: reqwest::Client) -> Self {
		self.http = Some(http);
		self
	}

	/// Validates the configuration, then fills the cache per the bootstrap
	/// precedence in §4.12: persisted storage wins when present; a
	/// non-empty `bootstrap` list replaces it when `bootstrap_override` is
	/// set, or fills it only if storage came back empty.
	pub async fn build(self) -> Result<FlagsClient> {
		crate::config::validate(&self.config)?;

		let storage: Arc<dyn StorageProvider> = self.storage.unwrap_or_else(|| Arc::new(InMemoryStorageProvider::new()));
		let http = self.http.unwrap_or_else(|| {
			reqwest::Client::builder().timeout(Duration::from_secs(30)).build().unwrap_or_default()
		});
		let connection_id = Uuid::new_v4().to_string();
		let emitter = Arc::new(EventEmitter::new());
		let cache = FlagCache::new();

		let prefix = self.config.cache_key_prefix.clone();
		let persisted_flags = storage
			.get(&format!("{prefix}_flags"))
			.await
			.and_then(|v| serde_json::from_value::<Vec<EvaluatedFlag>>(v).ok());
		let persisted_etag = storage.get(&format!("{prefix}_etag")).await.and_then(|v| v.as_str().map(str::to_string));

		let mut entered_bootstrap_path = false;
		let mut etag = None;

		if let Some(flags) = persisted_flags.filter(|f| !f.is_empty()) {
			let mut generation = FlagGeneration::new();
			for flag in flags {
				generation.insert(flag.name.clone(), flag);
			}
			cache.set_active(generation);
			etag = persisted_etag;
			entered_bootstrap_path = true;
		}

		if !self.config.bootstrap.is_empty() && (self.config.bootstrap_override || cache.active().is_empty()) {
			let mut generation = FlagGeneration::new();
			for flag in &self.config.bootstrap {
				generation.insert(flag.name.clone(), flag.clone());
			}
			cache.set_active(generation);
			entered_bootstrap_path = true;
		}

		if entered_bootstrap_path {
			emitter.emit(names::INIT);
			emitter.emit(names::READY);
		}

		let tasks = BackgroundTasks { poll: None, metrics: None, stream: None, stream_state: None };

		let inner = Arc::new(Inner {
			config: RwLock::new(self.config),
			http,
			cache,
			storage,
			emitter,
			metrics: MetricsAccumulator::new(),
			connection_id,
			etag: RwLock::new(etag),
			explicit_sync_mode: AtomicBool::new(false),
			polling_stopped: AtomicBool::new(false),
			consecutive_failures: AtomicU32::new(0),
			started: AtomicBool::new(false),
			stats: StatsState::default(),
			tasks: Mutex::new(tasks),
		});
		inner.explicit_sync_mode.store(inner.config.read().expect("config lock poisoned").explicit_sync_mode, Ordering::Relaxed);
		*inner.stats.start_time.lock().expect("stats poisoned") = Some(Utc::now());

		Ok(FlagsClient { inner })
	}
}

/// Accumulates flag-watch subscriptions under one name so they can be torn
/// down together (§4.13).
pub struct WatchGroupHandle {
	inner: Arc<Inner>,
	group: Mutex<WatchFlagGroup>,
}

impl WatchGroupHandle {
	pub fn name(&self) -> String {
		self.group.lock().expect("watch group poisoned").name().to_string()
	}

	pub fn size(&self) -> usize {
		self.group.lock().expect("watch group poisoned").size()
	}

	pub fn watch_flag(&self, flag_name: impl Into<String>, callback: Handler) {
		let flag_name = flag_name.into();
		let event = names::flag_change(&flag_name);
		let token = self.inner.emitter.on(event.clone(), "", callback);
		self.group.lock().expect("watch group poisoned").track(event, token);
	}

	pub fn unwatch_all(&self) {
		self.group.lock().expect("watch group poisoned").unwatch_all(&self.inner.emitter);
		self.inner.stats.watch_group_names.lock().expect("stats poisoned").remove(&self.name());
	}

	pub fn destroy(&self) {
		self.unwatch_all();
	}
}

/// The public feature-flag client. Cheap to clone — every clone shares the
/// same cache, timers, and connections.
#[derive(Clone)]
pub struct FlagsClient {
	inner: Arc<Inner>,
}

impl FlagsClient {
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	fn accessor(&self, force_realtime: bool) -> Arc<dyn FlagAccessor> {
		Arc::new(BoundAccessor { inner: self.inner.clone(), force_realtime })
	}

	/// A proxy bound to the active slot (or pending, if explicit-sync and
	/// `force_realtime=true` is later requested via [`FlagsClient::flag_realtime`]).
	pub fn flag(&self, name: impl Into<String>) -> FlagProxy {
		FlagProxy::new(name, self.accessor(false))
	}

	/// A proxy that reads the pending slot in preference to active when
	/// explicit-sync mode is enabled (§4.10).
	pub fn flag_realtime(&self, name: impl Into<String>) -> FlagProxy {
		FlagProxy::new(name, self.accessor(true))
	}

	pub fn is_enabled(&self, name: &str) -> bool {
		self.flag(name).enabled()
	}

	pub fn get_variant(&self, name: &str) -> Variant {
		self.flag(name).variant()
	}

	pub fn variation(&self, name: &str, fallback: &str) -> String {
		self.flag(name).variation(fallback)
	}

	pub fn bool_variation(&self, name: &str, fallback: bool) -> bool {
		self.flag(name).bool_variation(fallback)
	}

	pub fn bool_variation_details(&self, name: &str, fallback: bool) -> VariationDetails<bool> {
		self.flag(name).bool_variation_details(fallback)
	}

	pub fn bool_variation_or_throw(&self, name: &str) -> std::result::Result<bool, FeatureError> {
		self.flag(name).bool_variation_or_throw()
	}

	pub fn string_variation(&self, name: &str, fallback: &str) -> String {
		self.flag(name).string_variation(fallback)
	}

	pub fn string_variation_details(&self, name: &str, fallback: &str) -> VariationDetails<String> {
		self.flag(name).string_variation_details(fallback)
	}

	pub fn string_variation_or_throw(&self, name: &str) -> std::result::Result<String, FeatureError> {
		self.flag(name).string_variation_or_throw()
	}

	pub fn int_variation(&self, name: &str, fallback: i64) -> i64 {
		self.flag(name).int_variation(fallback)
	}

	pub fn int_variation_details(&self, name: &str, fallback: i64) -> VariationDetails<i64> {
		self.flag(name).int_variation_details(fallback)
	}

	pub fn int_variation_or_throw(&self, name: &str) -> std::result::Result<i64, FeatureError> {
		self.flag(name).int_variation_or_throw()
	}

	pub fn float_variation(&self, name: &str, fallback: f64) -> f64 {
		self.flag(name).float_variation(fallback)
	}

	pub fn float_variation_details(&self, name: &str, fallback: f64) -> VariationDetails<f64> {
		self.flag(name).float_variation_details(fallback)
	}

	pub fn float_variation_or_throw(&self, name: &str) -> std::result::Result<f64, FeatureError> {
		self.flag(name).float_variation_or_throw()
	}

	pub fn json_variation(&self, name: &str, fallback: JsonValue) -> JsonValue {
		self.flag(name).json_variation(fallback)
	}

	pub fn json_variation_details(&self, name: &str, fallback: JsonValue) -> VariationDetails<JsonValue> {
		self.flag(name).json_variation_details(fallback)
	}

	pub fn json_variation_or_throw(&self, name: &str) -> std::result::Result<JsonValue, FeatureError> {
		self.flag(name).json_variation_or_throw()
	}

	/// Subscribe to `<name>.change`. Returns a token for [`FlagsClient::unwatch`].
	pub fn watch_flag(&self, name: &str, callback: Handler) -> u64 {
		self.inner.emitter.on(names::flag_change(name), "", callback)
	}

	/// Like [`FlagsClient::watch_flag`], but invokes `callback` once
	/// immediately with the flag's current state before subscribing.
	pub fn watch_flag_with_initial_state(&self, name: &str, callback: Handler) -> u64 {
		let current = self.inner.lookup(name, false);
		let args = EventArgs::one(current).push(None::<EvaluatedFlag>);
		callback(&args);
		self.watch_flag(name, callback)
	}

	pub fn unwatch(&self, event: &str, token: u64) {
		self.inner.emitter.off(event, token);
	}

	pub fn on(&self, event: impl Into<String>, callback: Handler) -> u64 {
		self.inner.emitter.on(event, "", callback)
	}

	pub fn once(&self, event: impl Into<String>, callback: Handler) -> u64 {
		self.inner.emitter.once(event, "", callback)
	}

	pub fn on_any(&self, callback: crate::events::AnyHandler) -> u64 {
		self.inner.emitter.on_any("", callback)
	}

	pub fn off_any(&self, token: u64) {
		self.inner.emitter.off_any(token)
	}

	/// Creates a named batch of flag-change subscriptions (§4.13).
	pub fn create_watch_flag_group(&self, name: impl Into<String>) -> Arc<WatchGroupHandle> {
		let name = name.into();
		self.inner.stats.watch_group_names.lock().expect("stats poisoned").insert(name.clone());
		Arc::new(WatchGroupHandle { inner: self.inner.clone(), group: Mutex::new(WatchFlagGroup::new(name)) })
	}

	/// Replaces the evaluation context wholesale. Clears the cached ETag (a
	/// context change always forces a full fetch), resumes polling if it
	/// had halted on a non-retryable error, and triggers an immediate
	/// background re-fetch.
	pub async fn update_context(&self, context: EvaluationContext) {
		{
			let mut config = self.inner.config.write().expect("config lock poisoned");
			config.context = context;
		}
		*self.inner.etag.write().expect("etag lock poisoned") = None;
		self.inner.stats.context_change_count.fetch_add(1, Ordering::Relaxed);
		self.inner.polling_stopped.store(false, Ordering::Relaxed);
		self.inner.consecutive_failures.store(0, Ordering::Relaxed);

		if self.inner.started.load(Ordering::Relaxed) {
			let inner = self.inner.clone();
			tokio::spawn(async move { inner.fetch_once().await });
		}
	}

	/// Enables or disables explicit-sync mode at runtime. Disabling it
	/// flushes any staged pending generation into active immediately.
	pub async fn set_explicit_sync_mode(&self, enabled: bool) {
		let was_enabled = self.inner.explicit_sync_mode.swap(enabled, Ordering::Relaxed);
		if was_enabled && !enabled {
			self.commit_pending().await;
		}
	}

	async fn commit_pending(&self) -> bool {
		let Some(pending) = self.inner.cache.pending() else { return false };
		let old = self.inner.cache.active();
		let result = diff::diff(&old, &pending);
		diff::notify(&self.inner.emitter, &result);
		self.inner.stats.record_changed(result.changed.iter().map(|c| c.flag_name.clone()));
		self.inner.cache.commit_pending();
		true
	}

	/// Commits the staged pending generation into active, optionally
	/// fetching first. Fires `sync` exactly once if anything was staged.
	pub async fn sync_flags(&self, fetch_now: bool) {
		if fetch_now {
			self.inner.fetch_once().await;
		}
		if self.commit_pending().await {
			self.inner.stats.sync_count.fetch_add(1, Ordering::Relaxed);
			self.inner.emitter.emit(names::SYNC);
		}
	}

	pub fn get_stats(&self) -> ClientStats {
		self.inner.snapshot_stats()
	}

	pub fn connection_id(&self) -> &str {
		&self.inner.connection_id
	}

	fn streaming_url(config: &ClientConfig, transport: StreamingTransport) -> String {
		let base = config.api_url.trim_end_matches('/');
		let qs = fetch::context_query_string(&config.context, &config.app_name, &config.environment);
		match transport {
			StreamingTransport::Sse => {
				let url = config.streaming.sse.url.clone().unwrap_or_else(|| format!("{base}/client/features/{}/stream/sse", config.environment));
				format!("{url}?{qs}")
			}
			StreamingTransport::WebSocket => {
				let default_base = base.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
				let url = config
					.streaming
					.ws
					.url
					.clone()
					.unwrap_or_else(|| format!("{default_base}/client/features/{}/stream/ws", config.environment));
				format!("{url}?{qs}")
			}
		}
	}

	fn spawn_streaming(&self) {
		let config = self.inner.config.read().expect("config lock poisoned").clone();
		if !config.streaming.enabled {
			return;
		}

		let headers = fetch::common_headers(&config, &self.inner.connection_id);
		let state = Arc::new(StreamingState::new());
		let handlers: Arc<dyn StreamHandlers> = Arc::new(ClientStreamHandlers { inner: self.inner.clone() });
		let emitter = self.inner.emitter.clone();

		let handle = match config.streaming.transport {
			StreamingTransport::Sse => {
				let url = Self::streaming_url(&config, StreamingTransport::Sse);
				let sse = config.streaming.sse.clone();
				StreamHandle::Sse(streaming::sse::spawn(url, headers, state.clone(), emitter, handlers, sse.reconnect_base, sse.reconnect_max))
			}
			StreamingTransport::WebSocket => {
				let url = Self::streaming_url(&config, StreamingTransport::WebSocket);
				let ws = config.streaming.ws.clone();
				StreamHandle::WebSocket(streaming::websocket::spawn(url, headers, state.clone(), emitter, handlers, ws.reconnect_base, ws.reconnect_max))
			}
		};

		let mut tasks = self.inner.tasks.lock().expect("tasks lock poisoned");
		tasks.stream = Some(handle);
		tasks.stream_state = Some(state);
	}

	fn spawn_poll_loop(&self) {
		let config = self.inner.config.read().expect("config lock poisoned").clone();
		if config.disable_refresh || config.offline_mode {
			return;
		}

		let (tx, mut rx) = mpsc::channel(1);
		let inner = self.inner.clone();
		let handle = tokio::spawn(async move {
			loop {
				if inner.polling_stopped.load(Ordering::Relaxed) {
					return;
				}
				inner.fetch_once().await;
				let config = inner.config.read().expect("config lock poisoned").clone();
				let failures = inner.consecutive_failures.load(Ordering::Relaxed);
				let delay = fetch::next_refresh_delay(&config.fetch_retry_options, config.refresh_interval, failures);
				tokio::select! {
					_ = tokio::time::sleep(delay) => {}
					_ = rx.recv() => return,
				}
			}
		});

		self.inner.tasks.lock().expect("tasks lock poisoned").poll = Some((tx, handle));
	}

	fn spawn_metrics_loop(&self) {
		let config = self.inner.config.read().expect("config lock poisoned").clone();
		if config.disable_metrics {
			return;
		}

		let (tx, mut rx) = mpsc::channel(1);
		let inner = self.inner.clone();
		let handle = tokio::spawn(async move {
			let initial = inner.config.read().expect("config lock poisoned").metrics_interval_initial;
			tokio::select! {
				_ = tokio::time::sleep(initial) => {}
				_ = rx.recv() => { inner.upload_metrics_once().await; return; }
			}
			loop {
				inner.upload_metrics_once().await;
				let interval = inner.config.read().expect("config lock poisoned").metrics_interval;
				tokio::select! {
					_ = tokio::time::sleep(interval) => {}
					_ = rx.recv() => { inner.upload_metrics_once().await; return; }
				}
			}
		});

		self.inner.tasks.lock().expect("tasks lock poisoned").metrics = Some((tx, handle));
	}

	/// Starts the poll loop, metrics loop, and streaming connection (each
	/// gated by its own config toggle) and runs the first fetch. Idempotent:
	/// calling twice without an intervening `stop()` is a no-op.
	pub async fn start(&self) {
		if self.inner.started.swap(true, Ordering::Relaxed) {
			return;
		}
		self.inner.polling_stopped.store(false, Ordering::Relaxed);

		if !self.inner.config.read().expect("config lock poisoned").offline_mode {
			self.inner.fetch_once().await;
		}

		self.spawn_poll_loop();
		self.spawn_metrics_loop();
		self.spawn_streaming();
	}

	/// Idempotent shutdown: cancels the poll loop, drains metrics one final
	/// time, and closes the streaming connection. Never blocks beyond the
	/// in-flight HTTP timeout.
	pub async fn stop(&self) {
		if !self.inner.started.swap(false, Ordering::Relaxed) {
			return;
		}
		self.inner.polling_stopped.store(true, Ordering::Relaxed);

		let (poll, metrics, stream) = {
			let mut tasks = self.inner.tasks.lock().expect("tasks lock poisoned");
			(tasks.poll.take(), tasks.metrics.take(), tasks.stream.take())
		};

		if let Some((tx, handle)) = poll {
			let _ = tx.send(()).await;
			let _ = handle.await;
		}
		if let Some((tx, handle)) = metrics {
			let _ = tx.send(()).await;
			let _ = handle.await;
		} else {
			self.inner.upload_metrics_once().await;
		}
		if let Some(stream) = stream {
			stream.stop().await;
		}
	}

	/// The current connection state of the streaming transport, or
	/// `Disconnected` if streaming was never enabled.
	pub fn streaming_state(&self) -> ConnectionState {
		self.inner
			.tasks
			.lock()
			.expect("tasks lock poisoned")
			.stream_state
			.as_ref()
			.map(|s| s.state())
			.unwrap_or(ConnectionState::Disconnected)
	}
}
