// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pluggable key/value cache backing the flag/ETag persistence layer.
//!
//! Two operations matter for bootstrap: a failed `get` returns `None` rather
//! than an error, so a cold or corrupted store never blocks startup. Two
//! built-in implementations are provided: an in-memory map and a
//! file-backed store that persists each key as a JSON document under a
//! sanitized filename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

/// Two-key-plus-delete cache interface. `get` never surfaces I/O errors to
/// the caller — a missing or unreadable entry is indistinguishable from a
/// cold start.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageProvider: Send + Sync {
	async fn get(&self, key: &str) -> Option<Value>;
	async fn save(&self, key: &str, value: Value);
	async fn delete(&self, key: &str);
}

/// Thread-safe in-memory store. No persistence across process restarts.
#[derive(Default)]
pub struct InMemoryStorageProvider {
	data: Mutex<HashMap<String, Value>>,
}

impl InMemoryStorageProvider {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageProvider for InMemoryStorageProvider {
	async fn get(&self, key: &str) -> Option<Value> {
		self.data.lock().expect("storage mutex poisoned").get(key).cloned()
	}

	async fn save(&self, key: &str, value: Value) {
		self.data.lock().expect("storage mutex poisoned").insert(key.to_string(), value);
	}

	async fn delete(&self, key: &str) {
		self.data.lock().expect("storage mutex poisoned").remove(key);
	}
}

/// File-based persistent store. Each key is one JSON file under `directory`;
/// non-alphanumeric characters in the key (other than `_`/`-`) are replaced
/// with `_` to produce a safe filename. Entries may be deleted out-of-band
/// (e.g. by an operator clearing the cache directory) without corrupting the
/// runtime — a missing file reads back as a cold start, same as a fresh
/// in-memory store.
pub struct FileStorageProvider {
	directory: PathBuf,
}

impl FileStorageProvider {
	/// Creates the backing directory if it doesn't already exist.
	pub fn new(directory: impl Into<PathBuf>) -> std::io::Result<Self> {
		let directory = directory.into();
		std::fs::create_dir_all(&directory)?;
		Ok(Self { directory })
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let safe: String = key
			.chars()
			.map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
			.collect();
		self.directory.join(format!("{safe}.json"))
	}
}

fn read_json(path: &Path) -> Option<Value> {
	let bytes = std::fs::read(path).ok()?;
	serde_json::from_slice(&bytes).ok()
}

fn write_json(path: &Path, value: &Value) -> std::io::Result<()> {
	let bytes = serde_json::to_vec(value)?;
	std::fs::write(path, bytes)
}

#[async_trait]
impl StorageProvider for FileStorageProvider {
	async fn get(&self, key: &str) -> Option<Value> {
		let path = self.path_for(key);
		tokio::task::spawn_blocking(move || read_json(&path)).await.unwrap_or(None)
	}

	async fn save(&self, key: &str, value: Value) {
		let path = self.path_for(key);
		let _ = tokio::task::spawn_blocking(move || write_json(&path, &value)).await;
	}

	async fn delete(&self, key: &str) {
		let path = self.path_for(key);
		let _ = tokio::task::spawn_blocking(move || {
			if path.exists() {
				let _ = std::fs::remove_file(&path);
			}
		})
		.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn in_memory_get_returns_none_for_missing_key() {
		let storage = InMemoryStorageProvider::new();
		assert_eq!(storage.get("missing").await, None);
	}

	#[tokio::test]
	async fn in_memory_save_then_get_roundtrips() {
		let storage = InMemoryStorageProvider::new();
		storage.save("k", serde_json::json!({"a": 1})).await;
		assert_eq!(storage.get("k").await, Some(serde_json::json!({"a": 1})));
	}

	#[tokio::test]
	async fn in_memory_delete_clears_entry() {
		let storage = InMemoryStorageProvider::new();
		storage.save("k", serde_json::json!(1)).await;
		storage.delete("k").await;
		assert_eq!(storage.get("k").await, None);
	}

	#[tokio::test]
	async fn file_storage_roundtrips_and_sanitizes_filenames() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorageProvider::new(dir.path()).unwrap();
		storage.save("prefix_flags", serde_json::json!([1, 2, 3])).await;
		assert_eq!(storage.get("prefix_flags").await, Some(serde_json::json!([1, 2, 3])));

		storage.save("weird/key:name", serde_json::json!("x")).await;
		assert_eq!(storage.get("weird/key:name").await, Some(serde_json::json!("x")));

		let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
		assert_eq!(entries.len(), 2);
	}

	#[tokio::test]
	async fn file_storage_missing_entry_is_cold_start() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorageProvider::new(dir.path()).unwrap();
		assert_eq!(storage.get("never_saved").await, None);
	}

	#[tokio::test]
	async fn file_storage_delete_then_get_is_none() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorageProvider::new(dir.path()).unwrap();
		storage.save("k", serde_json::json!(true)).await;
		storage.delete("k").await;
		assert_eq!(storage.get("k").await, None);
	}

	#[tokio::test]
	async fn file_storage_survives_corrupt_file() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorageProvider::new(dir.path()).unwrap();
		let path = storage.path_for("k");
		std::fs::write(&path, b"not json").unwrap();
		assert_eq!(storage.get("k").await, None);
	}
}
