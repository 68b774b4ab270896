//! Persistence tiers.
//!
//! The panel persists into two key-value stores: a slow cross-device
//! ("sync") tier and a fast device-local tier.  Both are shared with keys the
//! panel does not own, so writers only ever replace the keys they pass in.
//! Each `set` call is applied atomically: readers see either the old or the
//! new value of every key in the batch.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use normaliser_proto::state::{keys, SyncState};
use normaliser_proto::{AllowList, GainCurve, LocalState, PresetId, RefreshMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::lock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("storage rejected the write: {0}")]
    Rejected(String),
}

/// A key-value persistence backend.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces every key in `entries`, leaving all other keys untouched.
    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError>;
}

// ── JSON file backend ─────────────────────────────────────────────────────────

/// Keeps all keys of one tier in a single JSON object on disk.
///
/// Writes re-read the file first so keys written by other programs survive,
/// then replace it through a temp file + rename.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(Map::new()),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => Ok(map),
                _ => Ok(Map::new()),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageBackend for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut current = match self.read_all().await {
            Ok(map) => map,
            Err(StoreError::Serde(e)) => {
                warn!("store {:?}: existing file is corrupt ({}), rewriting", self.path, e);
                Map::new()
            }
            Err(e) => return Err(e),
        };
        current.extend(entries);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&Value::Object(current))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

// ── in-memory backend ─────────────────────────────────────────────────────────

/// One committed `set` call, stamped with the (tokio) time it landed.
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub at: Instant,
    pub entries: Map<String, Value>,
}

/// Process-local backend.  Keeps a log of every committed write and can be
/// told to reject upcoming writes, which makes it the backend of choice for
/// exercising the synchronizer and retry paths.
#[derive(Default)]
pub struct MemoryStore {
    data: StdMutex<Map<String, Value>>,
    writes: StdMutex<Vec<WriteRecord>>,
    reject_next: StdMutex<usize>,
    latency: StdMutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Map<String, Value>) -> Self {
        let store = Self::default();
        *lock(&store.data) = entries;
        store
    }

    /// Rejects the next `n` writes with `StoreError::Rejected`.
    pub fn reject_next_writes(&self, n: usize) {
        *lock(&self.reject_next) = n;
    }

    /// Delays every write by `latency` before it commits.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    /// Committed writes that touched `key`.
    pub fn writes_of(&self, key: &str) -> Vec<WriteRecord> {
        lock(&self.writes)
            .iter()
            .filter(|w| w.entries.contains_key(key))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        lock(&self.data).clone()
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(lock(&self.data).get(key).cloned())
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        {
            let mut reject = lock(&self.reject_next);
            if *reject > 0 {
                *reject -= 1;
                return Err(StoreError::Rejected("write rejected by memory store".into()));
            }
        }
        lock(&self.data).extend(entries.clone());
        lock(&self.writes).push(WriteRecord {
            at: Instant::now(),
            entries,
        });
        Ok(())
    }
}

// ── tier: retries + warn-once ─────────────────────────────────────────────────

/// Retry schedule for persistence writes.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    attempts: u32,
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// A named storage tier.  Writes are retried with exponential backoff; a
/// key that keeps failing is reported at `warn` once, then at `debug` until
/// a write of it succeeds again.
#[derive(Clone)]
pub struct Tier {
    name: &'static str,
    backend: Arc<dyn StorageBackend>,
    retry: RetryPolicy,
    failing: Arc<StdMutex<HashSet<String>>>,
}

impl Tier {
    pub fn new(name: &'static str, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            name,
            backend,
            retry: RetryPolicy::default(),
            failing: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Reads and decodes one key.  Missing keys and values of the wrong
    /// shape both come back as `None`.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(value) = self.backend.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                debug!("{} tier: ignoring malformed {:?}: {}", self.name, key, e);
                Ok(None)
            }
        }
    }

    pub async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let mut entries = Map::new();
        entries.insert(key.to_string(), serde_json::to_value(value)?);
        self.write_all(entries).await
    }

    pub async fn write_all(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let keys: Vec<String> = entries.keys().cloned().collect();
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;
        loop {
            match self.backend.set(entries.clone()).await {
                Ok(()) => {
                    self.mark_recovered(&keys);
                    return Ok(());
                }
                Err(e) if attempt < self.retry.attempts => {
                    debug!(
                        "{} tier: write of {:?} failed (attempt {}): {}",
                        self.name, keys, attempt, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    self.report_failure(&keys, &e);
                    return Err(e);
                }
            }
        }
    }

    fn report_failure(&self, keys: &[String], err: &StoreError) {
        let mut failing = lock(&self.failing);
        let fresh: Vec<&String> = keys.iter().filter(|k| !failing.contains(*k)).collect();
        if fresh.is_empty() {
            debug!("{} tier: {:?} still failing: {}", self.name, keys, err);
        } else {
            warn!(
                "{} tier: giving up on {:?} after {} attempts: {}",
                self.name, keys, self.retry.attempts, err
            );
        }
        failing.extend(keys.iter().cloned());
    }

    fn mark_recovered(&self, keys: &[String]) {
        let mut failing = lock(&self.failing);
        for key in keys {
            if failing.remove(key) {
                info!("{} tier: {:?} persisted again", self.name, key);
            }
        }
    }
}

/// The two tiers the panel persists into.
#[derive(Clone)]
pub struct Tiers {
    pub sync: Tier,
    pub local: Tier,
}

impl Tiers {
    pub fn new(sync: Arc<dyn StorageBackend>, local: Arc<dyn StorageBackend>) -> Self {
        Self {
            sync: Tier::new("sync", sync),
            local: Tier::new("local", local),
        }
    }

    /// File-backed tiers at the configured paths.
    pub fn from_files(sync_file: PathBuf, local_file: PathBuf) -> Self {
        Self::new(
            Arc::new(JsonFileStore::new(sync_file)),
            Arc::new(JsonFileStore::new(local_file)),
        )
    }

    /// Reads every SyncState key, each falling back to its own default.
    pub async fn load_sync_state(&self) -> SyncState {
        let defaults = SyncState::default();
        let tier = &self.sync;
        SyncState {
            enabled: read_or(tier, keys::ENABLED, defaults.enabled).await,
            apply_all: read_or(tier, keys::APPLY_ALL, defaults.apply_all).await,
            allowlist: read_or::<AllowList>(tier, keys::ALLOWLIST, defaults.allowlist).await,
            gain_value: read_or(tier, keys::GAIN_VALUE, defaults.gain_value).await,
            eq_bands: read_or::<GainCurve>(tier, keys::EQ_BANDS, defaults.eq_bands).await,
            custom_presets: read_or(tier, keys::CUSTOM_PRESETS, defaults.custom_presets).await,
            last_preset: read_or::<PresetId>(tier, keys::LAST_PRESET, defaults.last_preset).await,
            refresh_mode: read_or::<RefreshMode>(tier, keys::REFRESH_MODE, defaults.refresh_mode)
                .await,
        }
    }

    pub async fn load_local_state(&self) -> LocalState {
        LocalState {
            eq_bands: read_or(&self.local, keys::EQ_BANDS, None).await,
        }
    }
}

async fn read_or<T: DeserializeOwned>(tier: &Tier, key: &str, default: T) -> T {
    match tier.read::<T>(key).await {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(e) => {
            warn!("{} tier: reading {:?} failed, using default: {}", tier.name(), key, e);
            default
        }
    }
}
