//! State Store for fcoord
//!
//! Durable persistence of the two coordination aggregates over an abstract
//! key-value capability:
//!
//! ```text
//! file_states      # FileStateSnapshot: (path, FileState) pairs + saved_at
//! shared_context   # ContextSnapshot: agents, mailboxes, intents, globals
//! ```
//!
//! Two backends are provided. [`DirStore`] keeps each key in
//! `<dir>/<key>.json`, serializing writers across processes with an advisory
//! lock on `<key>.json.lock` and replacing the file atomically. [`MemoryStore`]
//! keeps bytes in memory and is cheap to clone, so two service instances can
//! share one to simulate a restart.
//!
//! Loading never fails: missing or corrupt snapshots are logged and replaced
//! by empty state. Saving propagates every error.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::{ContextSnapshot, SharedContext};
use crate::error::{Error, Result};
use crate::registry::{FileRegistry, FileState};

/// Key of the file-state blob
pub const FILE_STATES_KEY: &str = "file_states";

/// Key of the shared-context blob
pub const SHARED_CONTEXT_KEY: &str = "shared_context";

/// Schema version written into both blobs
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Sidecar locked by [`DirStore::session_lock`]
const SESSION_LOCK_FILE: &str = "session.lock";

/// Retry interval while waiting for a contended store lock
const LOCK_RETRY_INTERVAL_MS: u64 = 25;

// =============================================================================
// Key-value capability
// =============================================================================

/// Externally supplied durable key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the value stored under `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// In-memory key-value store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Directory-backed key-value store (one JSON file per key).
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
    lock_timeout_ms: u64,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout_ms: u64) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout_ms,
        }
    }

    /// Directory holding the blobs
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`
    pub fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Lock the whole store for a multi-step session (one CLI command).
    ///
    /// Per-key locks only make single reads and writes atomic; a process
    /// that loads, mutates and saves both blobs holds this for the duration.
    pub fn session_lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.dir.join(SESSION_LOCK_FILE), self.lock_timeout_ms)
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json.lock"))
    }

    fn check_key(key: &str) -> Result<()> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!("invalid store key '{key}'")))
        }
    }
}

impl KeyValueStore for DirStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Self::check_key(key)?;
        let path = self.key_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let _lock = StoreLock::acquire(&self.lock_path(key), self.lock_timeout_ms)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        Self::check_key(key)?;
        fs::create_dir_all(&self.dir)?;

        let _lock = StoreLock::acquire(&self.lock_path(key), self.lock_timeout_ms)?;

        // Temp file in the same directory so the rename stays atomic.
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(value)?;
        temp.as_file().sync_all()?;
        temp.persist(self.key_path(key)).map_err(|err| err.error)?;
        Ok(())
    }
}

/// Advisory lock on a sidecar file, released on drop.
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Lock `path` exclusively, retrying until `timeout_ms` elapses.
    pub fn acquire(path: &Path, timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(Error::StoreLockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS));
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Persisted form of the file-state table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStateSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub files: Vec<(String, FileState)>,
}

/// Serializes the coordination aggregates through a [`KeyValueStore`].
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// A store over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Load the file-state table, or an empty one if unavailable.
    pub fn load_files(&self) -> FileRegistry {
        match self.load::<FileStateSnapshot>(FILE_STATES_KEY) {
            Some(snapshot) => {
                debug!(files = snapshot.files.len(), "hydrated file states");
                FileRegistry::from_entries(snapshot.files)
            }
            None => FileRegistry::new(),
        }
    }

    /// Persist the file-state table.
    pub fn save_files(&self, registry: &FileRegistry) -> Result<()> {
        let snapshot = FileStateSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            files: registry.entries(),
        };
        self.save(FILE_STATES_KEY, &snapshot)
    }

    /// Load the shared context, or an empty one if unavailable.
    pub fn load_context(&self) -> SharedContext {
        match self.load::<ContextSnapshot>(SHARED_CONTEXT_KEY) {
            Some(snapshot) => {
                debug!(
                    agents = snapshot.active_agents.len(),
                    "hydrated shared context"
                );
                SharedContext::from_snapshot(snapshot)
            }
            None => SharedContext::new(),
        }
    }

    /// Persist the shared context.
    pub fn save_context(&self, context: &SharedContext) -> Result<()> {
        self.save(SHARED_CONTEXT_KEY, &context.to_snapshot())
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "failed to read snapshot; starting empty");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "corrupt snapshot; starting empty");
                None
            }
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        self.backend.put(key, &json)
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore").finish_non_exhaustive()
    }
}
