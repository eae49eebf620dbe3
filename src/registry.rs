//! File Registry
//!
//! Owns the authoritative table of tracked resources. Each entry is keyed by
//! the normalized resource identifier (see [`crate::paths::normalize_path`])
//! and remembers the location it was first tracked from, which is what gets
//! hashed and stat'ed.
//!
//! Invariants kept by every mutation here:
//! - `lock_holder` is set iff `lock_status != Free`
//! - `readers` is non-empty only while `lock_status == Read`
//! - under a read lock, `lock_expires_at` is the latest reader expiry
//! - `version` only grows, by exactly one per observed content change

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hash;

// =============================================================================
// Lock Status
// =============================================================================

/// Current lock state of a tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    #[default]
    Free,
    Read,
    Write,
    Exclusive,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockStatus::Free => write!(f, "free"),
            LockStatus::Read => write!(f, "read"),
            LockStatus::Write => write!(f, "write"),
            LockStatus::Exclusive => write!(f, "exclusive"),
        }
    }
}

// =============================================================================
// File State
// =============================================================================

/// Observed state and lock state of one tracked resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileState {
    /// Normalized identifier
    pub path: String,

    /// Absolute on-disk location as first supplied
    pub location: PathBuf,

    /// SHA-256 hex of the last observed content, empty if absent
    pub content_hash: String,

    /// Time of the last observed change
    pub last_modified: DateTime<Utc>,

    /// Agent that last created or modified the resource
    pub last_agent: String,

    pub lock_status: LockStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_holder: Option<String>,

    /// Agents sharing a read lock (includes `lock_holder`), each with its
    /// own lease expiry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub readers: BTreeMap<String, DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expires_at: Option<DateTime<Utc>>,

    pub version: u64,
}

impl FileState {
    /// Build the initial state for a newly tracked resource.
    pub fn track(path: String, location: &Path, agent: &str) -> Result<Self> {
        let observation = Observation::capture(location)?;
        Ok(Self {
            path,
            location: location.to_path_buf(),
            content_hash: observation.content_hash,
            last_modified: observation.modified_at,
            last_agent: agent.to_string(),
            lock_status: LockStatus::Free,
            lock_holder: None,
            readers: BTreeMap::new(),
            lock_expires_at: None,
            version: 1,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.lock_status != LockStatus::Free
    }

    /// Whether the current lease has run out at `now`.
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lock_expires_at {
            Some(expires_at) => self.is_locked() && now >= expires_at,
            None => false,
        }
    }

    /// Whether `agent` holds any part of the current lock.
    pub fn is_held_by(&self, agent: &str) -> bool {
        self.lock_holder.as_deref() == Some(agent) || self.readers.contains_key(agent)
    }

    /// Agents currently holding the lock, primary holder first.
    pub fn holders(&self) -> Vec<String> {
        let mut holders: Vec<String> = self.lock_holder.iter().cloned().collect();
        holders.extend(
            self.readers
                .keys()
                .filter(|reader| Some(reader.as_str()) != self.lock_holder.as_deref())
                .cloned(),
        );
        holders
    }

    /// Drop readers whose own lease has run out at `now`.
    ///
    /// Frees the lock when no reader is left, moves `lock_holder` to a
    /// remaining reader if it was dropped, and pulls `lock_expires_at` back
    /// to the latest remaining expiry. Returns the dropped readers.
    pub fn prune_expired_readers(&mut self, now: DateTime<Utc>) -> Vec<String> {
        if self.lock_status != LockStatus::Read {
            return Vec::new();
        }
        let expired: Vec<String> = self
            .readers
            .iter()
            .filter(|(_, expires_at)| now >= **expires_at)
            .map(|(reader, _)| reader.clone())
            .collect();
        if expired.is_empty() {
            return expired;
        }
        for reader in &expired {
            self.readers.remove(reader);
        }
        self.settle_readers();
        expired
    }

    /// Re-derive holder and expiry after the reader set changed.
    pub fn settle_readers(&mut self) {
        if self.readers.is_empty() {
            self.clear_lock();
            return;
        }
        let holder_left = self
            .lock_holder
            .as_deref()
            .map_or(true, |holder| !self.readers.contains_key(holder));
        if holder_left {
            self.lock_holder = self.readers.keys().next().cloned();
        }
        self.lock_expires_at = self.readers.values().max().copied();
    }

    /// Drop every lock field back to `Free`.
    pub fn clear_lock(&mut self) {
        self.lock_status = LockStatus::Free;
        self.lock_holder = None;
        self.readers.clear();
        self.lock_expires_at = None;
    }

    /// Apply an observation whose hash differs from the stored one.
    ///
    /// Returns the new version.
    pub fn record_change(&mut self, observation: Observation) -> u64 {
        self.content_hash = observation.content_hash;
        self.last_modified = observation.modified_at;
        if let Some(holder) = &self.lock_holder {
            self.last_agent = holder.clone();
        }
        self.version += 1;
        self.version
    }
}

/// A point-in-time reading of a resource's content and mtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
}

impl Observation {
    /// Hash and stat `location`. A missing file reads as an empty hash at `now`.
    pub fn capture(location: &Path) -> Result<Self> {
        let content_hash = hash::content_hash(location)?;
        let modified_at = hash::modified_at(location)?.unwrap_or_else(Utc::now);
        Ok(Self {
            content_hash,
            modified_at,
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Table of tracked resources keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    files: BTreeMap<String, FileState>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted `(path, FileState)` pairs.
    pub fn from_entries(entries: Vec<(String, FileState)>) -> Self {
        Self {
            files: entries.into_iter().collect(),
        }
    }

    /// Snapshot as `(path, FileState)` pairs in path order.
    pub fn entries(&self) -> Vec<(String, FileState)> {
        self.files
            .iter()
            .map(|(path, state)| (path.clone(), state.clone()))
            .collect()
    }

    pub fn get(&self, path: &str) -> Option<&FileState> {
        self.files.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut FileState> {
        self.files.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn insert(&mut self, state: FileState) {
        self.files.insert(state.path.clone(), state);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileState> {
        self.files.remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileState> {
        self.files.values()
    }

    /// Paths on which `agent` holds any lock.
    pub fn locked_by(&self, agent: &str) -> Vec<String> {
        self.files
            .values()
            .filter(|state| state.is_held_by(agent))
            .map(|state| state.path.clone())
            .collect()
    }

    /// Number of resources with a lock that has not yet expired at `now`.
    pub fn active_locks(&self, now: DateTime<Utc>) -> usize {
        self.files
            .values()
            .filter(|state| state.is_locked() && !state.is_lock_expired(now))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tracked(dir: &Path, name: &str, content: &str) -> FileState {
        let location = dir.join(name);
        fs::write(&location, content).unwrap();
        FileState::track(name.to_string(), &location, "agent-a").unwrap()
    }

    #[test]
    fn new_state_is_free_at_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let state = tracked(dir.path(), "plan.txt", "hello");
        assert_eq!(state.lock_status, LockStatus::Free);
        assert!(state.lock_holder.is_none());
        assert!(state.lock_expires_at.is_none());
        assert_eq!(state.version, 1);
        assert_eq!(state.last_agent, "agent-a");
        assert!(!state.content_hash.is_empty());
    }

    #[test]
    fn absent_resource_tracks_with_empty_hash() {
        let dir = tempfile::tempdir().unwrap();
        let state = FileState::track("ghost".into(), &dir.path().join("ghost"), "a").unwrap();
        assert_eq!(state.content_hash, "");
    }

    #[test]
    fn record_change_bumps_version_and_attributes_holder() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = tracked(dir.path(), "plan.txt", "hello");
        state.lock_status = LockStatus::Write;
        state.lock_holder = Some("agent-b".to_string());

        let next = Observation {
            content_hash: "abc".to_string(),
            modified_at: state.last_modified + chrono::Duration::seconds(1),
        };
        assert_eq!(state.record_change(next), 2);
        assert_eq!(state.content_hash, "abc");
        assert_eq!(state.last_agent, "agent-b");
    }

    #[test]
    fn holders_lists_primary_then_readers() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = tracked(dir.path(), "plan.txt", "hello");
        state.lock_status = LockStatus::Read;
        state.lock_holder = Some("b".to_string());
        let expires_at = Utc::now() + chrono::Duration::minutes(5);
        state.readers = ["a", "b", "c"]
            .iter()
            .map(|s| (s.to_string(), expires_at))
            .collect();
        assert_eq!(state.holders(), vec!["b", "a", "c"]);
        assert!(state.is_held_by("c"));

        state.clear_lock();
        assert!(!state.is_locked());
        assert!(state.readers.is_empty());
        assert!(!state.is_held_by("b"));
    }

    #[test]
    fn registry_counts_only_live_locks() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = FileRegistry::new();
        let now = Utc::now();

        let mut live = tracked(dir.path(), "a.txt", "a");
        live.lock_status = LockStatus::Write;
        live.lock_holder = Some("x".into());
        live.lock_expires_at = Some(now + chrono::Duration::minutes(5));
        registry.insert(live);

        let mut stale = tracked(dir.path(), "b.txt", "b");
        stale.lock_status = LockStatus::Exclusive;
        stale.lock_holder = Some("x".into());
        stale.lock_expires_at = Some(now - chrono::Duration::seconds(1));
        registry.insert(stale);

        registry.insert(tracked(dir.path(), "c.txt", "c"));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.active_locks(now), 1);
        assert_eq!(registry.locked_by("x"), vec!["a.txt", "b.txt"]);
    }
}
