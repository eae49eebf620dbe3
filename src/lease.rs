//! Lock Manager for fcoord
//!
//! Locks are leases: every grant carries an expiry, and an expired lease is
//! reclaimed lazily by the next contending request rather than by a sweeper.
//!
//! # Lock Kinds
//!
//! - `read`: shared; any number of agents may hold read together
//! - `write`: exclusive of every other agent's lock
//! - `exclusive`: exclusive of every other agent's lock
//!
//! An agent that is the sole holder may re-request any kind, which renews
//! (or upgrades/downgrades) its own lease.
//!
//! Shared readers each carry their own expiry. A reader whose lease ran out
//! is dropped by the next request even while other readers keep joining.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::registry::{FileState, LockStatus};

// =============================================================================
// Lock Kind
// =============================================================================

/// Kind of lock an agent can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    /// Shared read access
    Read,
    /// Single writer
    Write,
    /// Single holder, no concurrent access of any kind
    Exclusive,
}

impl LockKind {
    /// Check whether a lock of this kind can coexist with `held` across agents.
    pub fn is_compatible_with(&self, held: LockStatus) -> bool {
        match (self, held) {
            (_, LockStatus::Free) => true,
            (LockKind::Read, LockStatus::Read) => true,
            _ => false,
        }
    }
}

impl From<LockKind> for LockStatus {
    fn from(kind: LockKind) -> Self {
        match kind {
            LockKind::Read => LockStatus::Read,
            LockKind::Write => LockStatus::Write,
            LockKind::Exclusive => LockStatus::Exclusive,
        }
    }
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Read => write!(f, "read"),
            LockKind::Write => write!(f, "write"),
            LockKind::Exclusive => write!(f, "exclusive"),
        }
    }
}

impl FromStr for LockKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "read" | "r" | "shared" => Ok(LockKind::Read),
            "write" | "w" => Ok(LockKind::Write),
            "exclusive" | "x" | "excl" => Ok(LockKind::Exclusive),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid lock kind '{}'. Expected: read, write, exclusive",
                s
            ))),
        }
    }
}

// =============================================================================
// Decisions
// =============================================================================

/// Outcome of a lock attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    Granted {
        expires_at: DateTime<Utc>,
        /// Holder whose expired lease was reclaimed to make room
        reclaimed_from: Option<String>,
    },
    Blocked {
        holder: String,
        held: LockStatus,
    },
}

impl LockDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockDecision::Granted { .. })
    }
}

// =============================================================================
// Lock Manager
// =============================================================================

/// Grants, denies, reclaims and releases leases on registry entries.
#[derive(Debug, Clone)]
pub struct LockManager {
    lease_ttl: Duration,
}

impl LockManager {
    pub fn new(lease_ttl: Duration) -> Self {
        Self { lease_ttl }
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Compatibility check without side effects.
    ///
    /// Granted iff the resource is free, `agent` is its sole holder, or both
    /// the held and requested kinds are read.
    pub fn check(&self, state: &FileState, agent: &str, kind: LockKind) -> Option<String> {
        if !state.is_locked() {
            return None;
        }
        let holders = state.holders();
        if holders.len() == 1 && holders[0] == agent {
            return None;
        }
        if kind.is_compatible_with(state.lock_status) {
            return None;
        }
        Some(state.lock_holder.clone().unwrap_or_default())
    }

    /// Attempt to acquire `kind` on `state` for `agent` at `now`.
    ///
    /// Reclaims an expired lease before giving up. Mutates `state` only when
    /// the lock is granted or an expired lease is dropped.
    pub fn try_acquire(
        &self,
        state: &mut FileState,
        agent: &str,
        kind: LockKind,
        now: DateTime<Utc>,
    ) -> LockDecision {
        let mut reclaimed_from = None;

        let previous = state.lock_holder.clone();
        let expired = state.prune_expired_readers(now);
        if !expired.is_empty() {
            info!(path = %state.path, readers = ?expired, "dropped expired readers");
            if !state.is_locked() {
                reclaimed_from = previous;
            }
        }

        if let Some(holder) = self.check(state, agent, kind) {
            if !state.is_lock_expired(now) {
                return LockDecision::Blocked {
                    holder,
                    held: state.lock_status,
                };
            }
            info!(
                path = %state.path,
                previous = %holder,
                requester = agent,
                "reclaiming expired lease"
            );
            state.clear_lock();
            reclaimed_from = Some(holder);
        }

        let expires_at = self.grant(state, agent, kind, now);
        LockDecision::Granted {
            expires_at,
            reclaimed_from,
        }
    }

    /// Record a grant. Callers must have checked compatibility.
    fn grant(
        &self,
        state: &mut FileState,
        agent: &str,
        kind: LockKind,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let expires_at = now + self.lease_ttl;

        if kind == LockKind::Read && state.lock_status == LockStatus::Read {
            state.readers.insert(agent.to_string(), expires_at);
            state.settle_readers();
            debug!(path = %state.path, agent, readers = state.readers.len(), "shared read granted");
            return expires_at;
        }

        state.lock_status = kind.into();
        state.lock_holder = Some(agent.to_string());
        state.readers.clear();
        if kind == LockKind::Read {
            state.readers.insert(agent.to_string(), expires_at);
        }
        state.lock_expires_at = Some(expires_at);
        debug!(path = %state.path, agent, %kind, "lock granted");
        expires_at
    }

    /// Release `agent`'s hold on `state`. Returns false if it held nothing.
    pub fn release(&self, state: &mut FileState, agent: &str) -> bool {
        if !state.is_held_by(agent) {
            return false;
        }

        if state.lock_status == LockStatus::Read {
            state.readers.remove(agent);
            state.settle_readers();
        } else {
            state.clear_lock();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn free_state() -> FileState {
        FileState {
            path: "/proj/plan.txt".to_string(),
            location: PathBuf::from("/proj/plan.txt"),
            content_hash: String::new(),
            last_modified: Utc::now(),
            last_agent: "c".to_string(),
            lock_status: LockStatus::Free,
            lock_holder: None,
            readers: BTreeMap::new(),
            lock_expires_at: None,
            version: 1,
        }
    }

    fn manager() -> LockManager {
        LockManager::new(Duration::minutes(5))
    }

    #[test]
    fn compatibility_matrix() {
        use LockKind::*;
        for kind in [Read, Write, Exclusive] {
            assert!(kind.is_compatible_with(LockStatus::Free));
        }
        assert!(Read.is_compatible_with(LockStatus::Read));
        assert!(!Read.is_compatible_with(LockStatus::Write));
        assert!(!Write.is_compatible_with(LockStatus::Read));
        assert!(!Write.is_compatible_with(LockStatus::Write));
        assert!(!Exclusive.is_compatible_with(LockStatus::Exclusive));
        assert!(!Read.is_compatible_with(LockStatus::Exclusive));
    }

    #[test]
    fn parse_kinds() {
        assert_eq!("WRITE".parse::<LockKind>().unwrap(), LockKind::Write);
        assert_eq!("shared".parse::<LockKind>().unwrap(), LockKind::Read);
        assert!("free".parse::<LockKind>().is_err());
    }

    #[test]
    fn write_blocks_other_agents() {
        let manager = manager();
        let mut state = free_state();
        let now = Utc::now();

        assert!(manager.try_acquire(&mut state, "a", LockKind::Write, now).is_granted());
        let decision = manager.try_acquire(&mut state, "b", LockKind::Write, now);
        assert_eq!(
            decision,
            LockDecision::Blocked {
                holder: "a".to_string(),
                held: LockStatus::Write
            }
        );
        assert_eq!(state.lock_holder.as_deref(), Some("a"));
    }

    #[test]
    fn readers_share_and_release_independently() {
        let manager = manager();
        let mut state = free_state();
        let now = Utc::now();

        assert!(manager.try_acquire(&mut state, "a", LockKind::Read, now).is_granted());
        assert!(manager.try_acquire(&mut state, "b", LockKind::Read, now).is_granted());
        assert!(!manager.try_acquire(&mut state, "c", LockKind::Write, now).is_granted());

        assert!(manager.release(&mut state, "a"));
        assert_eq!(state.lock_status, LockStatus::Read);
        assert_eq!(state.lock_holder.as_deref(), Some("b"));

        assert!(manager.release(&mut state, "b"));
        assert_eq!(state.lock_status, LockStatus::Free);
        assert!(state.lock_holder.is_none());
    }

    #[test]
    fn sole_reader_can_upgrade_but_shared_reader_cannot() {
        let manager = manager();
        let mut state = free_state();
        let now = Utc::now();

        manager.try_acquire(&mut state, "a", LockKind::Read, now);
        assert!(manager.try_acquire(&mut state, "a", LockKind::Write, now).is_granted());
        assert_eq!(state.lock_status, LockStatus::Write);
        assert!(state.readers.is_empty());

        let mut shared = free_state();
        manager.try_acquire(&mut shared, "a", LockKind::Read, now);
        manager.try_acquire(&mut shared, "b", LockKind::Read, now);
        assert!(!manager.try_acquire(&mut shared, "a", LockKind::Write, now).is_granted());
    }

    #[test]
    fn expired_lease_is_reclaimed() {
        let manager = manager();
        let mut state = free_state();
        let then = Utc::now() - Duration::minutes(10);

        manager.try_acquire(&mut state, "a", LockKind::Exclusive, then);
        let decision = manager.try_acquire(&mut state, "b", LockKind::Write, Utc::now());
        match decision {
            LockDecision::Granted { reclaimed_from, .. } => {
                assert_eq!(reclaimed_from.as_deref(), Some("a"));
            }
            other => panic!("expected grant, got {other:?}"),
        }
        assert_eq!(state.lock_holder.as_deref(), Some("b"));
    }

    #[test]
    fn abandoned_reader_expires_while_others_keep_joining() {
        let manager = manager();
        let mut state = free_state();
        let start = Utc::now();

        manager.try_acquire(&mut state, "a", LockKind::Read, start);
        for (offset, reader) in [(2, "b"), (4, "c"), (6, "d")] {
            let at = start + Duration::minutes(offset);
            assert!(manager.try_acquire(&mut state, reader, LockKind::Read, at).is_granted());
        }
        // "a" joined at start with a five minute lease and never renewed.
        assert!(!state.is_held_by("a"));
        assert_eq!(state.holders(), vec!["b", "c", "d"]);
        assert_eq!(state.lock_holder.as_deref(), Some("b"));
        assert_eq!(state.lock_expires_at, Some(start + Duration::minutes(11)));
    }

    #[test]
    fn writer_reclaims_once_every_reader_expired() {
        let manager = manager();
        let mut state = free_state();
        let start = Utc::now();

        manager.try_acquire(&mut state, "a", LockKind::Read, start);
        manager.try_acquire(&mut state, "b", LockKind::Read, start + Duration::minutes(1));
        let at = start + Duration::minutes(5);
        assert!(!manager.try_acquire(&mut state, "c", LockKind::Write, at).is_granted());
        assert_eq!(state.holders(), vec!["b"]);

        let later = start + Duration::minutes(7);
        match manager.try_acquire(&mut state, "c", LockKind::Write, later) {
            LockDecision::Granted { reclaimed_from, .. } => {
                assert_eq!(reclaimed_from.as_deref(), Some("b"));
            }
            other => panic!("expected grant, got {other:?}"),
        }
        assert!(state.readers.is_empty());
        assert_eq!(state.lock_status, LockStatus::Write);
    }

    #[test]
    fn release_by_non_holder_is_noop() {
        let manager = manager();
        let mut state = free_state();
        manager.try_acquire(&mut state, "a", LockKind::Write, Utc::now());

        assert!(!manager.release(&mut state, "b"));
        assert_eq!(state.lock_holder.as_deref(), Some("a"));
        assert!(manager.release(&mut state, "a"));
        assert!(!manager.release(&mut state, "a"));
    }
}
