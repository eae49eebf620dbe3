//! Conflict detection for fcoord.
//!
//! Conflicts come from three sources:
//!
//! - **Reactive**: a tracked resource changed on disk while locked
//!   ([`ConflictKind::ConcurrentModification`])
//! - **Proactive**: a lock request hit an incompatible lock
//!   ([`ConflictKind::LockViolation`])
//! - **Predictive**: an intent or planned operation overlaps another agent's
//!   declared intent or live lock ([`ConflictKind::DependencyConflict`])
//!
//! Every detector here is a pure function over current state plus the
//! proposed change. Nothing is mutated; callers decide what to emit.
//! [`ConflictKind::MergeConflict`] is never synthesized by these detectors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::intent::{AgentIntent, IntentLedger};
use crate::lease::LockKind;
use crate::paths;
use crate::registry::{FileRegistry, FileState, Observation};

// =============================================================================
// Classification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    ConcurrentModification,
    LockViolation,
    MergeConflict,
    DependencyConflict,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::ConcurrentModification => write!(f, "concurrent_modification"),
            ConflictKind::LockViolation => write!(f, "lock_violation"),
            ConflictKind::MergeConflict => write!(f, "merge_conflict"),
            ConflictKind::DependencyConflict => write!(f, "dependency_conflict"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Resolution proposals
// =============================================================================

/// Named policy for responding to a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    AutoMerge,
    LastWriterWins,
    ManualReview,
    Rollback,
    BranchSplit,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionStrategy::AutoMerge => write!(f, "auto_merge"),
            ResolutionStrategy::LastWriterWins => write!(f, "last_writer_wins"),
            ResolutionStrategy::ManualReview => write!(f, "manual_review"),
            ResolutionStrategy::Rollback => write!(f, "rollback"),
            ResolutionStrategy::BranchSplit => write!(f, "branch_split"),
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "auto_merge" | "merge" => Ok(ResolutionStrategy::AutoMerge),
            "last_writer_wins" | "lww" => Ok(ResolutionStrategy::LastWriterWins),
            "manual_review" | "manual" => Ok(ResolutionStrategy::ManualReview),
            "rollback" => Ok(ResolutionStrategy::Rollback),
            "branch_split" | "branch" => Ok(ResolutionStrategy::BranchSplit),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid resolution strategy '{}'. Expected: auto_merge, last_writer_wins, manual_review, rollback, branch_split",
                s
            ))),
        }
    }
}

/// Kind of side-effecting step in a resolution plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Backup,
    Merge,
    Restore,
    Notify,
    Lock,
    Unlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub kind: ActionKind,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl ResolutionAction {
    pub fn new(kind: ActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            agent: None,
        }
    }

    pub fn for_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// A suggested way out of a conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub strategy: ResolutionStrategy,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub actions: Vec<ResolutionAction>,
    pub review_required: bool,
}

// =============================================================================
// Detection record
// =============================================================================

/// A classified conflict. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetection {
    pub id: Uuid,
    pub kind: ConflictKind,
    pub severity: Severity,
    pub resources: Vec<String>,
    pub agents: Vec<String>,
    pub description: String,
    pub suggested_resolution: ConflictResolution,
    pub detected_at: DateTime<Utc>,
}

impl ConflictDetection {
    fn new(
        kind: ConflictKind,
        severity: Severity,
        resources: Vec<String>,
        agents: Vec<String>,
        description: String,
        suggested_resolution: ConflictResolution,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            resources,
            agents,
            description,
            suggested_resolution,
            detected_at: Utc::now(),
        }
    }

    /// Primary resource this conflict is about.
    pub fn primary_resource(&self) -> Option<&str> {
        self.resources.first().map(String::as_str)
    }

    /// Whether `agent` is involved.
    pub fn involves(&self, agent: &str) -> bool {
        self.agents.iter().any(|a| a == agent)
    }
}

// =============================================================================
// Detectors
// =============================================================================

/// Reactive: the resource changed while locked.
///
/// Fires when the observed hash differs, the resource is locked, and the
/// observed mtime is strictly after the recorded `last_modified`.
pub fn detect_concurrent_modification(
    state: &FileState,
    observation: &Observation,
) -> Option<ConflictDetection> {
    if observation.content_hash == state.content_hash
        || !state.is_locked()
        || observation.modified_at <= state.last_modified
    {
        return None;
    }

    let holder = state.lock_holder.clone().unwrap_or_default();
    let mut agents = vec![holder.clone()];
    if state.last_agent != holder {
        agents.push(state.last_agent.clone());
    }

    Some(ConflictDetection::new(
        ConflictKind::ConcurrentModification,
        Severity::High,
        vec![state.path.clone()],
        agents,
        format!(
            "{} changed on disk while {} held a {} lock",
            state.path, holder, state.lock_status
        ),
        ConflictResolution {
            strategy: ResolutionStrategy::ManualReview,
            confidence: 0.5,
            actions: vec![
                ResolutionAction::new(ActionKind::Backup, state.path.clone()),
                ResolutionAction::new(ActionKind::Notify, state.path.clone()).for_agent(holder),
            ],
            review_required: true,
        },
    ))
}

/// Proactive: `requester` asked for `kind` but `holder` holds an incompatible lock.
pub fn detect_lock_violation(
    state: &FileState,
    requester: &str,
    kind: LockKind,
    holder: &str,
) -> ConflictDetection {
    ConflictDetection::new(
        ConflictKind::LockViolation,
        Severity::Medium,
        vec![state.path.clone()],
        vec![requester.to_string(), holder.to_string()],
        format!(
            "{} requested a {} lock on {} held by {} ({})",
            requester, kind, state.path, holder, state.lock_status
        ),
        ConflictResolution {
            strategy: ResolutionStrategy::AutoMerge,
            confidence: 0.7,
            actions: vec![
                ResolutionAction::new(ActionKind::Notify, state.path.clone()).for_agent(holder),
                ResolutionAction::new(ActionKind::Lock, state.path.clone()).for_agent(requester),
            ],
            review_required: false,
        },
    )
}

/// Predictive: `intent` overlaps other agents' declared intents.
///
/// One conflict per overlapping agent. Resources list the new intent's
/// overlapping targets followed by the other intent's.
pub fn detect_intent_conflicts(
    intent: &AgentIntent,
    ledger: &IntentLedger,
) -> Vec<ConflictDetection> {
    ledger
        .others(&intent.agent_id)
        .filter_map(|other| {
            let ours = intent.overlapping_targets(other);
            if ours.is_empty() {
                return None;
            }
            let mut resources = ours;
            for theirs in other.overlapping_targets(intent) {
                if !resources.contains(&theirs) {
                    resources.push(theirs);
                }
            }
            Some(dependency_conflict(
                resources,
                &intent.agent_id,
                &other.agent_id,
                format!(
                    "intent of {} overlaps intent of {} ({})",
                    intent.agent_id, other.agent_id, other.description
                ),
            ))
        })
        .collect()
}

/// Predictive: `agent` is about to work on `path`.
///
/// Reports other agents whose declared intents touch `path`, and other agents
/// holding a live lock on an overlapping tracked resource.
pub fn detect_access_conflicts(
    path: &str,
    agent: &str,
    operation: &str,
    ledger: &IntentLedger,
    registry: &FileRegistry,
    now: DateTime<Utc>,
) -> Vec<ConflictDetection> {
    let mut conflicts: Vec<ConflictDetection> = ledger
        .others(agent)
        .filter(|other| other.touches(path))
        .map(|other| {
            dependency_conflict(
                vec![path.to_string()],
                agent,
                &other.agent_id,
                format!(
                    "{} of {} by {} overlaps intent of {} ({})",
                    operation, path, agent, other.agent_id, other.description
                ),
            )
        })
        .collect();

    for state in registry.iter() {
        if !state.is_locked() || state.is_lock_expired(now) {
            continue;
        }
        if !paths::paths_overlap(&state.path, path) {
            continue;
        }
        for holder in state.holders() {
            if holder == agent || conflicts.iter().any(|c| c.involves(&holder)) {
                continue;
            }
            conflicts.push(dependency_conflict(
                vec![path.to_string(), state.path.clone()],
                agent,
                &holder,
                format!(
                    "{} of {} by {} overlaps {} lock held by {} on {}",
                    operation, path, agent, state.lock_status, holder, state.path
                ),
            ));
        }
    }

    conflicts
}

fn dependency_conflict(
    resources: Vec<String>,
    agent: &str,
    other: &str,
    description: String,
) -> ConflictDetection {
    let target = resources.first().cloned().unwrap_or_default();
    ConflictDetection::new(
        ConflictKind::DependencyConflict,
        Severity::Low,
        resources,
        vec![agent.to_string(), other.to_string()],
        description,
        ConflictResolution {
            strategy: ResolutionStrategy::AutoMerge,
            confidence: 0.8,
            actions: vec![ResolutionAction::new(ActionKind::Notify, target).for_agent(other)],
            review_required: false,
        },
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LockStatus;
    use chrono::Duration;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn locked_state(holder: &str, last_agent: &str) -> FileState {
        FileState {
            path: "/proj/plan.txt".to_string(),
            location: PathBuf::from("/proj/plan.txt"),
            content_hash: "old".to_string(),
            last_modified: Utc::now() - Duration::seconds(30),
            last_agent: last_agent.to_string(),
            lock_status: LockStatus::Write,
            lock_holder: Some(holder.to_string()),
            readers: BTreeMap::new(),
            lock_expires_at: Some(Utc::now() + Duration::minutes(5)),
            version: 1,
        }
    }

    #[test]
    fn concurrent_modification_while_locked() {
        let state = locked_state("a", "c");
        let observation = Observation {
            content_hash: "new".to_string(),
            modified_at: Utc::now(),
        };
        let conflict = detect_concurrent_modification(&state, &observation).expect("conflict");
        assert_eq!(conflict.kind, ConflictKind::ConcurrentModification);
        assert_eq!(conflict.severity, Severity::High);
        assert_eq!(conflict.agents, vec!["a", "c"]);
        assert_eq!(
            conflict.suggested_resolution.strategy,
            ResolutionStrategy::ManualReview
        );
        let kinds: Vec<_> = conflict
            .suggested_resolution
            .actions
            .iter()
            .map(|a| a.kind)
            .collect();
        assert_eq!(kinds, vec![ActionKind::Backup, ActionKind::Notify]);
        assert_eq!(
            conflict.suggested_resolution.actions[1].agent.as_deref(),
            Some("a")
        );
    }

    #[test]
    fn no_reactive_conflict_when_free_unchanged_or_stale() {
        let mut state = locked_state("a", "c");
        let same = Observation {
            content_hash: "old".to_string(),
            modified_at: Utc::now(),
        };
        assert!(detect_concurrent_modification(&state, &same).is_none());

        let stale = Observation {
            content_hash: "new".to_string(),
            modified_at: state.last_modified,
        };
        assert!(detect_concurrent_modification(&state, &stale).is_none());

        state.clear_lock();
        let fresh = Observation {
            content_hash: "new".to_string(),
            modified_at: Utc::now(),
        };
        assert!(detect_concurrent_modification(&state, &fresh).is_none());
    }

    #[test]
    fn lock_violation_lists_requester_then_holder() {
        let state = locked_state("a", "a");
        let conflict = detect_lock_violation(&state, "b", LockKind::Write, "a");
        assert_eq!(conflict.kind, ConflictKind::LockViolation);
        assert_eq!(conflict.severity, Severity::Medium);
        assert_eq!(conflict.agents, vec!["b", "a"]);
        assert_eq!(conflict.suggested_resolution.strategy, ResolutionStrategy::AutoMerge);
        assert!((conflict.suggested_resolution.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn intent_overlap_yields_dependency_conflict() {
        let mut ledger = IntentLedger::new();
        ledger.declare(
            AgentIntent::builder("a")
                .description("restructure src")
                .target("/proj/src")
                .build()
                .unwrap(),
        );
        let b = AgentIntent::builder("b").target("/proj/src/main.go").build().unwrap();

        let conflicts = detect_intent_conflicts(&b, &ledger);
        assert_eq!(conflicts.len(), 1);
        let conflict = &conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::DependencyConflict);
        assert_eq!(conflict.severity, Severity::Low);
        assert_eq!(conflict.agents, vec!["b", "a"]);
        assert_eq!(conflict.resources, vec!["/proj/src/main.go", "/proj/src"]);
        assert!((conflict.suggested_resolution.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn own_intent_never_conflicts() {
        let mut ledger = IntentLedger::new();
        ledger.declare(AgentIntent::builder("a").target("/proj").build().unwrap());
        let again = AgentIntent::builder("a").target("/proj/src").build().unwrap();
        assert!(detect_intent_conflicts(&again, &ledger).is_empty());
    }

    #[test]
    fn access_conflicts_include_other_agents_locks() {
        let ledger = IntentLedger::new();
        let mut registry = FileRegistry::new();
        registry.insert(locked_state("a", "a"));

        let conflicts = detect_access_conflicts(
            "/proj/plan.txt",
            "b",
            "write",
            &ledger,
            &registry,
            Utc::now(),
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].agents, vec!["b", "a"]);

        let own = detect_access_conflicts(
            "/proj/plan.txt",
            "a",
            "write",
            &ledger,
            &registry,
            Utc::now(),
        );
        assert!(own.is_empty());
    }
}
