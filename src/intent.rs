//! Intent Ledger
//!
//! Each agent has at most one active intent: its declared forthcoming work
//! over a set of resource targets. Declaring again replaces the previous
//! intent. The ledger is what predictive conflict detection reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paths;

/// An agent's declared forthcoming work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIntent {
    pub agent_id: String,
    pub description: String,
    /// Paths, directory prefixes, or glob patterns
    pub target_resources: Vec<String>,
    /// Expected duration in seconds
    pub estimated_duration: u64,
    pub priority: u8,
    /// Agent ids this work depends on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    pub declared_at: DateTime<Utc>,
}

impl AgentIntent {
    /// Create a new intent builder
    pub fn builder(agent_id: impl Into<String>) -> IntentBuilder {
        IntentBuilder::new(agent_id)
    }

    /// Whether any target of this intent overlaps `resource`.
    pub fn touches(&self, resource: &str) -> bool {
        self.target_resources
            .iter()
            .any(|target| paths::paths_overlap(target, resource))
    }

    /// Targets of this intent that overlap any target of `other`.
    pub fn overlapping_targets(&self, other: &AgentIntent) -> Vec<String> {
        self.target_resources
            .iter()
            .filter(|target| other.touches(target))
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(Error::InvalidArgument("intent agent id cannot be empty".to_string()));
        }
        if self.target_resources.iter().all(|t| t.trim().is_empty()) {
            return Err(Error::InvalidArgument(
                "intent needs at least one target resource".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`AgentIntent`]
pub struct IntentBuilder {
    agent_id: String,
    description: String,
    targets: Vec<String>,
    estimated_duration: u64,
    priority: u8,
    dependencies: Vec<String>,
}

impl IntentBuilder {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            description: String::new(),
            targets: Vec::new(),
            estimated_duration: 0,
            priority: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets.extend(targets.into_iter().map(Into::into));
        self
    }

    pub fn estimated_duration(mut self, seconds: u64) -> Self {
        self.estimated_duration = seconds;
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, agent_id: impl Into<String>) -> Self {
        self.dependencies.push(agent_id.into());
        self
    }

    pub fn build(self) -> Result<AgentIntent> {
        let intent = AgentIntent {
            agent_id: self.agent_id,
            description: self.description,
            target_resources: self.targets,
            estimated_duration: self.estimated_duration,
            priority: self.priority,
            dependencies: self.dependencies,
            declared_at: Utc::now(),
        };
        intent.validate()?;
        Ok(intent)
    }
}

/// Active intents keyed by agent id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentLedger {
    intents: BTreeMap<String, AgentIntent>,
}

impl IntentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `intent`, replacing the agent's previous one.
    pub fn declare(&mut self, intent: AgentIntent) -> Option<AgentIntent> {
        self.intents.insert(intent.agent_id.clone(), intent)
    }

    pub fn withdraw(&mut self, agent_id: &str) -> Option<AgentIntent> {
        self.intents.remove(agent_id)
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentIntent> {
        self.intents.get(agent_id)
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentIntent> {
        self.intents.values()
    }

    /// Intents of agents other than `agent_id`.
    pub fn others<'a>(&'a self, agent_id: &'a str) -> impl Iterator<Item = &'a AgentIntent> {
        self.intents.values().filter(move |intent| intent.agent_id != agent_id)
    }
}
