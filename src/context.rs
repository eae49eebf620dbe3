//! Shared coordination context
//!
//! The process-wide aggregate of registered agents, their mailboxes, their
//! declared intents and a free-form scratch space. Owned by one
//! [`crate::service::CoordinationService`]; never a global.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{AgentMessage, Mailboxes};
use crate::intent::{AgentIntent, IntentLedger};
use crate::store::SNAPSHOT_SCHEMA_VERSION;

/// Persisted form of [`SharedContext`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub schema_version: u32,
    pub active_agents: Vec<String>,
    pub mailboxes: Vec<(String, Vec<AgentMessage>)>,
    pub intents: Vec<(String, AgentIntent)>,
    pub global_state: BTreeMap<String, serde_json::Value>,
    pub last_sync_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SharedContext {
    active_agents: BTreeSet<String>,
    mailboxes: Mailboxes,
    intents: IntentLedger,
    global_state: BTreeMap<String, serde_json::Value>,
    last_sync_at: DateTime<Utc>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedContext {
    pub fn new() -> Self {
        Self {
            active_agents: BTreeSet::new(),
            mailboxes: Mailboxes::new(),
            intents: IntentLedger::new(),
            global_state: BTreeMap::new(),
            last_sync_at: Utc::now(),
        }
    }

    pub fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        let mut intents = IntentLedger::new();
        for (_, intent) in snapshot.intents {
            intents.declare(intent);
        }
        let mut mailboxes = Mailboxes::from_entries(snapshot.mailboxes);
        let active_agents: BTreeSet<String> = snapshot.active_agents.into_iter().collect();
        // A registered agent always has a box.
        for agent in &active_agents {
            mailboxes.open(agent);
        }
        Self {
            active_agents,
            mailboxes,
            intents,
            global_state: snapshot.global_state,
            last_sync_at: snapshot.last_sync_at,
        }
    }

    pub fn to_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            active_agents: self.active_agents.iter().cloned().collect(),
            mailboxes: self.mailboxes.entries(),
            intents: self
                .intents
                .iter()
                .map(|intent| (intent.agent_id.clone(), intent.clone()))
                .collect(),
            global_state: self.global_state.clone(),
            last_sync_at: self.last_sync_at,
        }
    }

    // =========================================================================
    // Agents
    // =========================================================================

    /// Register `agent`. Returns false if it was already registered.
    pub fn register(&mut self, agent: &str) -> bool {
        self.mailboxes.open(agent);
        self.active_agents.insert(agent.to_string())
    }

    /// Remove `agent` from agents, mailboxes and intents.
    pub fn unregister(&mut self, agent: &str) -> bool {
        self.mailboxes.close(agent);
        self.intents.withdraw(agent);
        self.active_agents.remove(agent)
    }

    pub fn is_registered(&self, agent: &str) -> bool {
        self.active_agents.contains(agent)
    }

    pub fn active_agents(&self) -> &BTreeSet<String> {
        &self.active_agents
    }

    // =========================================================================
    // Parts
    // =========================================================================

    pub fn mailboxes(&self) -> &Mailboxes {
        &self.mailboxes
    }

    pub fn mailboxes_mut(&mut self) -> &mut Mailboxes {
        &mut self.mailboxes
    }

    pub fn intents(&self) -> &IntentLedger {
        &self.intents
    }

    pub fn intents_mut(&mut self) -> &mut IntentLedger {
        &mut self.intents
    }

    pub fn global(&self, key: &str) -> Option<&serde_json::Value> {
        self.global_state.get(key)
    }

    /// Set (or with `None`, clear) a global flag. Returns the previous value.
    pub fn set_global(
        &mut self,
        key: &str,
        value: Option<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        match value {
            Some(value) => self.global_state.insert(key.to_string(), value),
            None => self.global_state.remove(key),
        }
    }

    pub fn last_sync_at(&self) -> DateTime<Utc> {
        self.last_sync_at
    }

    pub fn touch_sync(&mut self, at: DateTime<Utc>) {
        self.last_sync_at = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MessageKind, Payload};

    #[test]
    fn unregister_clears_every_map() {
        let mut ctx = SharedContext::new();
        assert!(ctx.register("a"));
        assert!(!ctx.register("a"));
        ctx.intents_mut()
            .declare(AgentIntent::builder("a").target("/x").build().unwrap());

        assert!(ctx.unregister("a"));
        assert!(!ctx.is_registered("a"));
        assert!(!ctx.mailboxes().has("a"));
        assert!(ctx.intents().get("a").is_none());
    }

    #[test]
    fn snapshot_preserves_mail_intents_and_globals() {
        let mut ctx = SharedContext::new();
        ctx.register("a");
        ctx.register("b");
        ctx.mailboxes_mut().deliver(&AgentMessage::new(
            "a",
            "b",
            MessageKind::Request,
            Payload::Text("review?".into()),
        ));
        ctx.intents_mut()
            .declare(AgentIntent::builder("b").target("/proj").build().unwrap());
        ctx.set_global("freeze", Some(serde_json::json!(true)));

        let json = serde_json::to_string(&ctx.to_snapshot()).unwrap();
        let restored = SharedContext::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored, ctx);
        assert_eq!(restored.mailboxes().pending("b"), 1);
        assert_eq!(restored.global("freeze"), Some(&serde_json::json!(true)));
    }
}
