//! Coordination Bus
//!
//! Asynchronous agent-to-agent messages delivered into per-agent FIFO
//! mailboxes. Messages are immutable once built. Reading a mailbox drains
//! it: delivery is at-most-once with no acknowledgement or redelivery.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::ConflictDetection;
use crate::error::{Error, Result};
use crate::lease::LockKind;

/// Sentinel recipient meaning "every registered agent except the sender"
pub const BROADCAST: &str = "*";

// =============================================================================
// Message parts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Coordination,
    Conflict,
    Notification,
    Request,
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Coordination => write!(f, "coordination"),
            MessageKind::Conflict => write!(f, "conflict"),
            MessageKind::Notification => write!(f, "notification"),
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "coordination" | "coord" => Ok(MessageKind::Coordination),
            "conflict" => Ok(MessageKind::Conflict),
            "notification" | "notify" => Ok(MessageKind::Notification),
            "request" | "req" => Ok(MessageKind::Request),
            "response" | "resp" => Ok(MessageKind::Response),
            _ => Err(Error::InvalidArgument(format!(
                "Invalid message kind '{}'. Expected: coordination, conflict, notification, request, response",
                s
            ))),
        }
    }
}

/// Who a message is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    Agent(String),
    Broadcast,
}

impl Recipient {
    pub fn agent(id: impl Into<String>) -> Self {
        Recipient::Agent(id.into())
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::Broadcast)
    }

    /// Whether a message to this recipient is addressed to `agent` directly.
    pub fn is_agent(&self, agent: &str) -> bool {
        matches!(self, Recipient::Agent(id) if id == agent)
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        if value == BROADCAST {
            Recipient::Broadcast
        } else {
            Recipient::Agent(value)
        }
    }
}

impl From<&str> for Recipient {
    fn from(value: &str) -> Self {
        Recipient::from(value.to_string())
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        match value {
            Recipient::Agent(id) => id,
            Recipient::Broadcast => BROADCAST.to_string(),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Agent(id) => write!(f, "{id}"),
            Recipient::Broadcast => write!(f, "{BROADCAST}"),
        }
    }
}

/// Message body. Tagged so it round-trips through any JSON consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    LockAcquired {
        path: String,
        kind: LockKind,
    },
    LockReleased {
        path: String,
    },
    CoordinationRequest {
        path: String,
        operation: String,
        conflicts: Vec<ConflictDetection>,
    },
    CoordinationResponse {
        path: String,
        approved: bool,
    },
    ConflictNotice {
        conflict: Box<ConflictDetection>,
    },
    Text(String),
    Data(serde_json::Value),
}

impl Payload {
    /// The coordination verdict for `path`, if this is a response to it.
    pub fn coordination_verdict(&self, path: &str) -> Option<bool> {
        match self {
            Payload::CoordinationResponse {
                path: answered,
                approved,
            } if answered == path => Some(*approved),
            _ => None,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: Uuid,
    pub from: String,
    pub to: Recipient,
    pub kind: MessageKind,
    pub payload: Payload,
    pub sent_at: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<Recipient>,
        kind: MessageKind,
        payload: Payload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            kind,
            payload,
            sent_at: Utc::now(),
        }
    }
}

// =============================================================================
// Mailboxes
// =============================================================================

/// Per-agent FIFO queues. An agent can receive mail only while it has a box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mailboxes {
    boxes: BTreeMap<String, VecDeque<AgentMessage>>,
}

impl Mailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted `(agent, messages)` pairs.
    pub fn from_entries(entries: Vec<(String, Vec<AgentMessage>)>) -> Self {
        Self {
            boxes: entries
                .into_iter()
                .map(|(agent, messages)| (agent, messages.into()))
                .collect(),
        }
    }

    pub fn entries(&self) -> Vec<(String, Vec<AgentMessage>)> {
        self.boxes
            .iter()
            .map(|(agent, queue)| (agent.clone(), queue.iter().cloned().collect()))
            .collect()
    }

    /// Create an empty box for `agent` unless one exists.
    pub fn open(&mut self, agent: &str) {
        self.boxes.entry(agent.to_string()).or_default();
    }

    /// Remove `agent`'s box and any undelivered mail.
    pub fn close(&mut self, agent: &str) -> Option<Vec<AgentMessage>> {
        self.boxes.remove(agent).map(Vec::from)
    }

    pub fn has(&self, agent: &str) -> bool {
        self.boxes.contains_key(agent)
    }

    /// Append `message` to every box it is addressed to.
    ///
    /// Broadcast reaches every box except the sender's. Direct mail to an
    /// agent without a box is dropped. Returns the recipients reached.
    pub fn deliver(&mut self, message: &AgentMessage) -> Vec<String> {
        match &message.to {
            Recipient::Broadcast => {
                let mut reached = Vec::new();
                for (agent, queue) in self.boxes.iter_mut() {
                    if *agent == message.from {
                        continue;
                    }
                    queue.push_back(message.clone());
                    reached.push(agent.clone());
                }
                reached
            }
            Recipient::Agent(agent) => match self.boxes.get_mut(agent) {
                Some(queue) => {
                    queue.push_back(message.clone());
                    vec![agent.clone()]
                }
                None => Vec::new(),
            },
        }
    }

    /// Take every pending message for `agent`, oldest first.
    pub fn drain(&mut self, agent: &str) -> Vec<AgentMessage> {
        self.boxes
            .get_mut(agent)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Remove and return the oldest message for `agent` matching `pred`.
    pub fn take_first(
        &mut self,
        agent: &str,
        pred: impl FnMut(&AgentMessage) -> bool,
    ) -> Option<AgentMessage> {
        let queue = self.boxes.get_mut(agent)?;
        let index = queue.iter().position(pred)?;
        queue.remove(index)
    }

    /// Drop every message for `agent` matching `pred`. Returns how many.
    pub fn discard(&mut self, agent: &str, mut pred: impl FnMut(&AgentMessage) -> bool) -> usize {
        let Some(queue) = self.boxes.get_mut(agent) else {
            return 0;
        };
        let before = queue.len();
        queue.retain(|message| !pred(message));
        before - queue.len()
    }

    pub fn pending(&self, agent: &str) -> usize {
        self.boxes.get(agent).map_or(0, VecDeque::len)
    }
}
