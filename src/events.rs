//! Coordination event stream.
//!
//! In-process subscribers receive [`CoordEvent`]s over a
//! `tokio::sync::broadcast` channel. A slow subscriber lags and loses the
//! oldest events; it never blocks the service. For external integrations the
//! same events are written as JSON lines to stdout or a file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::bus::AgentMessage;
use crate::conflict::ConflictDetection;
use crate::error::{Error, Result};
use crate::lease::LockKind;

pub const EVENT_SCHEMA_VERSION: &str = "fcoord.event.v1";

/// Buffered events per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Events
// =============================================================================

/// Something observable happened inside the service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoordEvent {
    Conflict {
        conflict: ConflictDetection,
    },
    IntentConflict {
        agent: String,
        conflicts: Vec<ConflictDetection>,
    },
    MessageSent {
        message: AgentMessage,
    },
    LockGranted {
        path: String,
        agent: String,
        kind: LockKind,
        expires_at: DateTime<Utc>,
    },
    LockReleased {
        path: String,
        agent: String,
    },
    FileChanged {
        path: String,
        version: u64,
        agent: String,
    },
}

impl CoordEvent {
    /// Snake-case name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            CoordEvent::Conflict { .. } => "conflict",
            CoordEvent::IntentConflict { .. } => "intent_conflict",
            CoordEvent::MessageSent { .. } => "message_sent",
            CoordEvent::LockGranted { .. } => "lock_granted",
            CoordEvent::LockReleased { .. } => "lock_released",
            CoordEvent::FileChanged { .. } => "file_changed",
        }
    }
}

/// A timestamped event as written to JSONL.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: CoordEvent,
}

impl Event {
    pub fn new(body: CoordEvent) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            timestamp: Utc::now(),
            body,
        }
    }
}

// =============================================================================
// In-process bus
// =============================================================================

/// Fan-out of [`CoordEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordEvent> {
        self.sender.subscribe()
    }

    /// Publish `event`. Having no subscribers is not an error.
    pub fn emit(&self, event: CoordEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event = name, receivers, "event emitted"),
            Err(_) => trace!(event = name, "event dropped; no subscribers"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// =============================================================================
// JSONL output
// =============================================================================

#[derive(Debug, Clone)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// Event sink that writes JSONL output to a destination.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    /// Emit events to stdout.
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Emit events to a file, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    /// Emit events into an arbitrary writer.
    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Write a single event as JSONL.
    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}
