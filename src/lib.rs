//! fcoord - Multi-Agent File Coordination Library
//!
//! This library provides the core of the fcoord CLI: it arbitrates concurrent
//! access to shared files among independent agents.
//!
//! # Core Concepts
//!
//! - **Agents**: registered identities that own locks, intents and mailboxes
//! - **Leases**: read/write/exclusive locks on a file that expire on their own
//! - **Intents**: declared future work, checked for overlap before it starts
//! - **Conflicts**: typed detections with a severity and a resolution strategy
//! - **Mailboxes**: at-most-once, per-agent message queues with broadcast
//!
//! # Module Organization
//!
//! - `agent`: Agent identity resolution
//! - `bus`: Messages, payloads and mailboxes
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.fcoord.toml`
//! - `conflict`: Conflict types, severities and strategies
//! - `context`: Shared coordination context (agents, intents, globals)
//! - `error`: Error types and result aliases
//! - `events`: Event broadcasting and JSONL sinks
//! - `hash`: Content hashing for tracked files
//! - `intent`: Intent model and overlap detection
//! - `lease`: Lock table with expiring leases
//! - `output`: Human and JSON output
//! - `paths`: Path normalization and target matching
//! - `registry`: Tracked file registry
//! - `resolution`: Strategy handlers for detected conflicts
//! - `service`: The coordination service tying it all together
//! - `store`: Persistence of registry and context
//! - `watch`: Change sources (polling and OS notifications)

pub mod agent;
pub mod bus;
pub mod cli;
pub mod config;
pub mod conflict;
pub mod context;
pub mod error;
pub mod events;
pub mod hash;
pub mod intent;
pub mod lease;
pub mod output;
pub mod paths;
pub mod registry;
pub mod resolution;
pub mod service;
pub mod store;
pub mod watch;

pub use error::{Error, Result};
pub use service::{ConflictStats, CoordinationService};
