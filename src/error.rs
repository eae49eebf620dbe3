//! Error types for fcoord
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, bad config, unknown agent)
//! - 3: Blocked by policy (lock denied, coordination denied)
//! - 4: Operation failed (I/O, serialization, store lock timeout, watcher)
//!
//! Ordinary contention is not an error: lock denial and coordination
//! timeouts come back as `Ok(false)` from the service. The `LockDenied` and
//! `CoordinationDenied` variants exist so the CLI can turn a denial into a
//! non-zero exit.

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the fcoord CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for fcoord operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Agent not registered: {0}")]
    AgentNotRegistered(String),

    // Policy blocks (exit code 3)
    #[error("Lock denied: {path} is held by {holder} ({kind})")]
    LockDenied {
        path: String,
        holder: String,
        kind: String,
    },

    #[error("Coordination denied for {0}")]
    CoordinationDenied(String),

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Store lock acquisition failed: {0}")]
    StoreLockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) | Error::InvalidArgument(_) | Error::AgentNotRegistered(_) => {
                exit_codes::USER_ERROR
            }

            Error::LockDenied { .. } | Error::CoordinationDenied(_) => exit_codes::POLICY_BLOCKED,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Watch(_)
            | Error::StoreLockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON error output, when the variant has any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::LockDenied { path, holder, kind } => Some(serde_json::json!({
                "path": path,
                "holder": holder,
                "kind": kind,
            })),
            Error::InvalidConfig(message) => Some(serde_json::json!({ "message": message })),
            Error::AgentNotRegistered(agent) => Some(serde_json::json!({ "agent": agent })),
            Error::StoreLockFailed(path) => Some(serde_json::json!({ "lock": path })),
            _ => None,
        }
    }
}

/// Result type alias for fcoord operations
pub type Result<T> = std::result::Result<T, Error>;
