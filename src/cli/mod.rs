//! Command-line interface for fcoord
//!
//! This module defines the CLI structure using clap derive macros.
//! Each group of subcommands is implemented in its own submodule.
//!
//! Every invocation is a short-lived process over the shared state directory.
//! A command opens a [`Session`], which holds the store's session lock and a
//! freshly hydrated [`CoordinationService`], and drops it before exiting.
//! Long-running commands (`coordinate`, `watch`) open a new session for each
//! step so that other fcoord processes can interleave.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::agent;
use crate::config::{Config, Settings, CONFIG_FILE};
use crate::error::Result;
use crate::output::OutputOptions;
use crate::service::CoordinationService;
use crate::store::{DirStore, StateStore, StoreLock};

mod agents;
mod coordinate;
mod files;
mod global;
mod init;
mod intent;
mod locks;
mod messages;
mod stats;
mod watch;

/// fcoord - multi-agent file coordination
///
/// Arbitrates concurrent access to shared files across independent agents:
/// leased locks, declared intents with conflict prediction, and per-agent
/// mailboxes.
#[derive(Parser, Debug)]
#[command(name = "fcoord")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding coordination state (defaults to the project config
    /// or the per-user data directory)
    #[arg(long, global = true, env = "FCOORD_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Agent identity for locks, intents and messages
    #[arg(long, global = true, env = "FCOORD_AGENT")]
    pub agent: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default .fcoord.toml and create the state directory
    Init {
        /// Project root (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Agent registration
    #[command(subcommand)]
    Agent(AgentCommands),

    /// Start tracking files
    Track {
        /// Files to track
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Stop tracking files
    Untrack {
        /// Files to stop tracking
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Request a lock on a file (tracks it first if needed)
    Lock {
        /// File to lock
        path: String,

        /// Lock kind: read, write, exclusive
        #[arg(long, default_value = "write")]
        kind: String,
    },

    /// Release your lock on a file
    Release {
        /// File to release
        path: String,
    },

    /// Declared intents
    #[command(subcommand)]
    Intent(IntentCommands),

    /// Send a message to an agent, or to every agent with "*"
    Send {
        /// Recipient agent id or "*"
        to: String,

        /// Message kind: coordination, conflict, notification, request, response
        #[arg(long, default_value = "notification")]
        kind: String,

        /// Message text
        #[arg(long)]
        text: Option<String>,

        /// JSON payload instead of text
        #[arg(long, conflicts_with = "text")]
        data: Option<String>,
    },

    /// Read (and drain) your mailbox
    Inbox,

    /// Show coordination counters
    Stats,

    /// Ask other agents before working on a file
    Coordinate {
        /// File you intend to work on
        path: String,

        /// Planned operation (free text, e.g. "write", "refactor")
        #[arg(long, default_value = "write")]
        operation: String,

        /// Override the coordination timeout (e.g. "30s")
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Answer a coordination request
    Respond {
        /// Agent that asked
        to: String,

        /// File the request was about
        path: String,

        #[command(flatten)]
        verdict: Verdict,
    },

    /// Shared global values
    #[command(subcommand)]
    Global(GlobalCommands),

    /// Watch tracked files and keep state synced until interrupted
    Watch {
        /// Write events as JSONL to a file, or "-" for stdout
        #[arg(long)]
        events: Option<String>,

        /// Use OS file notifications instead of polling
        #[arg(long)]
        notify: bool,

        /// Stop after this long (e.g. "10m"); runs until Ctrl-C otherwise
        #[arg(long)]
        duration: Option<String>,
    },
}

/// Agent subcommands
#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// Register the current agent
    Register,

    /// Unregister the current agent and release its locks
    Unregister,

    /// Show the current agent and its state
    Show,

    /// List registered agents
    Ls,
}

/// Intent subcommands
#[derive(Subcommand, Debug)]
pub enum IntentCommands {
    /// Declare (or replace) the current agent's intent
    Declare {
        /// Target paths, directory prefixes, or glob patterns
        #[arg(required = true)]
        targets: Vec<String>,

        /// What the work is
        #[arg(long, default_value = "")]
        description: String,

        /// Priority (higher is more important)
        #[arg(long, default_value_t = 0)]
        priority: u8,

        /// Expected duration (e.g. "30m")
        #[arg(long)]
        duration: Option<String>,

        /// Agents this work depends on
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
    },

    /// Withdraw the current agent's intent
    Withdraw,

    /// List declared intents
    Ls,
}

/// Global value subcommands
#[derive(Subcommand, Debug)]
pub enum GlobalCommands {
    /// Set a value (parsed as JSON, or stored as a string)
    Set { key: String, value: String },

    /// Show a value
    Get { key: String },

    /// Remove a value
    Unset { key: String },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Verdict {
    /// Approve the request
    #[arg(long)]
    pub approve: bool,

    /// Deny the request
    #[arg(long)]
    pub deny: bool,
}

// =============================================================================
// Shared plumbing
// =============================================================================

/// Global flags every command needs.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub state_dir: Option<PathBuf>,
    pub agent: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

impl GlobalOptions {
    pub fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }

    /// Resolve settings and the calling agent.
    pub fn resolve(&self) -> Result<(Settings, String)> {
        let cwd = std::env::current_dir()?;
        let root = find_config_root(&cwd);
        let config = match &root {
            Some(root) => Config::load_from_dir(root),
            None => Config::default(),
        };

        let mut settings = config.settings(root.as_deref().unwrap_or(&cwd))?;
        if let Some(state_dir) = &self.state_dir {
            settings.backup_dir = state_dir.join(&config.storage.backup_dir);
            settings.state_dir = state_dir.clone();
        } else if root.is_none() {
            if let Some(data_dir) = user_state_dir() {
                settings.backup_dir = data_dir.join(&config.storage.backup_dir);
                settings.state_dir = data_dir;
            }
        }

        let agent = agent::resolve_agent(self.agent.as_deref(), &config);
        Ok((settings, agent))
    }
}

/// A locked, hydrated view of the shared state for one command step.
pub struct Session {
    pub service: CoordinationService,
    pub agent: String,
    pub settings: Settings,
    _lock: StoreLock,
}

impl Session {
    pub fn open(globals: &GlobalOptions) -> Result<Self> {
        let (settings, agent) = globals.resolve()?;
        Self::open_with(settings, agent)
    }

    pub fn open_with(settings: Settings, agent: String) -> Result<Self> {
        std::fs::create_dir_all(&settings.state_dir)?;
        let backend = DirStore::new(settings.state_dir.clone(), settings.lock_timeout_ms);
        let lock = backend.session_lock()?;
        let service = CoordinationService::new(
            StateStore::new(std::sync::Arc::new(backend)),
            settings.clone(),
        );
        Ok(Self {
            service,
            agent,
            settings,
            _lock: lock,
        })
    }
}

/// Anchor a path argument at the current directory.
///
/// Every fcoord process must name a file the same way regardless of where
/// it was started, so relative arguments never reach the service.
pub(crate) fn absolute_arg(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(crate::error::Error::InvalidArgument(
            "path cannot be empty".to_string(),
        ));
    }
    Ok(std::path::absolute(trimmed)?.to_string_lossy().into_owned())
}

/// Nearest ancestor of `start` containing a config file.
fn find_config_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}

fn user_state_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "fcoord").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Build the runtime for commands that wait.
fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

impl Cli {
    /// True when `watch` mirrors events to stdout.
    pub fn events_to_stdout(&self) -> bool {
        matches!(
            &self.command,
            Commands::Watch { events: Some(target), .. } if target.trim() == "-"
        )
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let globals = GlobalOptions {
            state_dir: self.state_dir,
            agent: self.agent,
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Init { dir } => init::run(&globals, dir),
            Commands::Agent(cmd) => match cmd {
                AgentCommands::Register => agents::run_register(&globals),
                AgentCommands::Unregister => agents::run_unregister(&globals),
                AgentCommands::Show => agents::run_show(&globals),
                AgentCommands::Ls => agents::run_list(&globals),
            },
            Commands::Track { paths } => files::run_track(&globals, paths),
            Commands::Untrack { paths } => files::run_untrack(&globals, paths),
            Commands::Lock { path, kind } => locks::run_lock(&globals, &path, &kind),
            Commands::Release { path } => locks::run_release(&globals, &path),
            Commands::Intent(cmd) => match cmd {
                IntentCommands::Declare {
                    targets,
                    description,
                    priority,
                    duration,
                    depends_on,
                } => intent::run_declare(
                    &globals,
                    intent::DeclareOptions {
                        targets,
                        description,
                        priority,
                        duration,
                        depends_on,
                    },
                ),
                IntentCommands::Withdraw => intent::run_withdraw(&globals),
                IntentCommands::Ls => intent::run_list(&globals),
            },
            Commands::Send {
                to,
                kind,
                text,
                data,
            } => messages::run_send(
                &globals,
                messages::SendOptions {
                    to,
                    kind,
                    text,
                    data,
                },
            ),
            Commands::Inbox => messages::run_inbox(&globals),
            Commands::Respond { to, path, verdict } => {
                messages::run_respond(&globals, &to, &path, verdict.approve)
            }
            Commands::Stats => stats::run(&globals),
            Commands::Coordinate {
                path,
                operation,
                timeout,
            } => {
                let rt = runtime()?;
                rt.block_on(coordinate::run(
                    &globals,
                    coordinate::CoordinateOptions {
                        path,
                        operation,
                        timeout,
                    },
                ))
            }
            Commands::Global(cmd) => match cmd {
                GlobalCommands::Set { key, value } => global::run_set(&globals, &key, &value),
                GlobalCommands::Get { key } => global::run_get(&globals, &key),
                GlobalCommands::Unset { key } => global::run_unset(&globals, &key),
            },
            Commands::Watch {
                events,
                notify,
                duration,
            } => {
                let rt = runtime()?;
                rt.block_on(watch::run(
                    &globals,
                    watch::WatchOptions {
                        events,
                        notify,
                        duration,
                    },
                ))
            }
        }
    }
}
