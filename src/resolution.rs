//! Resolution Engine
//!
//! Dispatches a classified conflict to the handler registered for its
//! suggested strategy. The outcome is only a hint to callers (retry once or
//! give up); it is never a guarantee that the conflict is gone.
//!
//! Default handlers:
//!
//! | strategy | behaviour |
//! |---|---|
//! | auto_merge | snapshot the resource into the backup dir, succeed |
//! | last_writer_wins | succeed iff the resource is still tracked |
//! | manual_review | never auto-resolved |
//! | rollback | not implemented, fails |
//! | branch_split | not implemented, fails |

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::conflict::{ConflictDetection, ResolutionStrategy};
use crate::error::Result;
use crate::hash;
use crate::registry::FileRegistry;

/// What a handler can see while resolving.
pub struct ResolutionContext<'a> {
    pub registry: &'a FileRegistry,
    pub backup_dir: &'a Path,
}

/// Result of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolutionOutcome {
    pub strategy: ResolutionStrategy,
    pub resolved: bool,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl ResolutionOutcome {
    pub fn resolved(strategy: ResolutionStrategy, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            resolved: true,
            detail: detail.into(),
            backup: None,
        }
    }

    pub fn failed(strategy: ResolutionStrategy, detail: impl Into<String>) -> Self {
        Self {
            strategy,
            resolved: false,
            detail: detail.into(),
            backup: None,
        }
    }
}

/// A pluggable implementation of one resolution strategy.
pub trait StrategyHandler: Send + Sync {
    fn resolve(
        &self,
        conflict: &ConflictDetection,
        ctx: &ResolutionContext<'_>,
    ) -> ResolutionOutcome;
}

// =============================================================================
// Default handlers
// =============================================================================

/// Preserve pre-conflict content. No content synthesis happens.
pub struct AutoMergeHandler;

impl StrategyHandler for AutoMergeHandler {
    fn resolve(
        &self,
        conflict: &ConflictDetection,
        ctx: &ResolutionContext<'_>,
    ) -> ResolutionOutcome {
        let strategy = ResolutionStrategy::AutoMerge;
        let location = conflict
            .primary_resource()
            .and_then(|path| ctx.registry.get(path))
            .map(|state| state.location.clone());

        let Some(location) = location.filter(|location| location.is_file()) else {
            return ResolutionOutcome::resolved(strategy, "nothing to back up");
        };

        match backup_file(&location, ctx.backup_dir) {
            Ok(backup) => {
                debug!(source = %location.display(), backup = %backup.display(), "conflict backup written");
                ResolutionOutcome {
                    backup: Some(backup),
                    ..ResolutionOutcome::resolved(strategy, "pre-conflict content backed up")
                }
            }
            Err(err) => {
                warn!(source = %location.display(), error = %err, "conflict backup failed");
                ResolutionOutcome::failed(strategy, format!("backup failed: {err}"))
            }
        }
    }
}

/// The current observed state is the last write by definition.
pub struct LastWriterWinsHandler;

impl StrategyHandler for LastWriterWinsHandler {
    fn resolve(
        &self,
        conflict: &ConflictDetection,
        ctx: &ResolutionContext<'_>,
    ) -> ResolutionOutcome {
        let strategy = ResolutionStrategy::LastWriterWins;
        match conflict.primary_resource() {
            Some(path) if ctx.registry.contains(path) => {
                ResolutionOutcome::resolved(strategy, "current observed state kept")
            }
            _ => ResolutionOutcome::failed(strategy, "resource is no longer tracked"),
        }
    }
}

/// Left for an external actor; the conflict event is the only output.
pub struct ManualReviewHandler;

impl StrategyHandler for ManualReviewHandler {
    fn resolve(
        &self,
        _conflict: &ConflictDetection,
        _ctx: &ResolutionContext<'_>,
    ) -> ResolutionOutcome {
        ResolutionOutcome::failed(ResolutionStrategy::ManualReview, "awaiting manual review")
    }
}

/// Placeholder for strategies without an automatic implementation.
pub struct UnimplementedHandler(pub ResolutionStrategy);

impl StrategyHandler for UnimplementedHandler {
    fn resolve(
        &self,
        _conflict: &ConflictDetection,
        _ctx: &ResolutionContext<'_>,
    ) -> ResolutionOutcome {
        ResolutionOutcome::failed(
            self.0,
            format!("{} is not implemented - manual action required", self.0),
        )
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct ResolutionEngine {
    backup_dir: PathBuf,
    handlers: HashMap<ResolutionStrategy, Box<dyn StrategyHandler>>,
}

impl ResolutionEngine {
    /// Engine with the default handler for every strategy.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        let mut engine = Self {
            backup_dir: backup_dir.into(),
            handlers: HashMap::new(),
        };
        engine.register(ResolutionStrategy::AutoMerge, AutoMergeHandler);
        engine.register(ResolutionStrategy::LastWriterWins, LastWriterWinsHandler);
        engine.register(ResolutionStrategy::ManualReview, ManualReviewHandler);
        engine.register(
            ResolutionStrategy::Rollback,
            UnimplementedHandler(ResolutionStrategy::Rollback),
        );
        engine.register(
            ResolutionStrategy::BranchSplit,
            UnimplementedHandler(ResolutionStrategy::BranchSplit),
        );
        engine
    }

    /// Replace the handler for `strategy`.
    pub fn register(&mut self, strategy: ResolutionStrategy, handler: impl StrategyHandler + 'static) {
        self.handlers.insert(strategy, Box::new(handler));
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Run the handler for the conflict's suggested strategy.
    pub fn attempt(&self, conflict: &ConflictDetection, registry: &FileRegistry) -> ResolutionOutcome {
        let strategy = conflict.suggested_resolution.strategy;
        let ctx = ResolutionContext {
            registry,
            backup_dir: &self.backup_dir,
        };
        let outcome = match self.handlers.get(&strategy) {
            Some(handler) => handler.resolve(conflict, &ctx),
            None => ResolutionOutcome::failed(strategy, "no handler registered"),
        };
        debug!(
            conflict = %conflict.id,
            %strategy,
            resolved = outcome.resolved,
            detail = %outcome.detail,
            "resolution attempted"
        );
        outcome
    }
}

impl std::fmt::Debug for ResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionEngine")
            .field("backup_dir", &self.backup_dir)
            .field("strategies", &self.handlers.len())
            .finish()
    }
}

const BACKUP_STAMP: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Copy `source` to `<backup_dir>/<name>.<timestamp>.bak`.
///
/// When the newest backup of `<name>` already holds the same content it is
/// returned instead, so repeated conflicts over unchanged content add no
/// files.
fn backup_file(source: &Path, backup_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir)?;
    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "resource".to_string());

    if let Some(latest) = latest_backup(backup_dir, &name)? {
        if hash::content_hash(&latest)? == hash::content_hash(source)? {
            debug!(backup = %latest.display(), "content already backed up");
            return Ok(latest);
        }
    }

    let stamp = Utc::now().format(BACKUP_STAMP);
    let target = backup_dir.join(format!("{name}.{stamp}.bak"));
    fs::copy(source, &target)?;
    Ok(target)
}

/// Newest `<name>.<timestamp>.bak` in `backup_dir`. Timestamps sort lexically.
fn latest_backup(backup_dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    let prefix = format!("{name}.");
    let mut latest: Option<String> = None;
    for entry in fs::read_dir(backup_dir)? {
        let file_name = entry?.file_name().to_string_lossy().into_owned();
        let Some(stamp) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".bak"))
        else {
            continue;
        };
        // "a.txt.orig.<stamp>.bak" shares the prefix of "a.txt".
        if chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S%.fZ").is_err() {
            continue;
        }
        if latest.as_deref().map_or(true, |current| file_name.as_str() > current) {
            latest = Some(file_name);
        }
    }
    Ok(latest.map(|file_name| backup_dir.join(file_name)))
}
