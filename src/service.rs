//! Coordination service
//!
//! [`CoordinationService`] is the public façade: it owns the file registry
//! and the shared context behind a single mutex, persists both through a
//! [`StateStore`] after every mutation, and publishes [`CoordEvent`]s.
//!
//! The mutex is a plain `std::sync::Mutex` and is never held across an
//! `.await`; [`CoordinationService::coordinate_file_access`] is the only
//! suspending operation and does its waiting with the lock released.
//!
//! Ordinary contention is not an error. A denied lock, a release by a
//! non-holder and a coordination timeout all come back as `Ok(false)`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{AgentMessage, MessageKind, Payload, Recipient, BROADCAST};
use crate::config::Settings;
use crate::conflict::{self, ConflictDetection, ResolutionStrategy};
use crate::context::SharedContext;
use crate::error::{Error, Result};
use crate::events::{CoordEvent, EventBus};
use crate::intent::AgentIntent;
use crate::lease::{LockDecision, LockKind, LockManager};
use crate::paths::{resolve_resource, resource_key};
use crate::registry::{FileRegistry, FileState, Observation};
use crate::resolution::{ResolutionEngine, StrategyHandler};
use crate::store::{DirStore, StateStore};
use crate::watch::{ChangeReceiver, ChangeSource};

/// Counters reported by [`CoordinationService::get_conflict_stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConflictStats {
    pub tracked_files: usize,
    pub active_agents: usize,
    pub active_locks: usize,
    pub active_intents: usize,
}

/// Everything guarded by the service mutex.
struct State {
    registry: FileRegistry,
    context: SharedContext,
}

pub struct CoordinationService {
    state: Mutex<State>,
    store: StateStore,
    locks: LockManager,
    resolver: ResolutionEngine,
    events: EventBus,
    settings: Settings,
    changes: Option<Arc<dyn ChangeSource>>,
}

impl CoordinationService {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Build a service over `store`, hydrating from whatever it holds.
    pub fn new(store: StateStore, settings: Settings) -> Self {
        let registry = store.load_files();
        let context = store.load_context();
        info!(
            files = registry.len(),
            agents = context.active_agents().len(),
            "coordination service ready"
        );
        Self {
            state: Mutex::new(State { registry, context }),
            locks: LockManager::new(settings.lease_ttl),
            resolver: ResolutionEngine::new(settings.backup_dir.clone()),
            events: EventBus::new(),
            store,
            settings,
            changes: None,
        }
    }

    /// Service persisted as JSON files under `settings.state_dir`.
    pub fn open(settings: Settings) -> Result<Self> {
        std::fs::create_dir_all(&settings.state_dir)?;
        let backend = DirStore::new(settings.state_dir.clone(), settings.lock_timeout_ms);
        Ok(Self::new(StateStore::new(Arc::new(backend)), settings))
    }

    /// Service over a fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::new(StateStore::in_memory(), Settings::default())
    }

    /// Attach a change source and subscribe every resource already tracked.
    pub fn with_change_source(mut self, source: Arc<dyn ChangeSource>) -> Self {
        {
            let state = self.lock_state();
            for file in state.registry.iter() {
                if let Err(err) = source.subscribe(&file.path, &file.location) {
                    warn!(path = %file.path, error = %err, "could not watch tracked file");
                }
            }
        }
        self.changes = Some(source);
        self
    }

    /// Replace the handler used for `strategy`.
    pub fn with_strategy(
        mut self,
        strategy: ResolutionStrategy,
        handler: impl StrategyHandler + 'static,
    ) -> Self {
        self.resolver.register(strategy, handler);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &State) -> Result<()> {
        self.store.save_files(&state.registry)?;
        self.store.save_context(&state.context)
    }

    // =========================================================================
    // Agents
    // =========================================================================

    /// Register `agent`. Re-registering keeps its mailbox. Returns false if
    /// it was already registered.
    pub fn register_agent(&self, agent: &str) -> Result<bool> {
        validate_agent_id(agent)?;
        let mut state = self.lock_state();
        let added = state.context.register(agent);
        self.persist(&state)?;
        if added {
            info!(agent, "agent registered");
        }
        Ok(added)
    }

    /// Remove `agent` from every map and force-release its locks.
    pub fn unregister_agent(&self, agent: &str) -> Result<bool> {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let held = state.registry.locked_by(agent);
        for path in &held {
            if let Some(file) = state.registry.get_mut(path) {
                self.locks.release(file, agent);
            }
        }
        let removed = state.context.unregister(agent);

        let mut sent = Vec::new();
        for path in &held {
            let message = AgentMessage::new(
                agent,
                BROADCAST,
                MessageKind::Notification,
                Payload::LockReleased { path: path.clone() },
            );
            state.context.mailboxes_mut().deliver(&message);
            sent.push(message);
        }
        self.persist(state)?;
        drop(guard);

        for path in held {
            self.events.emit(CoordEvent::LockReleased {
                path,
                agent: agent.to_string(),
            });
        }
        for message in sent {
            self.events.emit(CoordEvent::MessageSent { message });
        }
        if removed {
            info!(agent, "agent unregistered");
        }
        Ok(removed)
    }

    pub fn is_registered(&self, agent: &str) -> bool {
        self.lock_state().context.is_registered(agent)
    }

    /// Registered agents in id order.
    pub fn agents(&self) -> Vec<String> {
        self.lock_state()
            .context
            .active_agents()
            .iter()
            .cloned()
            .collect()
    }

    // =========================================================================
    // File registry
    // =========================================================================

    /// Start tracking `path`. Idempotent; returns the current state.
    pub fn track_file(&self, path: &str, agent: &str) -> Result<FileState> {
        let (key, location) = resolve_resource(path)?;
        let mut state = self.lock_state();
        if let Some(existing) = state.registry.get(&key) {
            return Ok(existing.clone());
        }
        let file = self.track_locked(&mut state, key, &location, agent)?;
        self.persist(&state)?;
        Ok(file)
    }

    fn track_locked(
        &self,
        state: &mut State,
        key: String,
        location: &Path,
        agent: &str,
    ) -> Result<FileState> {
        let file = FileState::track(key, location, agent)?;
        if let Some(source) = &self.changes {
            if let Err(err) = source.subscribe(&file.path, &file.location) {
                warn!(path = %file.path, error = %err, "could not watch tracked file");
            }
        }
        debug!(path = %file.path, agent, hash = %file.content_hash, "tracking file");
        state.registry.insert(file.clone());
        Ok(file)
    }

    /// Stop tracking `path`. Returns false if it was not tracked.
    pub fn untrack_file(&self, path: &str) -> Result<bool> {
        let key = resource_key(path)?;
        let mut state = self.lock_state();
        if state.registry.remove(&key).is_none() {
            return Ok(false);
        }
        if let Some(source) = &self.changes {
            source.unsubscribe(&key)?;
        }
        self.persist(&state)?;
        debug!(path = %key, "untracked file");
        Ok(true)
    }

    pub fn file_state(&self, path: &str) -> Option<FileState> {
        let key = resource_key(path).ok()?;
        self.lock_state().registry.get(&key).cloned()
    }

    /// All tracked files in path order.
    pub fn files(&self) -> Vec<FileState> {
        self.lock_state().registry.iter().cloned().collect()
    }

    /// Re-read `path` from disk and record a content change if any.
    ///
    /// A change while the file is locked yields a concurrent-modification
    /// conflict, classified against the state before the change is applied.
    pub fn observe_change(&self, path: &str) -> Result<Option<ConflictDetection>> {
        let key = resource_key(path)?;
        let mut state = self.lock_state();
        let Some(file) = state.registry.get_mut(&key) else {
            debug!(path = %key, "change notice for untracked path");
            return Ok(None);
        };

        let observation = Observation::capture(&file.location)?;
        if observation.content_hash == file.content_hash {
            return Ok(None);
        }

        let detected = conflict::detect_concurrent_modification(file, &observation);
        let version = file.record_change(observation);
        let agent = file.last_agent.clone();
        self.persist(&state)?;
        drop(state);

        debug!(path = %key, version, "file changed");
        self.events.emit(CoordEvent::FileChanged {
            path: key,
            version,
            agent,
        });
        if let Some(conflict) = &detected {
            warn!(
                path = %conflict.primary_resource().unwrap_or_default(),
                agents = ?conflict.agents,
                "concurrent modification detected"
            );
            self.events.emit(CoordEvent::Conflict {
                conflict: conflict.clone(),
            });
        }
        Ok(detected)
    }

    // =========================================================================
    // Locks
    // =========================================================================

    /// Try to lock `path` for `agent`. Untracked paths are tracked first.
    ///
    /// Returns `Ok(false)` when an incompatible live lock is held by another
    /// agent; the holder is then sent a conflict notice.
    pub fn request_file_lock(&self, path: &str, agent: &str, kind: LockKind) -> Result<bool> {
        let (key, location) = resolve_resource(path)?;
        let now = Utc::now();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if !state.registry.contains(&key) {
            self.track_locked(state, key.clone(), &location, agent)?;
        }

        let mut decision = self.acquire(state, &key, agent, kind, now)?;
        let mut violation = None;
        let mut notice = None;

        if let LockDecision::Blocked { holder, .. } = decision.clone() {
            let file = state
                .registry
                .get(&key)
                .ok_or_else(|| Error::OperationFailed(format!("{key} vanished while locked")))?;
            let detected = conflict::detect_lock_violation(file, agent, kind, &holder);
            let message = AgentMessage::new(
                agent,
                holder.as_str(),
                MessageKind::Conflict,
                Payload::ConflictNotice {
                    conflict: Box::new(detected.clone()),
                },
            );
            state.context.mailboxes_mut().deliver(&message);
            notice = Some(message);

            let outcome = self.resolver.attempt(&detected, &state.registry);
            if outcome.resolved {
                decision = self.acquire(state, &key, agent, kind, now)?;
            }
            violation = Some(detected);
        }

        let mut announcement = None;
        if let LockDecision::Granted { .. } = &decision {
            let message = AgentMessage::new(
                agent,
                BROADCAST,
                MessageKind::Notification,
                Payload::LockAcquired {
                    path: key.clone(),
                    kind,
                },
            );
            state.context.mailboxes_mut().deliver(&message);
            announcement = Some(message);
        }

        self.persist(state)?;
        drop(guard);

        if let Some(conflict) = violation {
            self.events.emit(CoordEvent::Conflict { conflict });
        }
        if let Some(message) = notice {
            self.events.emit(CoordEvent::MessageSent { message });
        }

        match decision {
            LockDecision::Granted {
                expires_at,
                reclaimed_from,
            } => {
                if let Some(previous) = reclaimed_from {
                    self.events.emit(CoordEvent::LockReleased {
                        path: key.clone(),
                        agent: previous,
                    });
                }
                info!(path = %key, agent, %kind, %expires_at, "lock granted");
                self.events.emit(CoordEvent::LockGranted {
                    path: key,
                    agent: agent.to_string(),
                    kind,
                    expires_at,
                });
                if let Some(message) = announcement {
                    self.events.emit(CoordEvent::MessageSent { message });
                }
                Ok(true)
            }
            LockDecision::Blocked { holder, held } => {
                info!(path = %key, agent, %kind, %holder, %held, "lock denied");
                Ok(false)
            }
        }
    }

    fn acquire(
        &self,
        state: &mut State,
        key: &str,
        agent: &str,
        kind: LockKind,
        now: chrono::DateTime<Utc>,
    ) -> Result<LockDecision> {
        let file = state
            .registry
            .get_mut(key)
            .ok_or_else(|| Error::OperationFailed(format!("{key} is not tracked")))?;
        Ok(self.locks.try_acquire(file, agent, kind, now))
    }

    /// Release `agent`'s lock on `path`. Returns false if it held none.
    pub fn release_file_lock(&self, path: &str, agent: &str) -> Result<bool> {
        let key = resource_key(path)?;
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let released = match state.registry.get_mut(&key) {
            Some(file) => self.locks.release(file, agent),
            None => false,
        };
        if !released {
            warn!(path = %key, agent, "release ignored; agent holds no lock");
            return Ok(false);
        }

        let message = AgentMessage::new(
            agent,
            BROADCAST,
            MessageKind::Notification,
            Payload::LockReleased { path: key.clone() },
        );
        state.context.mailboxes_mut().deliver(&message);
        self.persist(state)?;
        drop(guard);

        info!(path = %key, agent, "lock released");
        self.events.emit(CoordEvent::LockReleased {
            path: key,
            agent: agent.to_string(),
        });
        self.events.emit(CoordEvent::MessageSent { message });
        Ok(true)
    }

    // =========================================================================
    // Intents
    // =========================================================================

    /// Record `intent` (replacing the agent's previous one) and report its
    /// overlaps with other agents' intents. Each overlapping agent is sent a
    /// conflict notice.
    pub fn declare_intent(&self, intent: AgentIntent) -> Result<Vec<ConflictDetection>> {
        intent.validate()?;
        let agent = intent.agent_id.clone();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let conflicts = conflict::detect_intent_conflicts(&intent, state.context.intents());
        state.context.intents_mut().declare(intent);

        let mut sent = Vec::new();
        for detected in &conflicts {
            for other in detected.agents.iter().filter(|a| **a != agent) {
                let message = AgentMessage::new(
                    agent.as_str(),
                    other.as_str(),
                    MessageKind::Conflict,
                    Payload::ConflictNotice {
                        conflict: Box::new(detected.clone()),
                    },
                );
                state.context.mailboxes_mut().deliver(&message);
                sent.push(message);
            }
        }
        self.persist(state)?;
        drop(guard);

        debug!(agent = %agent, conflicts = conflicts.len(), "intent declared");
        if !conflicts.is_empty() {
            self.events.emit(CoordEvent::IntentConflict {
                agent,
                conflicts: conflicts.clone(),
            });
        }
        for message in sent {
            self.events.emit(CoordEvent::MessageSent { message });
        }
        Ok(conflicts)
    }

    /// Overlaps `intent` would have with other agents' intents. Read-only.
    pub fn detect_intent_conflicts(&self, intent: &AgentIntent) -> Vec<ConflictDetection> {
        let state = self.lock_state();
        conflict::detect_intent_conflicts(intent, state.context.intents())
    }

    /// Withdraw `agent`'s intent. Returns false if it had none.
    pub fn withdraw_intent(&self, agent: &str) -> Result<bool> {
        let mut state = self.lock_state();
        let withdrawn = state.context.intents_mut().withdraw(agent).is_some();
        if withdrawn {
            self.persist(&state)?;
        }
        Ok(withdrawn)
    }

    pub fn intents(&self) -> Vec<AgentIntent> {
        self.lock_state().context.intents().iter().cloned().collect()
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Deliver a message. Direct mail to an unregistered agent is dropped.
    pub fn send_message(
        &self,
        from: &str,
        to: impl Into<Recipient>,
        kind: MessageKind,
        payload: Payload,
    ) -> Result<AgentMessage> {
        validate_agent_id(from)?;
        let message = AgentMessage::new(from, to, kind, payload);
        let mut state = self.lock_state();
        let reached = state.context.mailboxes_mut().deliver(&message);
        if reached.is_empty() && !message.to.is_broadcast() {
            debug!(from, to = %message.to, "message dropped; recipient not registered");
        }
        self.persist(&state)?;
        drop(state);

        self.events.emit(CoordEvent::MessageSent {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Drain `agent`'s mailbox, oldest first.
    pub fn get_messages(&self, agent: &str) -> Result<Vec<AgentMessage>> {
        let mut state = self.lock_state();
        let messages = state.context.mailboxes_mut().drain(agent);
        if !messages.is_empty() {
            self.persist(&state)?;
        }
        Ok(messages)
    }

    pub fn pending_messages(&self, agent: &str) -> usize {
        self.lock_state().context.mailboxes().pending(agent)
    }

    // =========================================================================
    // Coordination handshake
    // =========================================================================

    /// Ask other agents whether `agent` may perform `operation` on `path`.
    ///
    /// With no predicted conflicts this returns `true` immediately. Otherwise
    /// a coordination request is broadcast and the first coordination
    /// response for the same path addressed to `agent` decides the outcome.
    /// The response is also removed from `agent`'s mailbox. No response
    /// within the coordination timeout means `false`.
    pub async fn coordinate_file_access(
        &self,
        path: &str,
        agent: &str,
        operation: &str,
    ) -> Result<bool> {
        let key = resource_key(path)?;
        // Subscribe before broadcasting so a fast reply is not missed.
        let mut events = self.events.subscribe();

        if self.request_coordination(&key, agent, operation)?.is_empty() {
            return Ok(true);
        }

        let wait = self.await_verdict(&mut events, agent, &key);
        match tokio::time::timeout(self.settings.coordination_timeout, wait).await {
            Ok(answer) => {
                let approved = answer?;
                info!(path = %key, agent, approved, "coordination answered");
                Ok(approved)
            }
            Err(_) => {
                info!(path = %key, agent, "coordination timed out");
                Ok(false)
            }
        }
    }

    /// Wait on the event stream for a response to `agent` about `key`.
    ///
    /// The matching response is taken out of the mailbox as well. If the
    /// receiver lags, the mailbox is consulted directly since the response
    /// may have been among the skipped events.
    async fn await_verdict(
        &self,
        events: &mut broadcast::Receiver<CoordEvent>,
        agent: &str,
        key: &str,
    ) -> Result<bool> {
        loop {
            match events.recv().await {
                Ok(CoordEvent::MessageSent { message })
                    if message.kind == MessageKind::Coordination && message.to.is_agent(agent) =>
                {
                    if let Some(approved) = message.payload.coordination_verdict(key) {
                        // An unregistered requester has no mailbox to drain.
                        let queued = self.take_coordination_verdict(agent, key)?;
                        return Ok(queued.unwrap_or(approved));
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "coordination wait lagged behind events; checking mailbox");
                    if let Some(approved) = self.take_coordination_verdict(agent, key)? {
                        return Ok(approved);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(false),
            }
        }
    }

    /// Predict conflicts for `agent` working on `path` and, if any, broadcast
    /// a coordination request. Returns the predicted conflicts.
    ///
    /// Responses for `path` already waiting in `agent`'s mailbox answered an
    /// earlier request and are discarded before the new one goes out.
    pub fn request_coordination(
        &self,
        path: &str,
        agent: &str,
        operation: &str,
    ) -> Result<Vec<ConflictDetection>> {
        let key = resource_key(path)?;
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let stale = state.context.mailboxes_mut().discard(agent, |message| {
            message.kind == MessageKind::Coordination
                && message.payload.coordination_verdict(&key).is_some()
        });
        if stale > 0 {
            debug!(path = %key, agent, stale, "discarded stale coordination responses");
        }

        let conflicts = conflict::detect_access_conflicts(
            &key,
            agent,
            operation,
            state.context.intents(),
            &state.registry,
            Utc::now(),
        );
        if conflicts.is_empty() {
            if stale > 0 {
                self.persist(state)?;
            }
            return Ok(conflicts);
        }

        let message = AgentMessage::new(
            agent,
            BROADCAST,
            MessageKind::Coordination,
            Payload::CoordinationRequest {
                path: key.clone(),
                operation: operation.to_string(),
                conflicts: conflicts.clone(),
            },
        );
        state.context.mailboxes_mut().deliver(&message);
        self.persist(state)?;
        drop(guard);

        debug!(path = %key, agent, operation, conflicts = conflicts.len(), "coordination requested");
        self.events.emit(CoordEvent::MessageSent { message });
        Ok(conflicts)
    }

    /// Answer a coordination request from `to` about `path`.
    pub fn respond_to_coordination(
        &self,
        from: &str,
        to: &str,
        path: &str,
        approved: bool,
    ) -> Result<AgentMessage> {
        self.send_message(
            from,
            to,
            MessageKind::Coordination,
            Payload::CoordinationResponse {
                path: resource_key(path)?,
                approved,
            },
        )
    }

    /// Remove and return the first coordination verdict for `path` waiting
    /// in `agent`'s mailbox. Other mail stays queued.
    pub fn take_coordination_verdict(&self, agent: &str, path: &str) -> Result<Option<bool>> {
        let key = resource_key(path)?;
        let mut state = self.lock_state();
        let verdict = state
            .context
            .mailboxes_mut()
            .take_first(agent, |message| {
                message.kind == MessageKind::Coordination
                    && message.payload.coordination_verdict(&key).is_some()
            })
            .and_then(|message| message.payload.coordination_verdict(&key));
        if verdict.is_some() {
            self.persist(&state)?;
        }
        Ok(verdict)
    }

    // =========================================================================
    // Shared state
    // =========================================================================

    pub fn global(&self, key: &str) -> Option<serde_json::Value> {
        self.lock_state().context.global(key).cloned()
    }

    /// Set (or with `None`, clear) a global value. Returns the previous one.
    pub fn set_global(
        &self,
        key: &str,
        value: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        let mut state = self.lock_state();
        let previous = state.context.set_global(key, value);
        self.persist(&state)?;
        Ok(previous)
    }

    pub fn get_conflict_stats(&self) -> ConflictStats {
        let state = self.lock_state();
        ConflictStats {
            tracked_files: state.registry.len(),
            active_agents: state.context.active_agents().len(),
            active_locks: state.registry.active_locks(Utc::now()),
            active_intents: state.context.intents().len(),
        }
    }

    /// Refresh `last_sync_at` and force-persist both aggregates.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.lock_state();
        let now = Utc::now();
        state.context.touch_sync(now);
        self.persist(&state)?;
        debug!(at = %now, "state synced");
        Ok(())
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Background work
    // =========================================================================

    /// Run the periodic sync and feed change notices into
    /// [`observe_change`](Self::observe_change) until shut down.
    pub fn spawn_background(self: Arc<Self>, changes: Option<ChangeReceiver>) -> BackgroundHandle {
        let (shutdown, mut stop) = oneshot::channel();
        let period = self.settings.sync_interval;
        let task = tokio::spawn(async move {
            let mut changes = changes;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {
                        if let Err(err) = self.sync() {
                            warn!(error = %err, "periodic sync failed");
                        }
                    }
                    notice = next_change(&mut changes) => match notice {
                        Some(path) => {
                            if let Err(err) = self.observe_change(&path) {
                                warn!(path = %path, error = %err, "change observation failed");
                            }
                        }
                        None => changes = None,
                    },
                }
            }
            if let Err(err) = self.sync() {
                warn!(error = %err, "final sync failed");
            }
            debug!("background worker stopped");
        });
        BackgroundHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

async fn next_change(changes: &mut Option<ChangeReceiver>) -> Option<String> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for CoordinationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationService")
            .field("settings", &self.settings)
            .field("resolver", &self.resolver)
            .field("watching", &self.changes.is_some())
            .finish_non_exhaustive()
    }
}

/// Handle to the task started by [`CoordinationService::spawn_background`].
///
/// Dropping the handle also stops the worker.
pub struct BackgroundHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BackgroundHandle {
    /// Stop the worker after a final sync and wait for it to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        (&mut self.task)
            .await
            .map_err(|err| Error::OperationFailed(format!("background worker failed: {err}")))
    }
}

fn validate_agent_id(agent: &str) -> Result<()> {
    if agent.trim().is_empty() {
        return Err(Error::InvalidArgument("agent id cannot be empty".to_string()));
    }
    if agent == BROADCAST {
        return Err(Error::InvalidArgument(format!(
            "'{BROADCAST}' is reserved for broadcast"
        )));
    }
    Ok(())
}
