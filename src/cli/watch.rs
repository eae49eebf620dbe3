//! fcoord watch command implementation
//!
//! Long-running loop that feeds change notices into `observe_change` and
//! runs the periodic sync. Each step opens its own session, so tracking
//! changes made by other fcoord processes are picked up at the next sync
//! tick. Events can be mirrored as JSONL.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::cli::{GlobalOptions, Session};
use crate::config::{parse_std_duration, Settings};
use crate::error::Result;
use crate::events::{Event, EventDestination, EventSink};
use crate::output::{emit_success, HumanOutput};
use crate::service::CoordinationService;
use crate::watch::{ChangeReceiver, ChangeSource, NotifySource, PollingSource};

/// Options for `fcoord watch`
pub struct WatchOptions {
    pub events: Option<String>,
    pub notify: bool,
    pub duration: Option<String>,
}

#[derive(Serialize, Default)]
struct WatchReport {
    watched_files: usize,
    observed_changes: usize,
    conflicts: usize,
    syncs: usize,
}

struct Watcher {
    settings: Settings,
    agent: String,
    source: Arc<dyn ChangeSource>,
    watched: BTreeMap<String, PathBuf>,
    sink: Option<EventSink>,
    report: WatchReport,
}

pub async fn run(globals: &GlobalOptions, options: WatchOptions) -> Result<()> {
    let (settings, agent) = globals.resolve()?;
    let stop_after = options.duration.as_deref().map(parse_std_duration).transpose()?;
    let sink = match EventDestination::parse(options.events.as_deref()) {
        Some(destination) => Some(destination.open()?),
        None => None,
    };

    let (source, mut changes): (Arc<dyn ChangeSource>, ChangeReceiver) = if options.notify {
        let (source, changes) = NotifySource::new()?;
        (Arc::new(source), changes)
    } else {
        let (source, changes) = PollingSource::new(settings.poll_interval)?;
        (Arc::new(source), changes)
    };

    let mut watcher = Watcher {
        settings: settings.clone(),
        agent,
        source,
        watched: BTreeMap::new(),
        sink,
        report: WatchReport::default(),
    };
    watcher.reconcile()?;
    info!(files = watcher.watched.len(), "watching tracked files");

    let period = settings.sync_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    let expired = async {
        match stop_after {
            Some(duration) => sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(expired);

    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            _ = &mut expired => break,
            _ = ticker.tick() => {
                if let Err(err) = watcher.step(|service| service.sync()) {
                    warn!(error = %err, "sync failed");
                    continue;
                }
                watcher.report.syncs += 1;
                if let Err(err) = watcher.reconcile() {
                    warn!(error = %err, "could not refresh watched files");
                }
            }
            notice = changes.recv() => {
                let Some(path) = notice else { break };
                match watcher.step(|service| service.observe_change(&path)) {
                    Ok(conflict) => {
                        watcher.report.observed_changes += 1;
                        if conflict.is_some() {
                            watcher.report.conflicts += 1;
                        }
                    }
                    Err(err) => warn!(path = %path, error = %err, "change observation failed"),
                }
            }
        }
    }

    if let Err(err) = watcher.step(|service| service.sync()) {
        warn!(error = %err, "final sync failed");
    }
    watcher.report.watched_files = watcher.watched.len();

    let mut human = HumanOutput::new("fcoord watch: stopped");
    human.push_summary("watched files", watcher.report.watched_files.to_string());
    human.push_summary("observed changes", watcher.report.observed_changes.to_string());
    human.push_summary("conflicts", watcher.report.conflicts.to_string());
    human.push_summary("syncs", watcher.report.syncs.to_string());

    emit_success(globals.output(), "watch", &watcher.report, Some(&human))
}

impl Watcher {
    /// Run `op` against a fresh session and mirror the events it emitted.
    fn step<T>(&mut self, op: impl FnOnce(&CoordinationService) -> Result<T>) -> Result<T> {
        let session = Session::open_with(self.settings.clone(), self.agent.clone())?;
        let mut events = session.service.subscribe();
        let out = op(&session.service)?;
        drop(session);

        if let Some(sink) = self.sink.as_mut() {
            while let Ok(event) = events.try_recv() {
                sink.emit(&Event::new(event))?;
            }
        }
        Ok(out)
    }

    /// Subscribe newly tracked files and drop untracked ones.
    fn reconcile(&mut self) -> Result<()> {
        let files = self.step(|service| Ok(service.files()))?;
        let current: BTreeMap<String, PathBuf> = files
            .into_iter()
            .map(|file| (file.path, file.location))
            .collect();

        for key in self.watched.keys() {
            if !current.contains_key(key) {
                self.source.unsubscribe(key)?;
            }
        }
        for (key, location) in &current {
            if !self.watched.contains_key(key) {
                if let Err(err) = self.source.subscribe(key, location) {
                    warn!(path = %key, error = %err, "could not watch tracked file");
                }
            }
        }
        self.watched = current;
        Ok(())
    }
}
