//! Change sources
//!
//! A [`ChangeSource`] turns raw file-system activity into notices carrying
//! the normalized path of a tracked resource. The service drains those notices
//! and calls `observe_change`, which decides whether content really changed.
//! Spurious notices are therefore harmless.
//!
//! Two implementations:
//! - [`PollingSource`]: one tokio interval task per path, fires when the
//!   mtime or size differs from the previous tick
//! - [`NotifySource`]: OS notifications via `notify`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Sending half of the change-notice channel
pub type ChangeSender = mpsc::UnboundedSender<String>;

/// Receiving half of the change-notice channel
pub type ChangeReceiver = mpsc::UnboundedReceiver<String>;

/// Externally supplied change notification.
pub trait ChangeSource: Send + Sync {
    /// Start reporting changes of `location` under `key`.
    fn subscribe(&self, key: &str, location: &Path) -> Result<()>;

    /// Stop reporting changes for `key`. Unknown keys are ignored.
    fn unsubscribe(&self, key: &str) -> Result<()>;
}

// =============================================================================
// Polling
// =============================================================================

pub struct PollingSource {
    runtime: Handle,
    interval: Duration,
    sender: ChangeSender,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollingSource {
    /// Create a polling source on the current tokio runtime.
    pub fn new(interval: Duration) -> Result<(Self, ChangeReceiver)> {
        let runtime = Handle::try_current().map_err(|err| {
            Error::OperationFailed(format!("polling source needs a tokio runtime: {err}"))
        })?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok((
            Self {
                runtime,
                interval,
                sender,
                tasks: Mutex::new(HashMap::new()),
            },
            receiver,
        ))
    }

    /// Number of paths currently polled.
    pub fn watched(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ChangeSource for PollingSource {
    fn subscribe(&self, key: &str, location: &Path) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.contains_key(key) {
            return Ok(());
        }

        let key_owned = key.to_string();
        let location = location.to_path_buf();
        let sender = self.sender.clone();
        let interval = self.interval;
        let handle = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last = stamp(&location);
            loop {
                ticker.tick().await;
                let current = stamp(&location);
                if current == last {
                    continue;
                }
                last = current;
                trace!(path = %key_owned, "poll detected change");
                if sender.send(key_owned.clone()).is_err() {
                    break;
                }
            }
        });
        tasks.insert(key.to_string(), handle);
        debug!(path = key, interval_ms = interval.as_millis() as u64, "polling started");
        Ok(())
    }

    fn unsubscribe(&self, key: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tasks.remove(key) {
            handle.abort();
            debug!(path = key, "polling stopped");
        }
        Ok(())
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

/// mtime and size, `None` when the file is missing.
fn stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

// =============================================================================
// OS notifications
// =============================================================================

pub struct NotifySource {
    watcher: Mutex<RecommendedWatcher>,
    /// Watched location (as given and canonical) -> key
    keys: Arc<Mutex<HashMap<PathBuf, String>>>,
    /// key -> watched location as given
    locations: Mutex<HashMap<String, PathBuf>>,
}

impl NotifySource {
    pub fn new() -> Result<(Self, ChangeReceiver)> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let keys: Arc<Mutex<HashMap<PathBuf, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let lookup = Arc::clone(&keys);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "watcher error");
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let keys = lookup.lock().unwrap_or_else(PoisonError::into_inner);
            for path in &event.paths {
                if let Some(key) = keys.get(path) {
                    trace!(path = %key, kind = ?event.kind, "os change notice");
                    let _ = sender.send(key.clone());
                }
            }
        })?;

        Ok((
            Self {
                watcher: Mutex::new(watcher),
                keys,
                locations: Mutex::new(HashMap::new()),
            },
            receiver,
        ))
    }
}

impl ChangeSource for NotifySource {
    fn subscribe(&self, key: &str, location: &Path) -> Result<()> {
        let mut locations = self.locations.lock().unwrap_or_else(PoisonError::into_inner);
        if locations.contains_key(key) {
            return Ok(());
        }

        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .watch(location, RecursiveMode::NonRecursive)?;

        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.insert(location.to_path_buf(), key.to_string());
        if let Ok(canonical) = location.canonicalize() {
            keys.insert(canonical, key.to_string());
        }
        locations.insert(key.to_string(), location.to_path_buf());
        debug!(path = key, "os watch started");
        Ok(())
    }

    fn unsubscribe(&self, key: &str) -> Result<()> {
        let mut locations = self.locations.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(location) = locations.remove(key) else {
            return Ok(());
        };
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, watched| watched != key);
        if let Err(err) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwatch(&location)
        {
            // The file may already be gone, which removes the OS watch too.
            debug!(path = key, error = %err, "unwatch failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn polling_reports_size_change() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("a.txt");
        fs::write(&location, "one").unwrap();

        let (source, mut rx) = PollingSource::new(Duration::from_millis(20)).unwrap();
        source.subscribe("/a.txt", &location).unwrap();
        source.subscribe("/a.txt", &location).unwrap();
        assert_eq!(source.watched(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        fs::write(&location, "one two three").unwrap();

        let key = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("notice in time")
            .expect("channel open");
        assert_eq!(key, "/a.txt");
    }

    #[tokio::test]
    async fn polling_unsubscribe_stops_task() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("a.txt");
        fs::write(&location, "one").unwrap();

        let (source, _rx) = PollingSource::new(Duration::from_millis(20)).unwrap();
        source.subscribe("/a.txt", &location).unwrap();
        source.unsubscribe("/a.txt").unwrap();
        source.unsubscribe("/never").unwrap();
        assert_eq!(source.watched(), 0);
    }

    #[test]
    fn polling_requires_runtime() {
        assert!(PollingSource::new(Duration::from_millis(20)).is_err());
    }
}
