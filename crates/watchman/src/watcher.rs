//! Directory monitors.
//!
//! Each watched directory gets a `notify` watcher whose callback only
//! forwards raw events into a channel. A pump task on the tokio side runs
//! the filters and enqueues on the blocking pool, since filtering stats
//! each path. When the underlying watcher reports an error
//! the pump reports a [`WatcherFault`] and exits; the controller's
//! supervisor then calls [`MonitorSet::recover`] for that directory.

use chrono::{DateTime, Utc};
use serde::Serialize;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WatchdogError};
use crate::intake::Intake;
use crate::metrics::{Metric, MetricsRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherFault {
    pub directory: PathBuf,
    /// Which monitor instance failed; stale faults are ignored.
    pub generation: u64,
    pub message: String,
}

/// A live monitor. Dropping it stops the watcher and the pump.
pub struct ActiveMonitor {
    generation: u64,
    _watcher: RecommendedWatcher,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for ActiveMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveMonitor")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Drop for ActiveMonitor {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[derive(Debug)]
pub enum WatcherHandle {
    Active(ActiveMonitor),
    Failed { error: String, since: DateTime<Utc> },
    Recreating,
}

impl WatcherHandle {
    pub fn is_active(&self) -> bool {
        matches!(self, WatcherHandle::Active(_))
    }
}

#[derive(Debug)]
struct MonitorEntry {
    directory: PathBuf,
    handle: WatcherHandle,
}

/// One directory's monitor, as reported in status and health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorState {
    pub directory: PathBuf,
    pub state: &'static str,
    pub generation: Option<u64>,
    pub error: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorCounts {
    pub total: usize,
    pub active: usize,
}

/// Every directory monitor owned by one watchdog.
#[derive(Debug)]
pub struct MonitorSet {
    entries: Mutex<Vec<MonitorEntry>>,
    intake: Arc<Intake>,
    metrics: Arc<MetricsRegistry>,
    faults: mpsc::UnboundedSender<WatcherFault>,
    next_generation: AtomicU64,
}

impl MonitorSet {
    pub fn new(
        intake: Arc<Intake>,
        metrics: Arc<MetricsRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<WatcherFault>) {
        let (faults, fault_rx) = mpsc::unbounded_channel();
        let set = Self {
            entries: Mutex::new(Vec::new()),
            intake,
            metrics,
            faults,
            next_generation: AtomicU64::new(1),
        };
        (set, fault_rx)
    }

    /// Starts one monitor per directory. A directory that cannot be watched
    /// is recorded as failed; the others still start.
    pub fn start_all(&self, directories: &[PathBuf]) {
        let mut started = Vec::with_capacity(directories.len());
        for dir in directories {
            let handle = match self.spawn(dir) {
                Ok(monitor) => {
                    info!("👀 Watchman: Watching {:?}", dir);
                    WatcherHandle::Active(monitor)
                }
                Err(e) => {
                    self.metrics.increment(Metric::WatcherErrorCount);
                    error!(dir = %dir.display(), error = %e, "Failed to start directory monitor");
                    WatcherHandle::Failed {
                        error: e.to_string(),
                        since: Utc::now(),
                    }
                }
            };
            started.push(MonitorEntry {
                directory: dir.clone(),
                handle,
            });
        }
        *self.lock() = started;
    }

    /// Discards the faulted monitor for `fault.directory` and starts a fresh
    /// one. Never fails: if recreation fails the directory stays unmonitored.
    pub fn recover(&self, fault: &WatcherFault) {
        let old = {
            let mut entries = self.lock();
            let Some(entry) = entries.iter_mut().find(|e| e.directory == fault.directory) else {
                return;
            };
            match &entry.handle {
                WatcherHandle::Active(monitor) if monitor.generation == fault.generation => {}
                _ => {
                    debug!(dir = %fault.directory.display(), "Ignoring stale watcher fault");
                    return;
                }
            }
            std::mem::replace(&mut entry.handle, WatcherHandle::Recreating)
        };
        drop(old);

        warn!(dir = %fault.directory.display(), error = %fault.message, "🔁 Recreating directory monitor");
        let handle = match self.spawn(&fault.directory) {
            Ok(monitor) => {
                info!(dir = %fault.directory.display(), "👀 Watchman: Monitor recreated");
                WatcherHandle::Active(monitor)
            }
            Err(e) => {
                error!(
                    dir = %fault.directory.display(),
                    error = %e,
                    "Monitor recreation failed, directory is unmonitored"
                );
                WatcherHandle::Failed {
                    error: e.to_string(),
                    since: Utc::now(),
                }
            }
        };

        let mut entries = self.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.directory == fault.directory) {
            entry.handle = handle;
        }
    }

    pub fn dispose_all(&self) {
        let entries = std::mem::take(&mut *self.lock());
        if !entries.is_empty() {
            info!(count = entries.len(), "👀 Watchman: Monitors disposed");
        }
    }

    pub fn counts(&self) -> MonitorCounts {
        let entries = self.lock();
        MonitorCounts {
            total: entries.len(),
            active: entries.iter().filter(|e| e.handle.is_active()).count(),
        }
    }

    /// Directories with a live monitor.
    pub fn directories(&self) -> Vec<PathBuf> {
        self.lock()
            .iter()
            .filter(|e| e.handle.is_active())
            .map(|e| e.directory.clone())
            .collect()
    }

    pub fn states(&self) -> Vec<MonitorState> {
        self.lock()
            .iter()
            .map(|e| {
                let mut state = MonitorState {
                    directory: e.directory.clone(),
                    state: "recreating",
                    generation: None,
                    error: None,
                    since: None,
                };
                match &e.handle {
                    WatcherHandle::Active(monitor) => {
                        state.state = "active";
                        state.generation = Some(monitor.generation);
                    }
                    WatcherHandle::Failed { error, since } => {
                        state.state = "failed";
                        state.error = Some(error.clone());
                        state.since = Some(*since);
                    }
                    WatcherHandle::Recreating => {}
                }
                state
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn fault_sender(&self) -> mpsc::UnboundedSender<WatcherFault> {
        self.faults.clone()
    }

    fn spawn(&self, dir: &Path) -> Result<ActiveMonitor> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();

        // Runs on notify's thread: forward only.
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })
        .map_err(|source| WatchdogError::Watcher {
            path: dir.to_path_buf(),
            source,
        })?;

        // Archive trees live below the directory; their moves must not retrigger.
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchdogError::Watcher {
                path: dir.to_path_buf(),
                source,
            })?;

        let pump = tokio::spawn(pump(
            dir.to_path_buf(),
            generation,
            rx,
            self.intake.clone(),
            self.metrics.clone(),
            self.faults.clone(),
        ));

        Ok(ActiveMonitor {
            generation,
            _watcher: watcher,
            pump,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MonitorEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn pump(
    dir: PathBuf,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    intake: Arc<Intake>,
    metrics: Arc<MetricsRegistry>,
    faults: mpsc::UnboundedSender<WatcherFault>,
) {
    while let Some(res) = events.recv().await {
        match res {
            Ok(event) => match event.kind {
                EventKind::Create(_) | EventKind::Modify(_) => {
                    let intake = intake.clone();
                    let source_dir = dir.clone();
                    let submitted = tokio::task::spawn_blocking(move || {
                        for path in event.paths {
                            intake.submit(&path, &source_dir);
                        }
                    })
                    .await;
                    if let Err(e) = submitted {
                        error!(dir = %dir.display(), error = %e, "Intake task failed");
                    }
                }
                EventKind::Remove(_) => {
                    for path in &event.paths {
                        intake.forget(path);
                    }
                }
                _ => {}
            },
            Err(e) => {
                metrics.increment(Metric::WatcherErrorCount);
                error!(dir = %dir.display(), error = %e, "👀 Watchman: Watcher fault");
                let _ = faults.send(WatcherFault {
                    directory: dir.clone(),
                    generation,
                    message: e.to_string(),
                });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FileFilter;
    use crate::ledger::FileLedger;
    use crate::queue::BoundedQueue;
    use std::time::Duration;

    fn intake() -> (Arc<Intake>, Arc<BoundedQueue>, Arc<FileLedger>, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = Arc::new(BoundedQueue::new(10, metrics.clone()));
        let ledger = Arc::new(FileLedger::new());
        let intake = Arc::new(Intake::new(
            FileFilter::new(&[".log".to_string()], Duration::from_secs(3600)),
            ledger.clone(),
            queue.clone(),
            metrics.clone(),
        ));
        (intake, queue, ledger, metrics)
    }

    fn monitor_set() -> (MonitorSet, mpsc::UnboundedReceiver<WatcherFault>, Arc<BoundedQueue>, Arc<MetricsRegistry>) {
        let (intake, queue, _, metrics) = intake();
        let (set, faults) = MonitorSet::new(intake, metrics.clone());
        (set, faults, queue, metrics)
    }

    fn active_generation(set: &MonitorSet, dir: &Path) -> u64 {
        let entries = set.lock();
        match &entries.iter().find(|e| e.directory == dir).unwrap().handle {
            WatcherHandle::Active(monitor) => monitor.generation,
            other => panic!("expected active monitor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unwatchable_directory_is_recorded_as_failed() {
        let good = tempfile::tempdir().unwrap();
        let missing = good.path().join("does-not-exist");
        let (set, _faults, _, metrics) = monitor_set();

        set.start_all(&[good.path().to_path_buf(), missing.clone()]);

        assert_eq!(set.counts(), MonitorCounts { total: 2, active: 1 });
        assert_eq!(set.directories(), vec![good.path().to_path_buf()]);
        assert_eq!(metrics.get(Metric::WatcherErrorCount), 1);
        let failed = set
            .states()
            .into_iter()
            .find(|state| state.directory == missing)
            .unwrap();
        assert_eq!(failed.state, "failed");
        assert!(failed.error.is_some());
        assert!(failed.since.is_some());
        assert_eq!(failed.generation, None);
    }

    #[tokio::test]
    async fn recover_replaces_the_faulted_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let (set, _faults, _, _) = monitor_set();
        set.start_all(&[dir.path().to_path_buf()]);
        let before = active_generation(&set, dir.path());

        set.recover(&WatcherFault {
            directory: dir.path().to_path_buf(),
            generation: before,
            message: "inotify queue overflow".to_string(),
        });

        let after = active_generation(&set, dir.path());
        assert_ne!(before, after);
        assert_eq!(set.counts().active, 1);
    }

    #[tokio::test]
    async fn stale_fault_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (set, _faults, _, _) = monitor_set();
        set.start_all(&[dir.path().to_path_buf()]);
        let current = active_generation(&set, dir.path());

        set.recover(&WatcherFault {
            directory: dir.path().to_path_buf(),
            generation: current + 100,
            message: "old".to_string(),
        });

        assert_eq!(active_generation(&set, dir.path()), current);
    }

    #[tokio::test]
    async fn failed_recreation_leaves_directory_unmonitored() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("inbox");
        std::fs::create_dir(&dir).unwrap();
        let (set, _faults, _, _) = monitor_set();
        set.start_all(&[dir.clone()]);
        let generation = active_generation(&set, &dir);
        std::fs::remove_dir_all(&dir).unwrap();

        set.recover(&WatcherFault {
            directory: dir.clone(),
            generation,
            message: "directory vanished".to_string(),
        });

        assert_eq!(set.counts(), MonitorCounts { total: 1, active: 0 });
        assert!(set.directories().is_empty());
    }

    #[tokio::test]
    async fn new_file_reaches_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (set, _faults, queue, _) = monitor_set();
        set.start_all(&[dir.path().to_path_buf()]);

        std::fs::write(dir.path().join("err1.log"), "stack trace").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while queue.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "file never queued");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(&dir.path().join("err1.log")));

        set.dispose_all();
        assert_eq!(set.counts().total, 0);
    }

    #[tokio::test]
    async fn watcher_error_reports_a_fault_and_ends_the_pump() {
        let dir = tempfile::tempdir().unwrap();
        let (intake, _, _, metrics) = intake();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();

        events_tx
            .send(Err(notify::Error::generic("inotify queue overflow")))
            .unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            pump(dir.path().to_path_buf(), 7, events_rx, intake, metrics.clone(), faults_tx),
        )
        .await
        .unwrap();

        assert_eq!(metrics.get(Metric::WatcherErrorCount), 1);
        let fault = faults_rx.try_recv().unwrap();
        assert_eq!(fault.directory, dir.path().to_path_buf());
        assert_eq!(fault.generation, 7);
        assert!(fault.message.contains("inotify queue overflow"));
        // Events after the fault belong to the replacement monitor.
        assert!(events_tx.send(Ok(Event::new(EventKind::Any))).is_err());
    }

    #[tokio::test]
    async fn pump_queues_created_files_and_forgets_removed_ones() {
        let dir = tempfile::tempdir().unwrap();
        let created = dir.path().join("err1.log");
        std::fs::write(&created, "trace").unwrap();
        let removed = dir.path().join("stuck.log");
        let (intake, queue, ledger, metrics) = intake();
        ledger.mark_dead_letter(&removed, None);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();

        events_tx
            .send(Ok(Event::new(EventKind::Create(notify::event::CreateKind::File)).add_path(created.clone())))
            .unwrap();
        events_tx
            .send(Ok(Event::new(EventKind::Remove(notify::event::RemoveKind::File)).add_path(removed)))
            .unwrap();
        drop(events_tx);
        pump(dir.path().to_path_buf(), 1, events_rx, intake, metrics.clone(), faults_tx).await;

        assert_eq!(queue.dequeue().unwrap().path, created);
        assert_eq!(ledger.dead_letter_count(), 0);
        assert_eq!(metrics.get(Metric::WatcherErrorCount), 0);
        assert!(faults_rx.try_recv().is_err());
    }
}
