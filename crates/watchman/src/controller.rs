use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use tracewarden_core::config::WatchdogConfig;

use crate::dispatch::{DispatchLoop, wait_cancel};
use crate::error::{Result, WatchdogError};
use crate::filter::FileFilter;
use crate::intake::{Intake, SubmitOutcome};
use crate::ledger::FileLedger;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::orchestrator::Orchestrator;
use crate::pool::{PoolStats, WorkerPool};
use crate::processing::Pipeline;
use crate::queue::BoundedQueue;
use crate::types::ProcessingOutcome;
use crate::watcher::{MonitorCounts, MonitorSet, MonitorState, WatcherFault};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Turned off by configuration; behaves as running but does nothing.
    Disabled,
}

/// Cheap point-in-time view, no filesystem access.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchdogStatus {
    pub is_running: bool,
    pub state: ServiceState,
    pub queue_size: usize,
    pub processed_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub dropped_count: u64,
    pub monitored_directories: Vec<PathBuf>,
}

/// Background activities that exist only between `start` and `stop`.
struct Running {
    cancel: watch::Sender<bool>,
    dispatch: JoinHandle<JoinSet<ProcessingOutcome>>,
    supervisor: JoinHandle<mpsc::UnboundedReceiver<WatcherFault>>,
}

/// Owns the whole pipeline and its lifecycle.
pub struct Watchdog {
    config: WatchdogConfig,
    metrics: Arc<MetricsRegistry>,
    queue: Arc<BoundedQueue>,
    ledger: Arc<FileLedger>,
    pool: Arc<WorkerPool>,
    intake: Arc<Intake>,
    pipeline: Arc<Pipeline>,
    monitors: Arc<MonitorSet>,
    faults: Mutex<Option<mpsc::UnboundedReceiver<WatcherFault>>>,
    state: Mutex<ServiceState>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, orchestrator: Arc<dyn Orchestrator>) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = Arc::new(BoundedQueue::new(config.max_queue_size, metrics.clone()));
        let ledger = Arc::new(FileLedger::new());
        let pool = Arc::new(WorkerPool::new(config.processing_threads.max(1)));
        let filter = FileFilter::new(&config.extensions(), config.file_age_threshold());
        let intake = Arc::new(Intake::new(
            filter,
            ledger.clone(),
            queue.clone(),
            metrics.clone(),
        ));
        let pipeline = Arc::new(Pipeline::new(orchestrator, ledger.clone(), metrics.clone()));
        let (monitors, faults) = MonitorSet::new(intake.clone(), metrics.clone());

        Self {
            config,
            metrics,
            queue,
            ledger,
            pool,
            intake,
            pipeline,
            monitors: Arc::new(monitors),
            faults: Mutex::new(Some(faults)),
            state: Mutex::new(ServiceState::Stopped),
            started_at: Mutex::new(None),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Creates the watched directories, starts monitors and the dispatch
    /// loop. Only a failure to create the input directory is an error.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() || self.state() == ServiceState::Disabled {
            return Ok(());
        }

        if !self.config.enabled {
            info!("🛡️ Watchdog disabled by configuration");
            self.set_state(ServiceState::Disabled);
            *lock(&self.started_at) = Some(Utc::now());
            return Ok(());
        }

        self.set_state(ServiceState::Starting);
        let directories = self.config.watched_directories();

        let input = self.config.input_path();
        if let Err(source) = tokio::fs::create_dir_all(&input).await {
            self.set_state(ServiceState::Stopped);
            error!(dir = %input.display(), error = %source, "Cannot create input directory");
            return Err(WatchdogError::InputDirectory {
                path: input,
                source,
            });
        }
        for dir in directories.iter().filter(|d| **d != input) {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(dir = %dir.display(), error = %e, "Cannot create additional directory");
            }
        }

        self.monitors.start_all(&directories);

        let (cancel, cancel_rx) = watch::channel(false);
        let supervisor = match lock(&self.faults).take() {
            Some(faults) => tokio::spawn(supervise(
                self.monitors.clone(),
                faults,
                cancel_rx.clone(),
            )),
            None => {
                warn!("Watcher supervisor unavailable, faulted monitors will not be recreated");
                let (_, faults) = mpsc::unbounded_channel::<WatcherFault>();
                tokio::spawn(async move { faults })
            }
        };

        let dispatch = DispatchLoop {
            queue: self.queue.clone(),
            pool: self.pool.clone(),
            pipeline: self.pipeline.clone(),
            ledger: self.ledger.clone(),
            metrics: self.metrics.clone(),
            polling_interval: self.config.polling_interval(),
        };
        let dispatch = tokio::spawn(dispatch.run(cancel_rx));

        *running = Some(Running {
            cancel,
            dispatch,
            supervisor,
        });
        *lock(&self.started_at) = Some(Utc::now());
        self.set_state(ServiceState::Running);

        if self.config.scan_existing_on_start {
            let intake = self.intake.clone();
            let sweep_dirs = directories.clone();
            let swept = tokio::task::spawn_blocking(move || {
                sweep_dirs.iter().map(|dir| intake.sweep(dir)).sum::<usize>()
            })
            .await;
            match swept {
                Ok(0) => {}
                Ok(queued) => info!(queued, "🧹 Picked up files already waiting"),
                Err(e) => error!(error = %e, "Startup sweep failed"),
            }
        }

        info!(
            directories = directories.len(),
            workers = self.pool.size(),
            queue_capacity = self.queue.capacity(),
            "🛡️ Watchdog running"
        );
        Ok(())
    }

    /// Best-effort shutdown. Waits up to the drain timeout for in-flight
    /// tasks, then returns `Ok` regardless.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            if self.state() == ServiceState::Disabled {
                self.set_state(ServiceState::Stopped);
            }
            return Ok(());
        };

        info!("🛑 Watchdog stopping");
        self.set_state(ServiceState::Stopping);
        self.monitors.dispose_all();
        let _ = running.cancel.send(true);

        let mut tasks = match running.dispatch.await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Dispatch loop ended abnormally");
                JoinSet::new()
            }
        };
        match running.supervisor.await {
            Ok(faults) => *lock(&self.faults) = Some(faults),
            Err(e) => error!(error = %e, "Watcher supervisor ended abnormally"),
        }

        let timeout = self.config.drain_timeout();
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "⏳ Waiting for in-flight tasks");
        }
        if tokio::time::timeout(timeout, drain(&mut tasks)).await.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_secs = timeout.as_secs(),
                "⏳ Drain timeout elapsed, leaving tasks to finish on their own"
            );
            tasks.detach_all();
        }

        if !self.queue.is_empty() {
            info!(queued = self.queue.len(), "Files left queued until the next start");
        }
        self.set_state(ServiceState::Stopped);
        drop(guard);
        info!("🛑 Watchdog stopped");
        Ok(())
    }

    /// Runs a path through the same filter, ledger and queue a notification would.
    pub fn submit(&self, path: &Path) -> SubmitOutcome {
        let source_dir = self.source_dir_for(path);
        self.intake.submit(path, &source_dir)
    }

    pub fn status(&self) -> WatchdogStatus {
        let snapshot = self.metrics.snapshot();
        let state = self.state();
        WatchdogStatus {
            is_running: is_running(state),
            state,
            queue_size: self.queue.len(),
            processed_count: snapshot.processed_files,
            success_count: snapshot.successful_processing,
            failure_count: snapshot.failed_processing + snapshot.processing_exceptions,
            dropped_count: snapshot.dropped_files,
            monitored_directories: self.monitors.directories(),
        }
    }

    pub fn is_running(&self) -> bool {
        is_running(self.state())
    }

    pub fn state(&self) -> ServiceState {
        *lock(&self.state)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.started_at)
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn monitor_counts(&self) -> MonitorCounts {
        self.monitors.counts()
    }

    pub fn monitor_states(&self) -> Vec<MonitorState> {
        self.monitors.states()
    }

    pub fn dead_lettered(&self) -> usize {
        self.ledger.dead_letter_count()
    }

    fn source_dir_for(&self, path: &Path) -> PathBuf {
        let parent = path.parent().unwrap_or(path);
        self.config
            .watched_directories()
            .into_iter()
            .find(|dir| dir == parent)
            .unwrap_or_else(|| parent.to_path_buf())
    }

    fn set_state(&self, state: ServiceState) {
        *lock(&self.state) = state;
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("state", &self.state())
            .field("queue", &self.queue.len())
            .finish_non_exhaustive()
    }
}

fn is_running(state: ServiceState) -> bool {
    matches!(state, ServiceState::Running | ServiceState::Disabled)
}

async fn drain(tasks: &mut JoinSet<ProcessingOutcome>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Processing task died during shutdown");
        }
    }
}

/// Recreates monitors as their faults come in, until cancelled. Hands the
/// fault receiver back so a later `start` can reuse it.
async fn supervise(
    monitors: Arc<MonitorSet>,
    mut faults: mpsc::UnboundedReceiver<WatcherFault>,
    mut cancel: watch::Receiver<bool>,
) -> mpsc::UnboundedReceiver<WatcherFault> {
    loop {
        tokio::select! {
            Some(fault) = faults.recv() => {
                tokio::time::sleep(Duration::from_millis(250)).await;
                monitors.recover(&fault);
            }
            _ = wait_cancel(&mut cancel) => break,
        }
    }
    faults
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
