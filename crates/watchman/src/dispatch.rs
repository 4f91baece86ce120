use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::ledger::FileLedger;
use crate::metrics::{Metric, MetricsRegistry};
use crate::pool::WorkerPool;
use crate::processing::{self, Pipeline};
use crate::queue::BoundedQueue;
use crate::types::ProcessingOutcome;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Single consumer of the queue. Hands each file to a processing task once a
/// pool slot is free.
#[derive(Debug)]
pub struct DispatchLoop {
    pub(crate) queue: Arc<BoundedQueue>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) ledger: Arc<FileLedger>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) polling_interval: Duration,
}

impl DispatchLoop {
    /// Runs until `cancel` flips to `true` (or its sender goes away), then
    /// hands back the tasks still in flight so the caller can drain them.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> JoinSet<ProcessingOutcome> {
        info!("🚚 Dispatch loop started");
        let mut tasks = JoinSet::new();

        loop {
            if is_cancelled(&cancel) {
                break;
            }

            while let Some(joined) = tasks.try_join_next() {
                self.reap(joined);
            }

            let Some(file) = self.queue.dequeue() else {
                tokio::select! {
                    _ = tokio::time::sleep(self.polling_interval) => {}
                    _ = wait_cancel(&mut cancel) => break,
                }
                continue;
            };

            let acquired = tokio::select! {
                permit = self.pool.acquire() => permit,
                _ = wait_cancel(&mut cancel) => {
                    debug!(path = %file.path.display(), "Cancelled before dispatch, leaving file on disk");
                    self.ledger.release(&file.path);
                    break;
                }
            };

            match acquired {
                Ok(permit) => {
                    self.metrics.mark_dispatched();
                    debug!(path = %file.path.display(), active = self.pool.active(), "🚀 Dispatching");
                    tasks.spawn(processing::process(self.pipeline.clone(), file, permit));
                }
                Err(e) => {
                    error!(error = %e, path = %file.path.display(), "Dispatch failed, backing off");
                    self.ledger.release(&file.path);
                    tokio::select! {
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                        _ = wait_cancel(&mut cancel) => break,
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "🛑 Dispatch loop stopped");
        tasks
    }

    fn reap(&self, joined: Result<ProcessingOutcome, JoinError>) {
        match joined {
            Ok(outcome) => debug!(
                path = %outcome.file.path.display(),
                success = outcome.success,
                duration_ms = outcome.duration_ms,
                "Task finished"
            ),
            Err(e) => {
                self.metrics.increment(Metric::ProcessingExceptions);
                error!(error = %e, "💥 Processing task died");
            }
        }
    }
}

/// A dropped sender counts as cancellation.
pub(crate) fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

pub(crate) async fn wait_cancel(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}
