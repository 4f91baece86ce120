use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::filter::{FileFilter, FilterDecision, RejectReason};
use crate::ledger::FileLedger;
use crate::metrics::{Metric, MetricsRegistry};
use crate::queue::BoundedQueue;
use crate::types::WatchedFile;

/// What happened to a candidate path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Filtered(RejectReason),
    /// Already queued or in flight.
    Duplicate,
    DeadLettered,
    /// Queue was full.
    Dropped,
}

/// The single path from "a file showed up" to "it sits in the queue".
#[derive(Debug)]
pub struct Intake {
    filter: FileFilter,
    ledger: Arc<FileLedger>,
    queue: Arc<BoundedQueue>,
    metrics: Arc<MetricsRegistry>,
}

impl Intake {
    pub fn new(
        filter: FileFilter,
        ledger: Arc<FileLedger>,
        queue: Arc<BoundedQueue>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            filter,
            ledger,
            queue,
            metrics,
        }
    }

    pub fn submit(&self, path: &Path, source_dir: &Path) -> SubmitOutcome {
        let (extension, age, modified) = match self.filter.check(path) {
            FilterDecision::Eligible {
                extension,
                age,
                modified,
            } => (extension, age, modified),
            FilterDecision::Rejected(reason) => {
                trace!(path = %path.display(), ?reason, "Ignoring file");
                return SubmitOutcome::Filtered(reason);
            }
        };

        if self.ledger.is_dead_lettered(path, modified) {
            debug!(path = %path.display(), "Skipping dead-lettered file");
            return SubmitOutcome::DeadLettered;
        }

        if !self.ledger.claim(path) {
            debug!(path = %path.display(), "Already in pipeline");
            return SubmitOutcome::Duplicate;
        }

        let file = WatchedFile {
            path: path.to_path_buf(),
            source_dir: source_dir.to_path_buf(),
            detected_at: Utc::now(),
            extension,
            age_at_detection: age,
        };

        if self.queue.enqueue(file) {
            SubmitOutcome::Queued
        } else {
            self.ledger.release(path);
            SubmitOutcome::Dropped
        }
    }

    /// The file is gone; stop remembering it as dead-lettered.
    pub fn forget(&self, path: &Path) {
        if self.ledger.forget_dead_letter(path) {
            debug!(path = %path.display(), "Dead-lettered file removed");
        }
    }

    /// Submit every file already sitting in `dir`. Returns how many were queued.
    pub fn sweep(&self, dir: &Path) -> usize {
        let pruned = self.ledger.prune_dead_letters();
        if pruned > 0 {
            debug!(pruned, "Forgot dead-lettered files that no longer exist");
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.metrics.increment(Metric::FileSystemErrorCount);
                tracing::warn!(dir = %dir.display(), error = %e, "Startup sweep failed");
                return 0;
            }
        };

        let mut paths: Vec<_> = entries.flatten().map(|entry| entry.path()).collect();
        // deterministic order
        paths.sort();

        paths
            .iter()
            .filter(|path| self.submit(path, dir) == SubmitOutcome::Queued)
            .count()
    }
}
