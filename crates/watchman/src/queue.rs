use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::metrics::{Metric, MetricsRegistry};
use crate::types::WatchedFile;

/// Fixed-capacity FIFO of files waiting for a worker.
///
/// `enqueue` never blocks and never evicts: once full, new files are
/// rejected and counted as dropped.
#[derive(Debug)]
pub struct BoundedQueue {
    capacity: usize,
    items: Mutex<VecDeque<WatchedFile>>,
    metrics: Arc<MetricsRegistry>,
}

impl BoundedQueue {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            metrics,
        }
    }

    /// Returns `false` when the queue is full.
    pub fn enqueue(&self, file: WatchedFile) -> bool {
        let mut items = self.lock();
        if items.len() >= self.capacity {
            let queue_size = items.len();
            drop(items);
            self.metrics.increment(Metric::DroppedFiles);
            warn!(
                queue_size,
                capacity = self.capacity,
                path = %file.path.display(),
                "🚫 Queue full, dropping file"
            );
            return false;
        }

        debug!(path = %file.path.display(), queue_size = items.len() + 1, "📥 Queued");
        items.push_back(file);
        drop(items);
        self.metrics.increment(Metric::QueuedFiles);
        true
    }

    pub fn dequeue(&self) -> Option<WatchedFile> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn contains(&self, path: &std::path::Path) -> bool {
        self.lock().iter().any(|file| file.path == path)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<WatchedFile>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
