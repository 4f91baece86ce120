//! Process-wide counters for the watchdog.
//!
//! Counters only ever grow while the process runs. Reads go through
//! [`MetricsRegistry::snapshot`], which copies every value at once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Metric {
    QueuedFiles,
    ProcessedFiles,
    SuccessfulProcessing,
    FailedProcessing,
    DroppedFiles,
    ProcessingExceptions,
    WatcherErrorCount,
    FileSystemErrorCount,
    TotalResponseTimeMs,
    MissingFiles,
    DeadLetteredFiles,
}

const METRIC_COUNT: usize = 11;

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::QueuedFiles,
        Metric::ProcessedFiles,
        Metric::SuccessfulProcessing,
        Metric::FailedProcessing,
        Metric::DroppedFiles,
        Metric::ProcessingExceptions,
        Metric::WatcherErrorCount,
        Metric::FileSystemErrorCount,
        Metric::TotalResponseTimeMs,
        Metric::MissingFiles,
        Metric::DeadLetteredFiles,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::QueuedFiles => "QueuedFiles",
            Metric::ProcessedFiles => "ProcessedFiles",
            Metric::SuccessfulProcessing => "SuccessfulProcessing",
            Metric::FailedProcessing => "FailedProcessing",
            Metric::DroppedFiles => "DroppedFiles",
            Metric::ProcessingExceptions => "ProcessingExceptions",
            Metric::WatcherErrorCount => "WatcherErrorCount",
            Metric::FileSystemErrorCount => "FileSystemErrorCount",
            Metric::TotalResponseTimeMs => "TotalResponseTimeMs",
            Metric::MissingFiles => "MissingFiles",
            Metric::DeadLetteredFiles => "DeadLetteredFiles",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Shared, lock-free counter registry.
#[derive(Debug)]
pub struct MetricsRegistry {
    counters: [AtomicU64; METRIC_COUNT],
    /// Unix millis, 0 = never
    last_processed_ms: AtomicI64,
    last_dispatched_ms: AtomicI64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            last_processed_ms: AtomicI64::new(0),
            last_dispatched_ms: AtomicI64::new(0),
        }
    }

    pub fn increment(&self, metric: Metric) {
        self.add(metric, 1);
    }

    pub fn add(&self, metric: Metric, amount: u64) {
        self.counters[metric.index()].fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self, metric: Metric) -> u64 {
        self.counters[metric.index()].load(Ordering::Relaxed)
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.add(Metric::TotalResponseTimeMs, millis);
    }

    pub fn mark_processed(&self) {
        self.last_processed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn mark_dispatched(&self) {
        self.last_dispatched_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_processed(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_processed_ms.load(Ordering::Relaxed))
    }

    pub fn last_dispatched(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_dispatched_ms.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queued_files: self.get(Metric::QueuedFiles),
            processed_files: self.get(Metric::ProcessedFiles),
            successful_processing: self.get(Metric::SuccessfulProcessing),
            failed_processing: self.get(Metric::FailedProcessing),
            dropped_files: self.get(Metric::DroppedFiles),
            processing_exceptions: self.get(Metric::ProcessingExceptions),
            watcher_errors: self.get(Metric::WatcherErrorCount),
            filesystem_errors: self.get(Metric::FileSystemErrorCount),
            total_response_time_ms: self.get(Metric::TotalResponseTimeMs),
            missing_files: self.get(Metric::MissingFiles),
            dead_lettered_files: self.get(Metric::DeadLetteredFiles),
            last_processed_at: self.last_processed(),
            last_dispatched_at: self.last_dispatched(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        None
    } else {
        DateTime::<Utc>::from_timestamp_millis(millis)
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queued_files: u64,
    pub processed_files: u64,
    pub successful_processing: u64,
    pub failed_processing: u64,
    pub dropped_files: u64,
    pub processing_exceptions: u64,
    pub watcher_errors: u64,
    pub filesystem_errors: u64,
    pub total_response_time_ms: u64,
    pub missing_files: u64,
    pub dead_lettered_files: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Fraction of processed files that succeeded, `None` before the first one.
    pub fn success_rate(&self) -> Option<f64> {
        if self.processed_files == 0 {
            None
        } else {
            Some(self.successful_processing as f64 / self.processed_files as f64)
        }
    }

    /// Mean collaborator response time over successful calls.
    pub fn average_response_time_ms(&self) -> Option<f64> {
        if self.successful_processing == 0 {
            None
        } else {
            Some(self.total_response_time_ms as f64 / self.successful_processing as f64)
        }
    }
}
