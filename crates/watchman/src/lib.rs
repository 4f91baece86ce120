//! Tracewarden Watchman - directory watchdog and processing pipeline
//!
//! This crate is organized into:
//! - watcher: directory monitors and their recovery
//! - intake: filter, de-duplication and enqueue for candidate paths
//! - queue: bounded FIFO between monitors and the dispatch loop
//! - dispatch: the single consumer handing files to the worker pool
//! - processing: one file through the orchestrator, then archive or fail
//! - archive: date-partitioned processed/ and failed/ trees
//! - controller: start/stop lifecycle and status

mod archive;
mod controller;
mod dispatch;
mod error;
mod filter;
mod intake;
mod ledger;
mod metrics;
mod orchestrator;
mod pool;
mod processing;
mod queue;
mod types;
mod watcher;

pub use archive::{ArchiveKind, FAILED_DIR, PROCESSED_DIR, destination_for};
pub use controller::{ServiceState, Watchdog, WatchdogStatus};
pub use error::{Result, WatchdogError};
pub use filter::{FileFilter, FilterDecision, RejectReason};
pub use intake::SubmitOutcome;
pub use metrics::{Metric, MetricsRegistry, MetricsSnapshot};
pub use orchestrator::{Artifact, ArtifactRequest, Orchestrator};
pub use pool::PoolStats;
pub use types::{Disposition, ProcessingOutcome, WatchedFile};
pub use watcher::{MonitorCounts, MonitorState};
