use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// A file that passed the filter and entered the queue.
#[derive(Debug, Clone, Serialize)]
pub struct WatchedFile {
    pub path: PathBuf,
    /// Watched directory the file arrived in; archive trees live under it.
    pub source_dir: PathBuf,
    pub detected_at: DateTime<Utc>,
    /// Lowercase, with leading dot.
    pub extension: String,
    pub age_at_detection: Duration,
}

/// Where a processed file ended up. Exactly one per file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Disposition {
    Archived(PathBuf),
    MovedToFailed(PathBuf),
    /// Every move attempt failed; the file stays in the watched directory.
    LeftInPlace,
    /// Removed externally before processing started.
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    pub file: WatchedFile,
    pub success: bool,
    pub artifact_path: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub disposition: Disposition,
}
