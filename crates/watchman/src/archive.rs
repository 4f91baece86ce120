//! Moves finished files into date-partitioned `processed/` and `failed/` trees
//! next to where they arrived.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{Result, WatchdogError};
use crate::metrics::{Metric, MetricsRegistry};
use crate::types::WatchedFile;

pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Processed,
    Failed,
}

impl ArchiveKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            ArchiveKind::Processed => PROCESSED_DIR,
            ArchiveKind::Failed => FAILED_DIR,
        }
    }
}

/// `{source}/{processed|failed}/{yyyy-MM-dd}/{stem}_{HHmmss}{ext}`
pub fn destination_for(
    source_dir: &Path,
    file: &Path,
    kind: ArchiveKind,
    now: DateTime<Local>,
) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let ext = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    source_dir
        .join(kind.dir_name())
        .join(now.format("%Y-%m-%d").to_string())
        .join(format!("{}_{}{}", stem, now.format("%H%M%S"), ext))
}

/// Archive and failure manager in one; both routes share the same move.
#[derive(Debug, Clone)]
pub struct ArchiveManager {
    metrics: Arc<MetricsRegistry>,
}

impl ArchiveManager {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    pub async fn archive(&self, file: &WatchedFile) -> Result<PathBuf> {
        self.relocate(file, ArchiveKind::Processed).await
    }

    pub async fn fail(&self, file: &WatchedFile) -> Result<PathBuf> {
        self.relocate(file, ArchiveKind::Failed).await
    }

    async fn relocate(&self, file: &WatchedFile, kind: ArchiveKind) -> Result<PathBuf> {
        let destination = destination_for(&file.source_dir, &file.path, kind, Local::now());

        match move_without_overwrite(&file.path, &destination).await {
            Ok(()) => {
                info!(
                    from = %file.path.display(),
                    to = %destination.display(),
                    "📦 Moved to {}",
                    kind.dir_name()
                );
                Ok(destination)
            }
            Err(e) => {
                self.metrics.increment(Metric::FileSystemErrorCount);
                error!(
                    path = %file.path.display(),
                    destination = %destination.display(),
                    error = %e,
                    "Failed to move file to {}",
                    kind.dir_name()
                );
                Err(e)
            }
        }
    }
}

async fn move_without_overwrite(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WatchdogError::io(parent, e))?;
    }

    let exists = tokio::fs::try_exists(to)
        .await
        .map_err(|e| WatchdogError::io(to, e))?;
    if exists {
        return Err(WatchdogError::DestinationExists(to.to_path_buf()));
    }

    tokio::fs::rename(from, to)
        .await
        .map_err(|e| WatchdogError::io(from, e))
}
