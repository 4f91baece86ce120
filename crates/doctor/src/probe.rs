//! Live filesystem probes against the watched directories.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracewarden_core::config::WatchdogConfig;
use tracewarden_watchman::PROCESSED_DIR;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub path: PathBuf,
    pub exists: bool,
    pub ok: bool,
    pub error: Option<String>,
}

impl ProbeResult {
    fn passed(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: true,
            ok: true,
            error: None,
        }
    }

    fn failed(path: &Path, error: &std::io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            exists: error.kind() != ErrorKind::NotFound,
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// Input readability and archive writability, as the health check sees them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryProbes {
    pub input: ProbeResult,
    pub archive: ProbeResult,
}

pub async fn probe_directories(config: &WatchdogConfig) -> DirectoryProbes {
    let input = config.input_path();
    let archive = input.join(PROCESSED_DIR);
    DirectoryProbes {
        input: probe_read(&input).await,
        archive: probe_write(&archive).await,
    }
}

/// Can the directory be listed?
pub async fn probe_read(dir: &Path) -> ProbeResult {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => match entries.next_entry().await {
            Ok(_) => ProbeResult::passed(dir),
            Err(e) => ProbeResult::failed(dir, &e),
        },
        Err(e) => ProbeResult::failed(dir, &e),
    }
}

/// Creates the directory if needed (but not its parents), then writes and
/// removes a small file.
pub async fn probe_write(dir: &Path) -> ProbeResult {
    match tokio::fs::create_dir(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
        Err(e) => return ProbeResult::failed(dir, &e),
    }

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let probe = dir.join(format!(".tracewarden-probe-{}-{}", std::process::id(), nanos));

    if let Err(e) = tokio::fs::write(&probe, b"probe").await {
        return ProbeResult::failed(dir, &e);
    }
    match tokio::fs::remove_file(&probe).await {
        Ok(()) => ProbeResult::passed(dir),
        Err(e) => ProbeResult::failed(dir, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readable_directory_passes() {
        let dir = tempfile::tempdir().unwrap();
        let result = probe_read(dir.path()).await;
        assert!(result.ok && result.exists);
        assert_eq!(result.error, None);
    }

    #[tokio::test]
    async fn missing_directory_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let result = probe_read(&dir.path().join("gone")).await;
        assert!(!result.ok);
        assert!(!result.exists);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn write_probe_cleans_up_after_itself() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("processed");

        let result = probe_write(&archive).await;

        assert!(result.ok, "{:?}", result.error);
        assert_eq!(std::fs::read_dir(&archive).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn write_probe_does_not_recreate_a_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");

        let result = probe_write(&inbox.join("processed")).await;

        assert!(!result.ok);
        assert!(!inbox.exists());
    }

    #[tokio::test]
    async fn write_probe_fails_when_blocked_by_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("processed");
        std::fs::write(&archive, "not a directory").unwrap();

        let result = probe_write(&archive).await;

        assert!(!result.ok);
    }
}
