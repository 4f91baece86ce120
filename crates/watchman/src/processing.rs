use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::archive::ArchiveManager;
use crate::error::{Result, WatchdogError};
use crate::ledger::FileLedger;
use crate::metrics::{Metric, MetricsRegistry};
use crate::orchestrator::{Artifact, ArtifactRequest, Orchestrator};
use crate::pool::ProcessingPermit;
use crate::types::{Disposition, ProcessingOutcome, WatchedFile};

/// Everything a processing task needs, shared by all of them.
pub struct Pipeline {
    pub(crate) orchestrator: Arc<dyn Orchestrator>,
    pub(crate) archive: ArchiveManager,
    pub(crate) ledger: Arc<FileLedger>,
    pub(crate) metrics: Arc<MetricsRegistry>,
}

impl Pipeline {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        ledger: Arc<FileLedger>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            orchestrator,
            archive: ArchiveManager::new(metrics.clone()),
            ledger,
            metrics,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

/// Process one file end to end. The permit and the ledger claim are held
/// for the whole call and released on every exit path.
pub async fn process(
    pipeline: Arc<Pipeline>,
    file: WatchedFile,
    permit: ProcessingPermit,
) -> ProcessingOutcome {
    let _permit = permit;
    let _claim = pipeline.ledger.hold(file.path.clone());
    let started = Instant::now();

    let exists = tokio::fs::try_exists(&file.path).await.unwrap_or(false);
    if !exists {
        warn!(path = %file.path.display(), "❓ File not found, skipping");
        pipeline.metrics.increment(Metric::MissingFiles);
        return finish(file, started, false, None, Some("file not found".to_string()), Disposition::Missing);
    }

    pipeline.metrics.increment(Metric::ProcessedFiles);
    info!(path = %file.path.display(), "🔬 Processing");

    let outcome = match invoke(&pipeline, &file).await {
        Ok(Ok(artifact)) => {
            pipeline.metrics.increment(Metric::SuccessfulProcessing);
            pipeline.metrics.record_response_time(started.elapsed());
            info!(
                path = %file.path.display(),
                artifact = %artifact.artifact_path,
                "✅ Booklet generated"
            );

            let disposition = match pipeline.archive.archive(&file).await {
                Ok(dest) => Disposition::Archived(dest),
                Err(_) => leave_in_place(&pipeline, &file).await,
            };
            finish(file, started, true, Some(artifact.artifact_path), None, disposition)
        }
        Ok(Err(message)) => {
            pipeline.metrics.increment(Metric::FailedProcessing);
            warn!(path = %file.path.display(), error = %message, "❌ Collaborator reported failure");

            let disposition = route_to_failed(&pipeline, &file, &message).await;
            finish(file, started, false, None, Some(message), disposition)
        }
        Err(e) => {
            pipeline.metrics.increment(Metric::ProcessingExceptions);
            error!(path = %file.path.display(), error = %e, "💥 Processing failed");

            let message = e.to_string();
            let disposition = route_to_failed(&pipeline, &file, &message).await;
            finish(file, started, false, None, Some(message), disposition)
        }
    };

    pipeline.metrics.mark_processed();
    outcome
}

/// Read the file and call the collaborator on its own task so a panic in
/// the collaborator surfaces as an error here.
async fn invoke(
    pipeline: &Pipeline,
    file: &WatchedFile,
) -> Result<std::result::Result<Artifact, String>> {
    let content = tokio::fs::read_to_string(&file.path)
        .await
        .map_err(|e| WatchdogError::io(&file.path, e))?;

    let orchestrator = Arc::clone(&pipeline.orchestrator);
    tokio::spawn(async move {
        orchestrator
            .generate_artifact(ArtifactRequest::raw(content))
            .await
    })
    .await
    .map_err(|e| WatchdogError::CollaboratorAborted(e.to_string()))
}

async fn route_to_failed(pipeline: &Pipeline, file: &WatchedFile, cause: &str) -> Disposition {
    match pipeline.archive.fail(file).await {
        Ok(dest) => Disposition::MovedToFailed(dest),
        Err(move_error) => {
            error!(
                path = %file.path.display(),
                cause,
                move_error = %move_error,
                "Could not move failed file either"
            );
            leave_in_place(pipeline, file).await
        }
    }
}

/// Every move failed: remember the file so it is not picked up again until
/// someone touches it.
async fn leave_in_place(pipeline: &Pipeline, file: &WatchedFile) -> Disposition {
    let modified = tokio::fs::metadata(&file.path)
        .await
        .ok()
        .and_then(|m| m.modified().ok());
    pipeline.ledger.mark_dead_letter(&file.path, modified);
    pipeline.metrics.increment(Metric::DeadLetteredFiles);
    warn!(path = %file.path.display(), "🪦 Dead-lettered, left in place");
    Disposition::LeftInPlace
}

fn finish(
    file: WatchedFile,
    started: Instant,
    success: bool,
    artifact_path: Option<String>,
    error_message: Option<String>,
    disposition: Disposition,
) -> ProcessingOutcome {
    ProcessingOutcome {
        file,
        success,
        artifact_path,
        error_message,
        duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        disposition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{FAILED_DIR, PROCESSED_DIR};
    use crate::pool::WorkerPool;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Behaviour {
        Succeed(&'static str),
        Fail(&'static str),
        Panic,
    }

    struct ScriptedOrchestrator {
        behaviour: Behaviour,
        seen: Mutex<Vec<ArtifactRequest>>,
    }

    impl ScriptedOrchestrator {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Orchestrator for ScriptedOrchestrator {
        async fn generate_artifact(
            &self,
            request: ArtifactRequest,
        ) -> std::result::Result<Artifact, String> {
            self.seen.lock().unwrap().push(request);
            match self.behaviour {
                Behaviour::Succeed(path) => Ok(Artifact {
                    artifact_path: path.to_string(),
                }),
                Behaviour::Fail(message) => Err(message.to_string()),
                Behaviour::Panic => panic!("collaborator crashed"),
            }
        }
    }

    fn watched(dir: &Path, name: &str, content: &[u8]) -> WatchedFile {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        WatchedFile {
            path,
            source_dir: dir.to_path_buf(),
            detected_at: Utc::now(),
            extension: ".log".to_string(),
            age_at_detection: Duration::ZERO,
        }
    }

    fn pipeline(orchestrator: Arc<dyn Orchestrator>) -> (Arc<Pipeline>, Arc<MetricsRegistry>, Arc<FileLedger>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let ledger = Arc::new(FileLedger::new());
        (
            Arc::new(Pipeline::new(orchestrator, ledger.clone(), metrics.clone())),
            metrics,
            ledger,
        )
    }

    #[tokio::test]
    async fn success_archives_and_passes_raw_content_only() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ScriptedOrchestrator::new(Behaviour::Succeed("/out/booklet.md"));
        let (pipeline, metrics, ledger) = pipeline(orchestrator.clone());
        let pool = WorkerPool::new(1);
        let file = watched(dir.path(), "err1.log", b"NullReferenceException at Foo()");
        ledger.claim(&file.path);

        let outcome = process(pipeline, file, pool.acquire().await.unwrap()).await;

        assert!(outcome.success);
        assert_eq!(outcome.artifact_path.as_deref(), Some("/out/booklet.md"));
        match &outcome.disposition {
            Disposition::Archived(dest) => {
                assert!(dest.starts_with(dir.path().join(PROCESSED_DIR)));
                assert!(dest.exists());
            }
            other => panic!("expected archive, got {other:?}"),
        }
        assert_eq!(metrics.get(Metric::SuccessfulProcessing), 1);
        assert_eq!(metrics.get(Metric::ProcessedFiles), 1);
        assert_eq!(metrics.get(Metric::FailedProcessing), 0);
        assert!(metrics.last_processed().is_some());
        assert_eq!(pool.stats().available, 1);
        assert_eq!(ledger.in_pipeline(), 0);

        let seen = orchestrator.seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[ArtifactRequest::raw("NullReferenceException at Foo()".to_string())]
        );
    }

    #[tokio::test]
    async fn collaborator_failure_moves_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, metrics, _) = pipeline(ScriptedOrchestrator::new(Behaviour::Fail("PARSE_ERROR")));
        let pool = WorkerPool::new(1);
        let file = watched(dir.path(), "err2.log", b"garbage");

        let outcome = process(pipeline, file, pool.acquire().await.unwrap()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("PARSE_ERROR"));
        match &outcome.disposition {
            Disposition::MovedToFailed(dest) => {
                assert!(dest.starts_with(dir.path().join(FAILED_DIR)));
                let name = dest.file_name().unwrap().to_string_lossy().into_owned();
                assert!(name.starts_with("err2_") && name.ends_with(".log"));
            }
            other => panic!("expected failed move, got {other:?}"),
        }
        assert_eq!(metrics.get(Metric::FailedProcessing), 1);
        assert_eq!(metrics.get(Metric::SuccessfulProcessing), 0);
        assert!(!dir.path().join(PROCESSED_DIR).exists());
    }

    #[tokio::test]
    async fn collaborator_panic_is_contained() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, metrics, _) = pipeline(ScriptedOrchestrator::new(Behaviour::Panic));
        let pool = WorkerPool::new(1);
        let file = watched(dir.path(), "err3.log", b"trace");

        let outcome = process(pipeline, file, pool.acquire().await.unwrap()).await;

        assert!(!outcome.success);
        assert!(matches!(outcome.disposition, Disposition::MovedToFailed(_)));
        assert_eq!(metrics.get(Metric::ProcessingExceptions), 1);
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn unreadable_content_is_an_exception() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ScriptedOrchestrator::new(Behaviour::Succeed("/out/x.md"));
        let (pipeline, metrics, _) = pipeline(orchestrator.clone());
        let pool = WorkerPool::new(1);
        let file = watched(dir.path(), "binary.log", &[0xff, 0xfe, 0x00, 0xc3]);

        let outcome = process(pipeline, file, pool.acquire().await.unwrap()).await;

        assert!(matches!(outcome.disposition, Disposition::MovedToFailed(_)));
        assert_eq!(metrics.get(Metric::ProcessingExceptions), 1);
        assert!(orchestrator.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ScriptedOrchestrator::new(Behaviour::Succeed("/out/x.md"));
        let (pipeline, metrics, _) = pipeline(orchestrator.clone());
        let pool = WorkerPool::new(1);
        let file = watched(dir.path(), "vanished.log", b"trace");
        std::fs::remove_file(&file.path).unwrap();

        let outcome = process(pipeline, file, pool.acquire().await.unwrap()).await;

        assert_eq!(outcome.disposition, Disposition::Missing);
        assert_eq!(metrics.get(Metric::MissingFiles), 1);
        assert_eq!(metrics.get(Metric::ProcessedFiles), 0);
        assert!(orchestrator.seen.lock().unwrap().is_empty());
        assert!(!dir.path().join(FAILED_DIR).exists());
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn double_failure_dead_letters_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, metrics, ledger) = pipeline(ScriptedOrchestrator::new(Behaviour::Fail("BOOM")));
        let pool = WorkerPool::new(1);
        let file = watched(dir.path(), "stuck.log", b"trace");
        let path = file.path.clone();

        // A plain file where the failed/ directory should go makes the move fail.
        std::fs::write(dir.path().join(FAILED_DIR), "not a directory").unwrap();

        let outcome = process(pipeline, file, pool.acquire().await.unwrap()).await;

        assert_eq!(outcome.disposition, Disposition::LeftInPlace);
        assert!(path.exists());
        assert_eq!(metrics.get(Metric::FileSystemErrorCount), 1);
        assert_eq!(metrics.get(Metric::DeadLetteredFiles), 1);
        let modified = std::fs::metadata(&path).unwrap().modified().ok();
        assert!(ledger.is_dead_lettered(&path, modified));
    }
}
