//! Boundary to the analysis engine that turns a raw trace into a booklet.

use async_trait::async_trait;

/// Input for one artifact generation call.
///
/// The watchdog does not know which project a trace came from, so it only
/// ever fills in `raw_content`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub raw_content: String,
    pub additional_context: String,
    pub project_structure: String,
    pub codebase: String,
    pub standards: Vec<String>,
}

impl ArtifactRequest {
    pub fn raw(content: String) -> Self {
        Self {
            raw_content: content,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub artifact_path: String,
}

/// Analysis collaborator. `Err` carries the collaborator's own failure
/// message and is an expected outcome, not an exception.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn generate_artifact(&self, request: ArtifactRequest) -> Result<Artifact, String>;
}
