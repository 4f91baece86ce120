//! Command Orchestrator - hands each trace to an external program

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracewarden_watchman::{Artifact, ArtifactRequest, Orchestrator};

/// Runs `sh -c <command>` per file. The raw trace goes to stdin; a zero exit
/// status means success and the last non-empty stdout line is the artifact
/// path. Anything else is a failure carrying stderr.
pub struct CommandOrchestrator {
    command: String,
}

impl CommandOrchestrator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Orchestrator for CommandOrchestrator {
    async fn generate_artifact(&self, request: ArtifactRequest) -> Result<Artifact, String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start orchestrator command: {}", e))?;

        // Feed stdin concurrently so a chatty child cannot block on a full stdout pipe.
        let feeder = child.stdin.take().map(|mut stdin| {
            let content = request.raw_content;
            tokio::spawn(async move {
                let _ = stdin.write_all(content.as_bytes()).await;
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("Orchestrator command failed: {}", e))?;
        if let Some(feeder) = feeder {
            let _ = feeder.await;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .last()
                .map(|path| Artifact {
                    artifact_path: path.to_string(),
                })
                .ok_or_else(|| "Orchestrator command printed no artifact path".to_string())
        } else if stderr.is_empty() {
            Err(format!(
                "Orchestrator command failed (exit code {})",
                output.status.code().unwrap_or(-1)
            ))
        } else {
            Err(stderr)
        }
    }
}
