use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::path_utils;

/// Watchdog settings.
///
/// Layered as: struct defaults, optional `tracewarden.{toml,json,yaml}`,
/// `.env`, then `TRACEWARDEN_*` environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,

    /// Primary directory to watch. Tilde is expanded.
    pub input_directory: String,

    /// Extra directories, comma separated.
    pub additional_directories: String,

    /// Comma separated allow-list, e.g. ".log,.txt".
    pub allowed_extensions: String,

    pub polling_interval_seconds: u64,

    /// Worker pool size.
    pub processing_threads: usize,

    pub max_queue_size: usize,

    pub file_age_threshold_minutes: u64,

    pub drain_timeout_seconds: u64,

    pub health_cache_seconds: u64,

    pub scan_existing_on_start: bool,

    /// Executable used by the binary as the analysis collaborator.
    pub orchestrator_command: Option<String>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_directory: "~/.tracewarden/inbox".to_string(),
            additional_directories: String::new(),
            allowed_extensions: ".log,.txt,.trace".to_string(),
            polling_interval_seconds: 5,
            processing_threads: 2,
            max_queue_size: 100,
            file_age_threshold_minutes: 60,
            drain_timeout_seconds: 30,
            health_cache_seconds: 300,
            scan_existing_on_start: true,
            orchestrator_command: None,
        }
    }
}

impl WatchdogConfig {
    pub fn load() -> Result<Self, ConfigError> {
        load_dotenv();

        let builder = Config::builder()
            .add_source(File::with_name("tracewarden").required(false))
            .add_source(Environment::with_prefix("TRACEWARDEN").try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load with an explicit config file instead of the `tracewarden.*` lookup.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        load_dotenv();

        let builder = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(Environment::with_prefix("TRACEWARDEN").try_parsing(true));

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing_threads == 0 {
            return Err(ConfigError::Message(
                "processing_threads must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::Message(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.polling_interval_seconds == 0 {
            return Err(ConfigError::Message(
                "polling_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.input_directory.trim().is_empty() {
            return Err(ConfigError::Message(
                "input_directory must not be empty".to_string(),
            ));
        }
        if self.extensions().is_empty() {
            return Err(ConfigError::Message(
                "allowed_extensions must name at least one extension".to_string(),
            ));
        }
        Ok(())
    }

    /// Normalized allow-list: lowercase, leading dot, no duplicates.
    pub fn extensions(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for raw in self.allowed_extensions.split(',') {
            let ext = raw.trim().to_lowercase();
            if ext.is_empty() || ext == "." {
                continue;
            }
            let ext = if ext.starts_with('.') { ext } else { format!(".{}", ext) };
            if !out.contains(&ext) {
                out.push(ext);
            }
        }
        out
    }

    pub fn input_path(&self) -> PathBuf {
        path_utils::get_path(&self.input_directory)
    }

    /// Input directory first, then any additional ones.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.input_path()];
        for raw in self.additional_directories.split(',') {
            if raw.trim().is_empty() {
                continue;
            }
            let dir = path_utils::get_path(raw);
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }

    pub fn file_age_threshold(&self) -> Duration {
        Duration::from_secs(self.file_age_threshold_minutes * 60)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn health_cache_duration(&self) -> Duration {
        Duration::from_secs(self.health_cache_seconds)
    }
}

fn load_dotenv() {
    // cwd first, then the app root
    if dotenvy::dotenv().is_err() {
        let path = path_utils::get_app_root().join(".env");
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}
