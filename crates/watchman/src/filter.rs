use std::path::Path;
use std::time::{Duration, SystemTime};

/// Extension allow-list plus a staleness cutoff.
#[derive(Debug, Clone)]
pub struct FileFilter {
    allowed_extensions: Vec<String>,
    max_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Eligible {
        extension: String,
        age: Duration,
        modified: Option<SystemTime>,
    },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    ExtensionNotAllowed,
    NotAFile,
    Missing,
    TooOld { age: Duration },
}

impl FileFilter {
    /// `allowed_extensions` are matched case-insensitively, with or without the dot.
    pub fn new(allowed_extensions: &[String], max_age: Duration) -> Self {
        let allowed_extensions = allowed_extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_lowercase();
                if ext.starts_with('.') { ext } else { format!(".{}", ext) }
            })
            .collect();
        Self {
            allowed_extensions,
            max_age,
        }
    }

    /// The lowercase dotted extension if it is on the allow-list.
    pub fn matching_extension(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?;
        let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
        if self.allowed_extensions.contains(&ext) {
            Some(ext)
        } else {
            None
        }
    }

    pub fn check(&self, path: &Path) -> FilterDecision {
        self.check_at(path, SystemTime::now())
    }

    /// Same as [`check`](Self::check) against a fixed clock.
    pub fn check_at(&self, path: &Path, now: SystemTime) -> FilterDecision {
        let Some(extension) = self.matching_extension(path) else {
            return FilterDecision::Rejected(RejectReason::ExtensionNotAllowed);
        };

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return FilterDecision::Rejected(RejectReason::Missing),
        };
        if !metadata.is_file() {
            return FilterDecision::Rejected(RejectReason::NotAFile);
        }

        let modified = metadata.modified().ok();
        // future mtimes count as brand new
        let age = modified
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            return FilterDecision::Rejected(RejectReason::TooOld { age });
        }

        FilterDecision::Eligible {
            extension,
            age,
            modified,
        }
    }
}
