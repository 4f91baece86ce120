use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError {
    /// The input directory could not be created; fatal to `start`.
    #[error("cannot create watched directory {path}: {source}")]
    InputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch {path}: {source}")]
    Watcher {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("refusing to overwrite existing file {0}")]
    DestinationExists(PathBuf),

    #[error("worker pool is closed")]
    PoolClosed,

    #[error("collaborator task aborted: {0}")]
    CollaboratorAborted(String),
}

impl WatchdogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatchdogError>;
