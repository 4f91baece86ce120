//! Tracks which paths are already somewhere in the pipeline, and which
//! ones have been given up on.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

#[derive(Debug, Default)]
pub struct FileLedger {
    in_pipeline: Mutex<HashSet<PathBuf>>,
    /// path -> modification time when it was dead-lettered
    dead_letters: Mutex<HashMap<PathBuf, Option<SystemTime>>>,
}

impl FileLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the path is already queued or being processed.
    pub fn claim(&self, path: &Path) -> bool {
        lock(&self.in_pipeline).insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        lock(&self.in_pipeline).remove(path);
    }

    /// Holds the claim on `path` until the returned guard is dropped.
    pub fn hold(self: &Arc<Self>, path: PathBuf) -> LedgerClaim {
        LedgerClaim {
            ledger: Arc::clone(self),
            path,
        }
    }

    #[cfg(test)]
    pub fn in_pipeline(&self) -> usize {
        lock(&self.in_pipeline).len()
    }

    pub fn mark_dead_letter(&self, path: &Path, modified: Option<SystemTime>) {
        let mut dead_letters = lock(&self.dead_letters);
        dead_letters.retain(|recorded, _| recorded.exists());
        dead_letters.insert(path.to_path_buf(), modified);
    }

    pub fn forget_dead_letter(&self, path: &Path) -> bool {
        lock(&self.dead_letters).remove(path).is_some()
    }

    /// Drops entries whose file is gone. Returns how many were removed.
    pub fn prune_dead_letters(&self) -> usize {
        let mut dead_letters = lock(&self.dead_letters);
        let before = dead_letters.len();
        dead_letters.retain(|recorded, _| recorded.exists());
        before - dead_letters.len()
    }

    /// A dead-lettered file becomes eligible again once it is modified.
    pub fn is_dead_lettered(&self, path: &Path, modified: Option<SystemTime>) -> bool {
        let mut dead_letters = lock(&self.dead_letters);
        match dead_letters.get(path) {
            Some(recorded) if *recorded == modified => true,
            Some(_) => {
                dead_letters.remove(path);
                false
            }
            None => false,
        }
    }

    pub fn dead_letter_count(&self) -> usize {
        lock(&self.dead_letters).len()
    }
}

/// Releases a ledger claim when dropped.
#[derive(Debug)]
pub struct LedgerClaim {
    ledger: Arc<FileLedger>,
    path: PathBuf,
}

impl Drop for LedgerClaim {
    fn drop(&mut self) {
        self.ledger.release(&self.path);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
