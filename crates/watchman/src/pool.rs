use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, WatchdogError};

/// Fixed number of processing slots.
#[derive(Debug)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

/// One processing slot. Returned to the pool on drop, whatever the task outcome.
#[derive(Debug)]
pub struct ProcessingPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub active: usize,
    pub available: usize,
    pub total: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<ProcessingPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WatchdogError::PoolClosed)?;
        Ok(ProcessingPermit { _permit: permit })
    }

    #[cfg(test)]
    pub fn try_acquire(&self) -> Option<ProcessingPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ProcessingPermit { _permit: permit })
    }

    pub fn active(&self) -> usize {
        self.size.saturating_sub(self.semaphore.available_permits())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.semaphore.available_permits();
        PoolStats {
            active: self.size.saturating_sub(available),
            available,
            total: self.size,
        }
    }
}
