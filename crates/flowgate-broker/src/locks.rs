//! Per-instance mutual exclusion.
//!
//! Each instance id maps to an async mutex held for the whole lifecycle
//! operation. Entries nobody holds or waits on are pruned on the next
//! acquisition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

pub type InstanceGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct InstanceLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance_id`.
    pub async fn acquire(&self, instance_id: &str) -> InstanceGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(instance_id.to_string()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        debug!(instance_id, "acquired instance lock");
        guard
    }

    /// Number of ids with a live lock entry.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
