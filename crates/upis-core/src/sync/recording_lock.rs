//! Named per-recording locks.
//!
//! Only serializes work inside one process. Two processes sharing a
//! database file can still both hold the "same" lock.

use crate::model::RecordingId;

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex as StdMutex, MutexGuard},
};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, trace};

type LockTable = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Serializes synchronization work per recording.
#[derive(Clone, Default)]
pub struct RecordingLocks {
    table: LockTable,
}

impl RecordingLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while exclusively holding the lock for `recording`.
    ///
    /// The lock is released when `f` completes, fails, or unwinds.
    pub async fn with_lock<F, T>(&self, recording: &RecordingId, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let name = recording.lock_name();
        let lock = self.entry(&name);

        trace!(lock = %name, "Waiting for recording lock");
        let guard = lock.lock_owned().await;

        let _held = HeldLock {
            name,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        };

        f.await
    }

    /// Number of lock names currently held or awaited.
    pub fn active_count(&self) -> usize {
        lock_table(&self.table).len()
    }

    fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        let mut table = lock_table(&self.table);
        Arc::clone(table.entry(name.to_string()).or_default())
    }
}

struct HeldLock {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        self.guard.take();

        // Forget the name once nobody holds or waits on it.
        let mut table = lock_table(&self.table);
        if table
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.name);
        }
    }
}

fn lock_table(table: &LockTable) -> MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
    table.lock().unwrap_or_else(|e| {
        error!("Lock table poisoned, recovering: {}", e);
        e.into_inner()
    })
}
