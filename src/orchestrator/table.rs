use crate::model::{DeploymentKey, DeploymentRecord};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Deployment records plus the per-key locks that serialize mutations.
///
/// Reads never take a key lock. Every write replaces a whole record in one
/// map operation, so readers observe either the old or the new state.
#[derive(Default)]
pub struct DeploymentTable {
    records: DashMap<DeploymentKey, DeploymentRecord>,
    locks: DashMap<DeploymentKey, Arc<Mutex<()>>>,
}

impl DeploymentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DeploymentKey) -> Option<DeploymentRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn put(&self, key: &DeploymentKey, record: DeploymentRecord) {
        self.records.insert(key.clone(), record);
    }

    pub fn remove(&self, key: &DeploymentKey) -> Option<DeploymentRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    /// Owned snapshot of every record
    pub fn snapshot(&self) -> Vec<(DeploymentKey, DeploymentRecord)> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Wait for exclusive mutation rights on `key`
    pub async fn lock(&self, key: &DeploymentKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Drop lock entries that nobody holds or waits on and whose key has no record
    pub fn prune_locks(&self) {
        self.locks
            .retain(|key, mutex| Arc::strong_count(mutex) > 1 || self.records.contains_key(key));
    }
}
