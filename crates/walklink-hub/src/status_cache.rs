use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use walklink_core::{RecordStore, StoreError, WalkRecord, WalkStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct CachedStatus {
    pub status: WalkStatus,
    pub walker_id: String,
    pub owner_id: String,
    pub synced_at: Instant,
}

impl CachedStatus {
    fn from_record(record: &WalkRecord) -> Self {
        Self {
            status: record.status.clone(),
            walker_id: record.walker_id.clone(),
            owner_id: record.owner_id.clone(),
            synced_at: Instant::now(),
        }
    }
}

/// Walk-status authorization cache with a staleness bound.
///
/// Entries older than the TTL are never served; terminal statuses are never
/// stored.
pub struct StatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedStatus>>,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh entry only.
    pub async fn get(&self, walk_id: &str) -> Option<CachedStatus> {
        let entries = self.entries.read().await;
        entries
            .get(walk_id)
            .filter(|entry| entry.synced_at.elapsed() <= self.ttl)
            .cloned()
    }

    pub async fn put(&self, walk_id: &str, record: &WalkRecord) -> CachedStatus {
        let entry = CachedStatus::from_record(record);
        if entry.status.is_terminal() {
            self.evict(walk_id).await;
        } else {
            self.entries
                .write()
                .await
                .insert(walk_id.to_string(), entry.clone());
        }
        entry
    }

    pub async fn evict(&self, walk_id: &str) {
        if self.entries.write().await.remove(walk_id).is_some() {
            debug!(event = "status_cache_evict", walk_id = walk_id);
        }
    }

    /// Re-reads the system of record. `None` when the walk does not exist.
    pub async fn refresh(
        &self,
        store: &dyn RecordStore,
        walk_id: &str,
    ) -> Result<Option<CachedStatus>, StoreError> {
        match store.get_walk(walk_id).await? {
            Some(record) => {
                let entry = self.put(walk_id, &record).await;
                debug!(
                    event = "status_cache_refresh",
                    walk_id = walk_id,
                    status = %entry.status
                );
                Ok(Some(entry))
            }
            None => {
                self.evict(walk_id).await;
                Ok(None)
            }
        }
    }

    /// Fresh cached entry, or a refresh when absent or stale.
    pub async fn resolve(
        &self,
        store: &dyn RecordStore,
        walk_id: &str,
    ) -> Result<Option<CachedStatus>, StoreError> {
        if let Some(entry) = self.get(walk_id).await {
            return Ok(Some(entry));
        }
        self.refresh(store, walk_id).await
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
