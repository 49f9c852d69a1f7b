//! Per-tenant dedup caches and their `notified.json` snapshot.
//!
//! Only the poll loop touches this store, so it needs no locking.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::dedup::DedupCache;
use crate::error::StoreError;
use crate::store::TenantId;
use crate::store::state_file::StateFile;

pub struct NotifiedStore {
    caches: BTreeMap<TenantId, DedupCache>,
    file: StateFile,
    dirty: bool,
}

impl NotifiedStore {
    /// Open the store, reloading the persisted snapshot when present.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = StateFile::new(path);
        let caches = match file.load::<BTreeMap<TenantId, DedupCache>>().await? {
            Some(loaded) => {
                let total: usize = loaded.value.values().map(DedupCache::len).sum();
                info!(tenants = loaded.value.len(), fingerprints = total, "Loaded dedup history");
                loaded.value
            }
            None => BTreeMap::new(),
        };
        Ok(Self {
            caches,
            file,
            dirty: false,
        })
    }

    /// The tenant's cache, created on demand, with its bound updated to `limit`.
    pub fn cache_mut(&mut self, tenant: &TenantId, limit: usize) -> &mut DedupCache {
        let cache = self
            .caches
            .entry(tenant.clone())
            .or_insert_with(|| DedupCache::new(limit));
        cache.set_limit(limit);
        cache
    }

    pub fn cache(&self, tenant: &TenantId) -> Option<&DedupCache> {
        self.caches.get(tenant)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Persist if anything was recorded since the last flush.
    pub async fn flush(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        self.file.save(&self.caches).await?;
        self.dirty = false;
        debug!(path = %self.file.path().display(), "Dedup history saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::Fingerprint;
    use tempfile::TempDir;

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notified.json");
        let tenant = TenantId::from("42");
        let fp = Fingerprint::new("post-1", "alice");
        {
            let mut store = NotifiedStore::open(&path).await.unwrap();
            store.cache_mut(&tenant, 10).record(&fp);
            store.mark_dirty();
            store.flush().await.unwrap();
            assert!(!store.is_dirty());
        }
        let mut store = NotifiedStore::open(&path).await.unwrap();
        assert!(store.cache(&tenant).unwrap().seen(&fp));
        assert_eq!(store.cache_mut(&tenant, 3).limit(), 3);
    }

    #[tokio::test]
    async fn clean_store_does_not_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notified.json");
        let mut store = NotifiedStore::open(&path).await.unwrap();
        store.cache_mut(&TenantId::from("1"), 5);
        store.flush().await.unwrap();
        assert!(!path.exists());
    }
}
