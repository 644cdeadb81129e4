//! Read and write contracts of the cluster the controller reconciles against
//!
//! Reads go through an [`ObjectCache`], an eventually consistent snapshot
//! kept current by watches. Writes go straight to an [`ObjectStore`] and only
//! become visible in the cache once the watch delivers them.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Reports whether a cache has completed its initial list
pub trait HasSynced: Send + Sync {
    fn has_synced(&self) -> bool;
}

/// Indexed lookups into an eventually consistent snapshot of one object kind
pub trait ObjectCache<K>: HasSynced {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>>;
    fn list(&self, namespace: &str) -> Vec<Arc<K>>;
}

/// Store client for one namespaced object kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    async fn create(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn update(&self, namespace: &str, obj: &K) -> Result<K>;

    async fn update_status(&self, namespace: &str, obj: &K) -> Result<K>;
}
