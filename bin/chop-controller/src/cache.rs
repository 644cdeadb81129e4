//! Read-only views over the watch caches

use chop_api::ClickHouseInstallation;
use chop_core::{Error, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::Resource;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub use chop_core::{HasSynced, ObjectCache};

const SYNC_POLL_PERIOD: Duration = Duration::from_millis(100);

/// ObjectCache backed by a kube-runtime reflector store
pub struct ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    pub fn new(store: Store<K>, synced: Arc<AtomicBool>) -> Self {
        Self { store, synced }
    }
}

impl<K> HasSynced for ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

impl<K> ObjectCache<K> for ReflectorCache<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::new(name).within(namespace))
    }

    fn list(&self, namespace: &str) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
            .collect()
    }
}

/// The caches consulted by the reconcile engine
#[derive(Clone)]
pub struct Caches {
    pub installations: Arc<dyn ObjectCache<ClickHouseInstallation>>,
    pub config_maps: Arc<dyn ObjectCache<ConfigMap>>,
    pub services: Arc<dyn ObjectCache<Service>>,
    pub stateful_sets: Arc<dyn ObjectCache<StatefulSet>>,
}

impl HasSynced for Caches {
    fn has_synced(&self) -> bool {
        let pending: Vec<&str> = [
            ("ClickHouseInstallation", self.installations.has_synced()),
            ("ConfigMap", self.config_maps.has_synced()),
            ("Service", self.services.has_synced()),
            ("StatefulSet", self.stateful_sets.has_synced()),
        ]
        .into_iter()
        .filter(|(_, synced)| !synced)
        .map(|(kind, _)| kind)
        .collect();

        if !pending.is_empty() {
            debug!(?pending, "waiting for caches");
        }
        pending.is_empty()
    }
}

/// Block until `caches` report synced, failing once `timeout` elapses
pub async fn wait_for_cache_sync(
    controller: &str,
    caches: &dyn HasSynced,
    timeout: Duration,
) -> Result<()> {
    info!("Syncing caches for {} controller", controller);

    let poll = async {
        let mut interval = tokio::time::interval(SYNC_POLL_PERIOD);
        loop {
            interval.tick().await;
            if caches.has_synced() {
                return;
            }
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(()) => {
            info!("Caches are synced for {} controller", controller);
            Ok(())
        }
        Err(_) => Err(Error::CacheSync(controller.to_string())),
    }
}
