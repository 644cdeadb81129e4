//! In-memory caches, stores and fixtures shared by the controller tests

use crate::cache::{Caches, HasSynced, ObjectCache};
use crate::reconcile::Reconciler;
use crate::router::EventRouter;
use crate::store::{ObjectStore, Stores};
use async_trait::async_trait;
use chop_api::{ClickHouseInstallation, ClickHouseInstallationSpec};
use chop_core::{BackoffConfig, Error, HostRegistry, InventoryTracker, Result, WorkQueue};
use chop_parser::{ClickHouseManifestGenerator, ManifestGenerator};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Index = (String, String);

fn index_of<K: Resource>(obj: &K) -> Index {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

pub struct FakeCache<K> {
    objects: Mutex<HashMap<Index, Arc<K>>>,
    synced: AtomicBool,
}

impl<K: Resource + Clone> FakeCache<K> {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            synced: AtomicBool::new(true),
        }
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    pub fn insert(&self, obj: K) {
        self.objects
            .lock()
            .unwrap()
            .insert(index_of(&obj), Arc::new(obj));
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

impl<K: Send + Sync> HasSynced for FakeCache<K> {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl<K: Send + Sync> ObjectCache<K> for FakeCache<K> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn list(&self, namespace: &str) -> Vec<Arc<K>> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }
}

/// Store double. Creates are mirrored into `mirror` when set, standing in
/// for the watch delivering the write back to the cache.
pub struct FakeStore<K> {
    objects: Mutex<HashMap<Index, K>>,
    failures: Mutex<VecDeque<Error>>,
    mirror: Option<Arc<FakeCache<K>>>,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl<K: Resource<DynamicType = ()> + Clone> FakeStore<K> {
    pub fn new(mirror: Option<Arc<FakeCache<K>>>) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            mirror,
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next store call with `err`
    pub fn fail_next(&self, err: Error) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Put an object in the store without it reaching the cache
    pub fn seed(&self, obj: K) {
        self.objects.lock().unwrap().insert(index_of(&obj), obj);
    }

    pub fn stored(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn injected_failure(&self) -> Result<()> {
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn not_found(name: String) -> Error {
        Error::NotFound {
            kind: K::kind(&()).to_string(),
            name,
        }
    }

    fn replace(&self, obj: &K) -> Result<K> {
        let index = index_of(obj);
        let mut objects = self.objects.lock().unwrap();
        if !objects.contains_key(&index) {
            return Err(Self::not_found(index.1));
        }
        objects.insert(index, obj.clone());
        Ok(obj.clone())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for FakeStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.injected_failure()?;
        self.stored(namespace, name)
            .ok_or_else(|| Self::not_found(name.to_string()))
    }

    async fn create(&self, _namespace: &str, obj: &K) -> Result<K> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;

        let index = index_of(obj);
        {
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(&index) {
                return Err(Error::AlreadyExists {
                    kind: K::kind(&()).to_string(),
                    name: index.1,
                });
            }
            objects.insert(index, obj.clone());
        }
        if let Some(cache) = &self.mirror {
            cache.insert(obj.clone());
        }
        Ok(obj.clone())
    }

    async fn update(&self, _namespace: &str, obj: &K) -> Result<K> {
        self.injected_failure()?;
        self.replace(obj)
    }

    async fn update_status(&self, _namespace: &str, obj: &K) -> Result<K> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.injected_failure()?;
        self.replace(obj)
    }
}

/// HostRegistry that counts writes
#[derive(Default)]
pub struct RecordingInventory {
    pub registry: HostRegistry,
    pub updates: AtomicUsize,
}

#[async_trait]
impl InventoryTracker for RecordingInventory {
    async fn controlled_values_exist(&self, owner: &str, hosts: &[String]) -> bool {
        self.registry.controlled_values_exist(owner, hosts).await
    }

    async fn update_controlled_state(&self, owner: &str, hosts: Vec<String>) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.registry.update_controlled_state(owner, hosts).await;
    }

    async fn remove_controlled_state(&self, owner: &str) {
        self.registry.remove_controlled_state(owner).await;
    }
}

/// A controller's collaborators wired to in-memory doubles. Helpers without
/// a namespace argument work in `ns1`.
pub struct Harness {
    pub queue: WorkQueue<String>,
    pub caches: Caches,
    pub installation_cache: Arc<FakeCache<ClickHouseInstallation>>,
    pub config_map_cache: Arc<FakeCache<ConfigMap>>,
    pub service_cache: Arc<FakeCache<Service>>,
    pub stateful_set_cache: Arc<FakeCache<StatefulSet>>,
    pub stores: Stores,
    pub installation_store: Arc<FakeStore<ClickHouseInstallation>>,
    pub config_map_store: Arc<FakeStore<ConfigMap>>,
    pub service_store: Arc<FakeStore<Service>>,
    pub stateful_set_store: Arc<FakeStore<StatefulSet>>,
    pub inventory: Arc<RecordingInventory>,
}

impl Harness {
    pub fn new() -> Self {
        let installation_cache = Arc::new(FakeCache::new());
        let config_map_cache = Arc::new(FakeCache::new());
        let service_cache = Arc::new(FakeCache::new());
        let stateful_set_cache = Arc::new(FakeCache::new());

        let installation_store = Arc::new(FakeStore::new(None));
        let config_map_store = Arc::new(FakeStore::new(Some(config_map_cache.clone())));
        let service_store = Arc::new(FakeStore::new(Some(service_cache.clone())));
        let stateful_set_store = Arc::new(FakeStore::new(Some(stateful_set_cache.clone())));

        let caches = Caches {
            installations: installation_cache.clone(),
            config_maps: config_map_cache.clone(),
            services: service_cache.clone(),
            stateful_sets: stateful_set_cache.clone(),
        };
        let stores = Stores {
            installations: installation_store.clone(),
            config_maps: config_map_store.clone(),
            services: service_store.clone(),
            stateful_sets: stateful_set_store.clone(),
        };

        Self {
            queue: WorkQueue::new("test", BackoffConfig::default()),
            caches,
            installation_cache,
            config_map_cache,
            service_cache,
            stateful_set_cache,
            stores,
            installation_store,
            config_map_store,
            service_store,
            stateful_set_store,
            inventory: Arc::new(RecordingInventory::default()),
        }
    }

    /// An installation with empty status
    pub fn installation(&self, name: &str, replicas: u32) -> ClickHouseInstallation {
        self.installation_in("ns1", name, replicas)
    }

    pub fn installation_in(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> ClickHouseInstallation {
        let mut chi = ClickHouseInstallation::new(
            name,
            ClickHouseInstallationSpec {
                replicas,
                ..Default::default()
            },
        );
        chi.metadata.namespace = Some(namespace.to_string());
        chi.metadata.uid = Some(format!("uid-{}-{}", namespace, name));
        chi.metadata.resource_version = Some("1".to_string());
        chi
    }

    /// Register an installation in both the cache and the store
    pub fn add_installation(&self, name: &str, replicas: u32) -> ClickHouseInstallation {
        self.add_installation_in("ns1", name, replicas)
    }

    pub fn add_installation_in(
        &self,
        namespace: &str,
        name: &str,
        replicas: u32,
    ) -> ClickHouseInstallation {
        let chi = self.installation_in(namespace, name, replicas);
        self.installation_cache.insert(chi.clone());
        self.installation_store.seed(chi.clone());
        chi
    }

    /// Deliver the stored state of an installation to the cache
    pub fn refresh_installation(&self, name: &str) {
        self.refresh_installation_in("ns1", name);
    }

    pub fn refresh_installation_in(&self, namespace: &str, name: &str) {
        if let Some(chi) = self.installation_store.stored(namespace, name) {
            self.installation_cache.insert(chi);
        }
    }

    /// Create calls issued across every dependent kind
    pub fn create_calls(&self) -> usize {
        self.config_map_store.create_calls.load(Ordering::SeqCst)
            + self.service_store.create_calls.load(Ordering::SeqCst)
            + self.stateful_set_store.create_calls.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> EventRouter {
        EventRouter::new(self.queue.clone(), self.installation_cache.clone())
    }

    pub fn reconciler(&self) -> Reconciler {
        self.reconciler_with(Arc::new(ClickHouseManifestGenerator::default()))
    }

    pub fn reconciler_with(&self, generator: Arc<dyn ManifestGenerator>) -> Reconciler {
        Reconciler::new(
            self.caches.clone(),
            self.stores.clone(),
            generator,
            self.inventory.clone(),
        )
    }
}
