//! Write access to the cluster

use async_trait::async_trait;
use chop_api::ClickHouseInstallation;
use chop_core::{Error, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::PostParams;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

pub use chop_core::ObjectStore;

/// ObjectStore talking to the API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| classify::<K>(e, name))
    }

    async fn create(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        debug!(kind = %K::kind(&()), %namespace, %name, "creating object");
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(e, &name))
    }

    async fn update(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api::<K>(namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify::<K>(e, &name))
    }

    async fn update_status(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let data = serde_json::to_vec(obj)?;
        self.api::<K>(namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| classify::<K>(e, &name))
    }
}

fn classify<K: Resource<DynamicType = ()>>(err: kube::Error, name: &str) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            Error::AlreadyExists {
                kind: K::kind(&()).to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound {
            kind: K::kind(&()).to_string(),
            name: name.to_string(),
        },
        _ => Error::KubernetesError(err),
    }
}

/// Store clients used by the reconcile engine
#[derive(Clone)]
pub struct Stores {
    pub installations: Arc<dyn ObjectStore<ClickHouseInstallation>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub stateful_sets: Arc<dyn ObjectStore<StatefulSet>>,
}

impl Stores {
    pub fn from_client(client: Client) -> Self {
        let store = KubeStore::new(client);
        Self {
            installations: Arc::new(store.clone()),
            config_maps: Arc::new(store.clone()),
            services: Arc::new(store.clone()),
            stateful_sets: Arc::new(store),
        }
    }
}
