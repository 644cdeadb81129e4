//! Create-or-verify reconciliation of a single ClickHouseInstallation
//!
//! An installation without recorded prefixes goes through the creation
//! phase: every generated object is created unless the cache already holds
//! it, then the prefixes are written to status. An installation with
//! prefixes is only verified: missing objects are reported and the resolved
//! pod hostnames are pushed to the inventory tracker when they changed.
//! Missing objects are not re-created while status is populated.
//!
//! The inventory is keyed by `<namespace>/<name>` so equally named
//! installations in different namespaces keep separate entries.

use crate::cache::{Caches, ObjectCache};
use crate::status::StatusUpdater;
use crate::store::{ObjectStore, Stores};
use chop_api::ClickHouseInstallation;
use chop_core::{Error, InventoryTracker, ObjectKey, Result};
use chop_parser::{naming, ManifestGenerator, ObjectList};
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Reconciler {
    caches: Caches,
    stores: Stores,
    generator: Arc<dyn ManifestGenerator>,
    inventory: Arc<dyn InventoryTracker>,
    status: StatusUpdater,
}

impl Reconciler {
    pub fn new(
        caches: Caches,
        stores: Stores,
        generator: Arc<dyn ManifestGenerator>,
        inventory: Arc<dyn InventoryTracker>,
    ) -> Self {
        let status = StatusUpdater::new(stores.installations.clone());
        Self {
            caches,
            stores,
            generator,
            inventory,
            status,
        }
    }

    /// Converge the installation identified by `key`
    pub async fn sync_item(&self, key: &str) -> Result<()> {
        let key: ObjectKey = key.parse()?;

        let Some(chi) = self.caches.installations.get(&key.namespace, &key.name) else {
            // Deleted between enqueue and processing
            info!(%key, "ClickHouseInstallation no longer exists");
            self.inventory.remove_controlled_state(&key.to_string()).await;
            return Ok(());
        };

        if chi.object_prefixes().is_empty() {
            let prefixes = self.create_controlled_resources(&chi).await?;
            let count = prefixes.len();
            self.status.update(&chi, prefixes).await?;
            info!(%key, groups = count, "created controlled resources");
        } else {
            self.verify_controlled_resources(&key, &chi).await;
        }

        Ok(())
    }

    /// Create every generated object and return the prefixes to record
    async fn create_controlled_resources(
        &self,
        chi: &ClickHouseInstallation,
    ) -> Result<Vec<String>> {
        let generated = self.generator.generate(chi.clone())?;

        for list in &generated.lists {
            debug!(kind = list.kind(), count = list.len(), "creating objects");
            match list {
                ObjectList::ConfigMaps(items) => {
                    for obj in items {
                        create_if_absent(
                            self.caches.config_maps.as_ref(),
                            self.stores.config_maps.as_ref(),
                            obj,
                        )
                        .await?;
                    }
                }
                ObjectList::Services(items) => {
                    for obj in items {
                        create_if_absent(
                            self.caches.services.as_ref(),
                            self.stores.services.as_ref(),
                            obj,
                        )
                        .await?;
                    }
                }
                ObjectList::StatefulSets(items) => {
                    for obj in items {
                        create_if_absent(
                            self.caches.stateful_sets.as_ref(),
                            self.stores.stateful_sets.as_ref(),
                            obj,
                        )
                        .await?;
                    }
                }
            }
        }

        Ok(generated.prefixes)
    }

    /// Check the recorded replica groups against the cache and sync the
    /// inventory. Only groups whose StatefulSet is cached contribute a
    /// hostname; a missing StatefulSet leaves its group out of the inventory
    /// rather than recording an empty identity.
    async fn verify_controlled_resources(&self, key: &ObjectKey, chi: &ClickHouseInstallation) {
        let namespace = key.namespace.as_str();
        let owner = key.to_string();
        let prefixes = chi.object_prefixes();

        let mut hosts = Vec::with_capacity(prefixes.len());
        for prefix in prefixes {
            report_missing(
                self.caches.config_maps.as_ref(),
                namespace,
                &naming::config_map_name(prefix),
            );
            report_missing(
                self.caches.services.as_ref(),
                namespace,
                &naming::service_name(prefix),
            );
            if report_missing(
                self.caches.stateful_sets.as_ref(),
                namespace,
                &naming::stateful_set_name(prefix),
            ) {
                hosts.push(naming::pod_hostname(namespace, prefix));
            }
        }

        if self.inventory.controlled_values_exist(&owner, &hosts).await {
            debug!(key = %owner, "inventory up to date");
            return;
        }
        info!(key = %owner, ?hosts, "updating inventory");
        self.inventory.update_controlled_state(&owner, hosts).await;
    }
}

/// Create `obj` unless the cache or the store already knows it
async fn create_if_absent<K>(
    cache: &dyn ObjectCache<K>,
    store: &dyn ObjectStore<K>,
    obj: &K,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Send + Sync,
{
    let kind = K::kind(&());
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();

    if cache.get(&namespace, &name).is_some() {
        debug!(%kind, %namespace, %name, "already exists");
        return Ok(());
    }

    match store.create(&namespace, obj).await {
        Ok(_) => {
            info!(%kind, %namespace, %name, "created");
            Ok(())
        }
        Err(e @ Error::AlreadyExists { .. }) => {
            debug!(%namespace, "{}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Returns whether the object is present, logging it when it is not
fn report_missing<K>(cache: &dyn ObjectCache<K>, namespace: &str, name: &str) -> bool
where
    K: Resource<DynamicType = ()>,
{
    let present = cache.get(namespace, name).is_some();
    if !present {
        warn!(kind = %K::kind(&()), %namespace, %name, "controlled object is missing");
    }
    present
}
