//! Translation of watch events into work items
//!
//! Installation events enqueue the installation itself; a deleted
//! installation is enqueued once more so its inventory entry is dropped.
//! Events on dependent
//! objects enqueue the installation named by their controller owner
//! reference, so a change to a StatefulSet re-triggers its owner and never
//! the StatefulSet.

use crate::cache::ObjectCache;
use crate::informer::{DeletedObject, EventHandler};
use chop_api::{ClickHouseInstallation, v1::INSTALLATION_KIND};
use chop_core::{ObjectKey, WorkQueue};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventRouter {
    queue: WorkQueue<String>,
    installations: Arc<dyn ObjectCache<ClickHouseInstallation>>,
}

impl EventRouter {
    pub fn new(
        queue: WorkQueue<String>,
        installations: Arc<dyn ObjectCache<ClickHouseInstallation>>,
    ) -> Self {
        Self {
            queue,
            installations,
        }
    }

    /// Add an installation to the reconcile loop
    pub fn enqueue_installation(&self, chi: &ClickHouseInstallation) {
        match ObjectKey::from_meta(chi.meta()) {
            Ok(key) => self.queue.add(key.to_string()),
            Err(e) => warn!(error = %e, "unable to build work item key"),
        }
    }

    pub fn on_installation_added(&self, chi: &ClickHouseInstallation) {
        self.enqueue_installation(chi);
    }

    pub fn on_installation_updated(
        &self,
        _old: &ClickHouseInstallation,
        new: &ClickHouseInstallation,
    ) {
        self.enqueue_installation(new);
    }

    pub fn on_installation_deleted(&self, deleted: &DeletedObject<ClickHouseInstallation>) {
        match deleted {
            DeletedObject::Live(chi) => self.enqueue_installation(chi),
            DeletedObject::Tombstone(tombstone) => match &tombstone.obj {
                Some(chi) => self.enqueue_installation(chi),
                // the tombstone key names the installation itself
                None => self.queue.add(tombstone.key.clone()),
            },
        }
    }

    pub fn on_dependent_added<K: Resource>(&self, obj: &K) {
        self.handle_object(obj.meta());
    }

    pub fn on_dependent_updated<K: Resource>(&self, old: &K, new: &K) {
        if old.meta().resource_version == new.meta().resource_version {
            // periodic resync, nothing changed
            return;
        }
        self.handle_object(new.meta());
    }

    pub fn on_dependent_deleted<K: Resource>(&self, deleted: &DeletedObject<K>) {
        match deleted.object() {
            Ok(obj) => self.handle_object(obj.meta()),
            Err(e) => warn!(error = %e, "dropping delete event"),
        }
    }

    /// Enqueue the installation controlling the object described by `meta`
    fn handle_object(&self, meta: &ObjectMeta) {
        let Some(owner) = controller_of(meta) else {
            return;
        };
        if owner.kind != INSTALLATION_KIND {
            return;
        }

        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();
        debug!(%namespace, %name, "processing object");

        match self.installations.get(namespace, &owner.name) {
            Some(chi) => self.enqueue_installation(&chi),
            None => debug!(
                %namespace,
                %name,
                owner = %owner.name,
                "ignoring orphaned object of ClickHouseInstallation"
            ),
        }
    }
}

/// The owner reference marked as the managing controller, if any
fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
}

/// Routes ClickHouseInstallation informer events
pub struct InstallationEvents(pub Arc<EventRouter>);

impl EventHandler<ClickHouseInstallation> for InstallationEvents {
    fn on_add(&self, obj: Arc<ClickHouseInstallation>) {
        self.0.on_installation_added(&obj);
    }

    fn on_update(&self, old: Arc<ClickHouseInstallation>, new: Arc<ClickHouseInstallation>) {
        self.0.on_installation_updated(&old, &new);
    }

    fn on_delete(&self, obj: DeletedObject<ClickHouseInstallation>) {
        self.0.on_installation_deleted(&obj);
    }
}

/// Routes informer events of objects owned by installations
pub struct DependentEvents(pub Arc<EventRouter>);

impl<K: Resource> EventHandler<K> for DependentEvents {
    fn on_add(&self, obj: Arc<K>) {
        self.0.on_dependent_added(obj.as_ref());
    }

    fn on_update(&self, old: Arc<K>, new: Arc<K>) {
        self.0.on_dependent_updated(old.as_ref(), new.as_ref());
    }

    fn on_delete(&self, obj: DeletedObject<K>) {
        self.0.on_dependent_deleted(&obj);
    }
}
