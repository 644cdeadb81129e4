//! Persistence of reconciliation outcomes onto ClickHouseInstallation status

use crate::store::ObjectStore;
use chop_api::{ChiStatus, ClickHouseInstallation};
use chop_core::{Error, Result};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::debug;

pub struct StatusUpdater {
    store: Arc<dyn ObjectStore<ClickHouseInstallation>>,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn ObjectStore<ClickHouseInstallation>>) -> Self {
        Self { store }
    }

    /// Record the created replica groups. The cached installation is never
    /// modified; a copy carrying the new status is written to the store.
    pub async fn update(
        &self,
        chi: &ClickHouseInstallation,
        object_prefixes: Vec<String>,
    ) -> Result<ClickHouseInstallation> {
        let namespace = chi.namespace().ok_or_else(|| {
            Error::InvalidConfiguration(format!("installation {} has no namespace", chi.name_any()))
        })?;

        let mut chi_copy = chi.clone();
        chi_copy.status = Some(ChiStatus { object_prefixes });
        debug!(%namespace, name = %chi_copy.name_any(), "updating status");

        self.store.update_status(&namespace, &chi_copy).await
    }
}
