//! Inventory of hosts controlled by each installation

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Consumer of the network identities resolved for an installation
#[async_trait]
pub trait InventoryTracker: Send + Sync {
    /// Whether exactly `hosts` are already recorded for `owner`
    async fn controlled_values_exist(&self, owner: &str, hosts: &[String]) -> bool;

    /// Replace the hosts recorded for `owner`
    async fn update_controlled_state(&self, owner: &str, hosts: Vec<String>);

    /// Forget everything recorded for `owner`
    async fn remove_controlled_state(&self, owner: &str);
}

/// HostRegistry keeps the hostnames of every installation in memory
#[derive(Clone)]
pub struct HostRegistry {
    // Map of installation key (`<namespace>/<name>`) to its controlled hostnames
    owners: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            owners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Hostnames recorded for an installation
    pub async fn controlled_hosts(&self, owner: &str) -> Option<Vec<String>> {
        let owners = self.owners.read().await;
        owners.get(owner).cloned()
    }

    /// Drop everything recorded for an installation
    pub async fn remove(&self, owner: &str) {
        let mut owners = self.owners.write().await;
        owners.remove(owner);
        debug!("Removed controlled hosts of {}", owner);
    }

    /// Get count of tracked installations
    pub async fn owner_count(&self) -> usize {
        let owners = self.owners.read().await;
        owners.len()
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InventoryTracker for HostRegistry {
    async fn controlled_values_exist(&self, owner: &str, hosts: &[String]) -> bool {
        let owners = self.owners.read().await;
        match owners.get(owner) {
            Some(recorded) => {
                recorded.iter().collect::<BTreeSet<_>>() == hosts.iter().collect::<BTreeSet<_>>()
            }
            None => false,
        }
    }

    async fn update_controlled_state(&self, owner: &str, hosts: Vec<String>) {
        let mut owners = self.owners.write().await;
        debug!("Updated controlled hosts of {}: {:?}", owner, hosts);
        owners.insert(owner.to_string(), hosts);
    }

    async fn remove_controlled_state(&self, owner: &str) {
        self.remove(owner).await;
    }
}
