use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ClickHouseInstallation declares a ClickHouse deployment made of
/// independent replica groups, each backed by its own StatefulSet
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clickhouse.altinity.com",
    version = "v1",
    kind = "ClickHouseInstallation",
    plural = "clickhouseinstallations",
    shortname = "chi",
    namespaced,
    derive = "Default",
    status = "ChiStatus",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct ClickHouseInstallationSpec {
    /// Number of replica groups to create
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// ClickHouse server image; the generator default is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Server settings rendered into the per-group configuration file
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

/// Status of a ClickHouseInstallation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChiStatus {
    /// Prefixes of the replica groups created for this installation, in
    /// generation order. Empty until the controlled objects exist.
    #[serde(default)]
    pub object_prefixes: Vec<String>,
}

impl ClickHouseInstallation {
    /// Prefixes recorded in status, empty when nothing has been created yet
    pub fn object_prefixes(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.object_prefixes.as_slice())
            .unwrap_or_default()
    }
}

fn default_replicas() -> u32 {
    1
}

impl Default for ClickHouseInstallationSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: None,
            settings: BTreeMap::new(),
        }
    }
}
