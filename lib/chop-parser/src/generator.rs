//! Manifest generation for ClickHouseInstallation resources

use crate::naming;
use crate::settings::{render_settings, CONFIG_DIR, SETTINGS_FILE};
use chop_api::ClickHouseInstallation;
use chop_core::{Error, Result};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_IMAGE: &str = "yandex/clickhouse-server:latest";

const CONTAINER_NAME: &str = "clickhouse";
const CONFIG_VOLUME: &str = "chop-settings";
const PORTS: [(&str, i32); 3] = [("http", 8123), ("client", 9000), ("interserver", 9009)];

/// Objects of a single kind produced for an installation
#[derive(Clone, Debug)]
pub enum ObjectList {
    ConfigMaps(Vec<ConfigMap>),
    Services(Vec<Service>),
    StatefulSets(Vec<StatefulSet>),
}

impl ObjectList {
    pub fn kind(&self) -> &'static str {
        match self {
            ObjectList::ConfigMaps(_) => "ConfigMap",
            ObjectList::Services(_) => "Service",
            ObjectList::StatefulSets(_) => "StatefulSet",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ObjectList::ConfigMaps(v) => v.len(),
            ObjectList::Services(v) => v.len(),
            ObjectList::StatefulSets(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of a manifest generator: object lists in creation order plus the
/// prefixes of the replica groups they form
#[derive(Clone, Debug, Default)]
pub struct GeneratedObjects {
    pub lists: Vec<ObjectList>,
    pub prefixes: Vec<String>,
}

/// Builds the dependent objects of an installation.
///
/// Implementations must be pure: the same installation always yields the
/// same objects and prefixes.
pub trait ManifestGenerator: Send + Sync {
    fn generate(&self, chi: ClickHouseInstallation) -> Result<GeneratedObjects>;
}

/// Generator producing one ConfigMap, headless Service and single-pod
/// StatefulSet per replica group
#[derive(Clone, Debug)]
pub struct ClickHouseManifestGenerator {
    default_image: String,
}

impl ClickHouseManifestGenerator {
    pub fn new(default_image: impl Into<String>) -> Self {
        Self {
            default_image: default_image.into(),
        }
    }
}

impl Default for ClickHouseManifestGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE)
    }
}

struct Context<'a> {
    name: &'a str,
    namespace: &'a str,
    owner: OwnerReference,
    image: &'a str,
}

impl Context<'_> {
    fn labels(&self, prefix: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (naming::INSTALLATION_LABEL.to_string(), self.name.to_string()),
            (naming::PREFIX_LABEL.to_string(), prefix.to_string()),
        ])
    }

    fn metadata(&self, name: String, prefix: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.to_string()),
            labels: Some(self.labels(prefix)),
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }

    fn config_map(&self, prefix: &str, settings: &str) -> ConfigMap {
        ConfigMap {
            metadata: self.metadata(naming::config_map_name(prefix), prefix),
            data: Some(BTreeMap::from([(
                SETTINGS_FILE.to_string(),
                settings.to_string(),
            )])),
            ..Default::default()
        }
    }

    fn service(&self, prefix: &str) -> Service {
        let ports = PORTS
            .iter()
            .map(|(name, port)| ServicePort {
                name: Some(name.to_string()),
                port: *port,
                target_port: Some(IntOrString::Int(*port)),
                ..Default::default()
            })
            .collect();

        Service {
            metadata: self.metadata(naming::service_name(prefix), prefix),
            spec: Some(ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: Some(self.labels(prefix)),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn stateful_set(&self, prefix: &str) -> Result<StatefulSet> {
        let labels = self.labels(prefix);
        let container_ports: Vec<_> = PORTS
            .iter()
            .map(|(name, port)| serde_json::json!({"name": name, "containerPort": port}))
            .collect();

        let mut stateful_set: StatefulSet = serde_json::from_value(serde_json::json!({
            "spec": {
                "replicas": 1,
                "serviceName": naming::service_name(prefix),
                "selector": {"matchLabels": labels},
                "template": {
                    "metadata": {"labels": labels},
                    "spec": {
                        "containers": [{
                            "name": CONTAINER_NAME,
                            "image": self.image,
                            "ports": container_ports,
                            "volumeMounts": [{"name": CONFIG_VOLUME, "mountPath": CONFIG_DIR}],
                        }],
                        "volumes": [{
                            "name": CONFIG_VOLUME,
                            "configMap": {"name": naming::config_map_name(prefix)},
                        }],
                    },
                },
            },
        }))?;
        stateful_set.metadata = self.metadata(naming::stateful_set_name(prefix), prefix);
        Ok(stateful_set)
    }
}

impl ManifestGenerator for ClickHouseManifestGenerator {
    fn generate(&self, chi: ClickHouseInstallation) -> Result<GeneratedObjects> {
        let name = chi
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::InvalidConfiguration("installation has no name".into()))?;
        let namespace = chi.metadata.namespace.as_deref().ok_or_else(|| {
            Error::InvalidConfiguration(format!("installation {} has no namespace", name))
        })?;
        let owner = chi.controller_owner_ref(&()).ok_or_else(|| {
            Error::InvalidConfiguration(format!("installation {} has no uid", name))
        })?;

        let ctx = Context {
            name,
            namespace,
            owner,
            image: chi.spec.image.as_deref().unwrap_or(&self.default_image),
        };
        let settings = render_settings(&chi.spec.settings)?;
        let prefixes: Vec<String> = (0..chi.spec.replicas)
            .map(|i| naming::object_prefix(name, i))
            .collect();

        let config_maps = prefixes
            .iter()
            .map(|p| ctx.config_map(p, &settings))
            .collect();
        let services = prefixes.iter().map(|p| ctx.service(p)).collect();
        let stateful_sets = prefixes
            .iter()
            .map(|p| ctx.stateful_set(p))
            .collect::<Result<Vec<_>>>()?;

        debug!("Generated {} replica groups for {}/{}", prefixes.len(), namespace, name);

        Ok(GeneratedObjects {
            lists: vec![
                ObjectList::ConfigMaps(config_maps),
                ObjectList::Services(services),
                ObjectList::StatefulSets(stateful_sets),
            ],
            prefixes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chop_api::ClickHouseInstallationSpec;

    fn installation(replicas: u32) -> ClickHouseInstallation {
        let mut chi = ClickHouseInstallation::new(
            "demo",
            ClickHouseInstallationSpec {
                replicas,
                ..Default::default()
            },
        );
        chi.metadata.namespace = Some("ns1".to_string());
        chi.metadata.uid = Some("2b1f4a3e-0000-4000-8000-000000000001".to_string());
        chi
    }

    #[test]
    fn test_one_object_per_prefix_per_kind() {
        let generated = ClickHouseManifestGenerator::default()
            .generate(installation(2))
            .unwrap();

        assert_eq!(generated.prefixes, vec!["demo-0", "demo-1"]);
        let kinds: Vec<_> = generated.lists.iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, vec!["ConfigMap", "Service", "StatefulSet"]);
        assert!(generated.lists.iter().all(|l| l.len() == 2));
    }

    #[test]
    fn test_objects_are_owned_by_installation() {
        let generated = ClickHouseManifestGenerator::default()
            .generate(installation(1))
            .unwrap();

        let ObjectList::StatefulSets(stateful_sets) = &generated.lists[2] else {
            panic!("expected stateful sets last");
        };
        let sts = &stateful_sets[0];
        assert_eq!(sts.metadata.name.as_deref(), Some("demo-0-sts"));
        assert_eq!(sts.metadata.namespace.as_deref(), Some("ns1"));
        let owner = &sts.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "ClickHouseInstallation");
        assert_eq!(owner.name, "demo");
        assert_eq!(owner.controller, Some(true));

        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some(DEFAULT_IMAGE));
    }

    #[test]
    fn test_headless_service() {
        let generated = ClickHouseManifestGenerator::default()
            .generate(installation(1))
            .unwrap();
        let ObjectList::Services(services) = &generated.lists[1] else {
            panic!("expected services second");
        };
        let spec = services[0].spec.as_ref().unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let generator = ClickHouseManifestGenerator::new("clickhouse/clickhouse-server:24.3");
        let first = generator.generate(installation(3)).unwrap();
        let second = generator.generate(installation(3)).unwrap();
        assert_eq!(first.prefixes, second.prefixes);
        assert_eq!(
            serde_json::to_value(match &first.lists[2] {
                ObjectList::StatefulSets(s) => s,
                _ => unreachable!(),
            })
            .unwrap(),
            serde_json::to_value(match &second.lists[2] {
                ObjectList::StatefulSets(s) => s,
                _ => unreachable!(),
            })
            .unwrap()
        );
    }

    #[test]
    fn test_installation_without_uid_is_rejected() {
        let mut chi = installation(1);
        chi.metadata.uid = None;
        let err = ClickHouseManifestGenerator::default().generate(chi).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn test_invalid_setting_key_is_rejected() {
        let mut chi = installation(1);
        chi.spec
            .settings
            .insert("a></a><evil".to_string(), "x".to_string());
        let err = ClickHouseManifestGenerator::default().generate(chi).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(!err.is_retryable());
    }
}
