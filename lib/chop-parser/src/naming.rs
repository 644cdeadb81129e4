//! Deterministic names of the objects belonging to a replica group

/// Label carrying the name of the owning installation
pub const INSTALLATION_LABEL: &str = "clickhouse.altinity.com/chi";
/// Label carrying the object prefix of the replica group
pub const PREFIX_LABEL: &str = "clickhouse.altinity.com/prefix";

/// Prefix of the `index`-th replica group of an installation
pub fn object_prefix(installation: &str, index: u32) -> String {
    format!("{}-{}", installation, index)
}

pub fn config_map_name(prefix: &str) -> String {
    format!("{}-config", prefix)
}

pub fn service_name(prefix: &str) -> String {
    format!("{}-svc", prefix)
}

pub fn stateful_set_name(prefix: &str) -> String {
    format!("{}-sts", prefix)
}

/// Stable DNS name of the single pod of a replica group
pub fn pod_hostname(namespace: &str, prefix: &str) -> String {
    format!(
        "{}-0.{}.{}.svc.cluster.local",
        stateful_set_name(prefix),
        service_name(prefix),
        namespace
    )
}
