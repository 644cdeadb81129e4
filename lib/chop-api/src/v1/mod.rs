/// API version v1 for ClickHouse operator CRDs

pub mod clickhouse_installation;

pub use clickhouse_installation::{ChiStatus, ClickHouseInstallation, ClickHouseInstallationSpec};

/// API group for ClickHouse operator resources
pub const API_GROUP: &str = "clickhouse.altinity.com";
/// API version for ClickHouse operator resources
pub const API_VERSION: &str = "v1";
/// Kind carried by owner references of objects controlled by an installation
pub const INSTALLATION_KIND: &str = "ClickHouseInstallation";
