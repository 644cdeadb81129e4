//! ClickHouse operator API types and CRDs for Kubernetes integration
//!
//! This library defines the custom resources reconciled by the operator:
//! - ClickHouseInstallation: a declared ClickHouse topology whose replica
//!   groups are materialised as ConfigMaps, Services and StatefulSets

pub mod v1;

pub use v1::{ChiStatus, ClickHouseInstallation, ClickHouseInstallationSpec};
