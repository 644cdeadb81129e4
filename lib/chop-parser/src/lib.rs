//! Translation of ClickHouseInstallation specs into Kubernetes objects
pub mod generator;
pub mod naming;
pub mod settings;

pub use generator::{ClickHouseManifestGenerator, GeneratedObjects, ManifestGenerator, ObjectList};
