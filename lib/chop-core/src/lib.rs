//! Core controller plumbing for the ClickHouse operator
//!
//! This library provides:
//! - The controller error taxonomy and retry classification
//! - `<namespace>/<name>` work item keys
//! - A deduplicating, rate-limited work queue
//! - Tracking of the hosts controlled by each installation
//! - Cache and store contracts consumed by the reconciler

pub mod collaborators;
pub mod error;
pub mod inventory;
pub mod key;
pub mod queue;

pub use collaborators::{HasSynced, ObjectCache, ObjectStore};
pub use error::{Error, Result};
pub use inventory::{HostRegistry, InventoryTracker};
pub use key::ObjectKey;
pub use queue::{BackoffConfig, ExponentialBackoff, WorkQueue};
