//! Command line and environment configuration

use chop_core::BackoffConfig;
use chop_parser::generator::DEFAULT_IMAGE;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

/// ClickHouse operator - reconciles ClickHouseInstallation resources
#[derive(Parser, Debug)]
#[command(name = "chop-controller", version, about, long_about = None)]
pub struct Args {
    /// Print the ClickHouseInstallation CRD as JSON and exit
    #[arg(long)]
    pub crd: bool,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "CHOP_THREADINESS", default_value_t = 1)]
    pub threadiness: usize,

    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "CHOP_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds to wait for the initial cache sync
    #[arg(long, env = "CHOP_CACHE_SYNC_TIMEOUT_SECS", default_value_t = 120)]
    pub cache_sync_timeout_secs: u64,

    /// Base delay of the per-key retry backoff, in milliseconds
    #[arg(long, env = "CHOP_BACKOFF_BASE_MS", default_value_t = 5)]
    pub backoff_base_ms: u64,

    /// Upper bound of the per-key retry backoff, in seconds
    #[arg(long, env = "CHOP_BACKOFF_MAX_SECS", default_value_t = 1000)]
    pub backoff_max_secs: u64,

    /// Listen address of the metrics and health endpoint
    #[arg(long, env = "CHOP_METRICS_ADDR", default_value = "0.0.0.0:8888")]
    pub metrics_addr: SocketAddr,

    /// Image used when an installation does not name one
    #[arg(long, env = "CHOP_DEFAULT_IMAGE", default_value = DEFAULT_IMAGE)]
    pub default_image: String,

    #[arg(long, env = "CHOP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Settings of the controller run loop
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub threadiness: usize,
    pub cache_sync_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threadiness: 1,
            cache_sync_timeout: Duration::from_secs(120),
            backoff: BackoffConfig::default(),
        }
    }
}

impl Args {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            threadiness: self.threadiness.max(1),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_secs(self.backoff_max_secs),
            },
        }
    }
}
