//! Prometheus metrics for the reconcile loop

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// How a processing pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Failed and re-added with backoff
    Requeued,
    /// Failed and forgotten
    Dropped,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Requeued => "requeued",
            Outcome::Dropped => "dropped",
        }
    }
}

/// Metrics collector shared by the workers and the metrics endpoint
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Processing passes by outcome
    pub reconcile_total: IntCounterVec,
    /// Reconcile latency in seconds
    pub reconcile_duration_seconds: Histogram,
    /// Rate-limited re-adds
    pub workqueue_retries_total: IntCounter,
    /// Keys waiting in the work queue
    pub workqueue_depth: IntGauge,
    /// Installations with recorded hosts
    pub controlled_installations: IntGauge,
    pub registry: Arc<Registry>,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconcile_total = IntCounterVec::new(
            Opts::new("chop_reconcile_total", "Reconcile passes by result"),
            &["result"],
        )?;

        let reconcile_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "chop_reconcile_duration_seconds",
            "Reconcile latency in seconds",
        ))?;

        let workqueue_retries_total = IntCounter::new(
            "chop_workqueue_retries_total",
            "Work items re-added with backoff",
        )?;

        let workqueue_depth = IntGauge::new("chop_workqueue_depth", "Work items waiting")?;

        let controlled_installations = IntGauge::new(
            "chop_controlled_installations",
            "Installations with recorded hosts",
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(workqueue_retries_total.clone()))?;
        registry.register(Box::new(workqueue_depth.clone()))?;
        registry.register(Box::new(controlled_installations.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_duration_seconds,
            workqueue_retries_total,
            workqueue_depth,
            controlled_installations,
            registry,
        })
    }

    /// Record the end of one processing pass
    pub fn record(&self, outcome: Outcome, elapsed: Duration, depth: usize) {
        self.reconcile_total
            .with_label_values(&[outcome.label()])
            .inc();
        self.reconcile_duration_seconds
            .observe(elapsed.as_secs_f64());
        if outcome == Outcome::Requeued {
            self.workqueue_retries_total.inc();
        }
        self.workqueue_depth.set(depth as i64);
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
