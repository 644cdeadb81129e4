//! Worker pool draining the work queue into the reconciler

use crate::cache::{wait_for_cache_sync, Caches};
use crate::config::ControllerConfig;
use crate::metrics::{ControllerMetrics, Outcome};
use crate::reconcile::Reconciler;
use chop_core::{Error, Result, WorkQueue};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

pub const CONTROLLER_NAME: &str = "ClickHouseInstallation";

pub struct Controller {
    queue: WorkQueue<String>,
    reconciler: Reconciler,
    caches: Caches,
    metrics: ControllerMetrics,
    config: ControllerConfig,
    ready: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        queue: WorkQueue<String>,
        reconciler: Reconciler,
        caches: Caches,
        metrics: ControllerMetrics,
        config: ControllerConfig,
    ) -> Self {
        Self {
            queue,
            reconciler,
            caches,
            metrics,
            config,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag raised once the workers have started
    pub fn readiness(&self) -> Arc<AtomicBool> {
        self.ready.clone()
    }

    /// Wait for the caches, run the workers until `shutdown` resolves, then
    /// let them finish the items already queued.
    ///
    /// Fails without starting any worker when the caches do not sync in time
    /// or `shutdown` resolves first.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting {} controller", CONTROLLER_NAME);

        let synced = tokio::select! {
            res = wait_for_cache_sync(CONTROLLER_NAME, &self.caches, self.config.cache_sync_timeout) => res,
            _ = &mut shutdown => Err(Error::CacheSync(CONTROLLER_NAME.to_string())),
        };
        if let Err(e) = synced {
            error!("{}", e);
            self.queue.shut_down();
            return Err(e);
        }

        let threadiness = self.config.threadiness.max(1);
        let mut workers = JoinSet::new();
        for worker in 0..threadiness {
            let controller = self.clone();
            workers.spawn(async move { controller.run_worker(worker).await });
        }
        self.ready.store(true, Ordering::Release);
        info!(workers = threadiness, "Started workers");

        shutdown.await;
        info!("Shutting down workers");
        self.queue.shut_down();

        while let Some(res) = workers.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "worker task failed");
            }
        }
        info!("Shut down workers");
        Ok(())
    }

    async fn run_worker(&self, worker: usize) {
        debug!(worker, "worker started");
        while self.process_next_work_item(worker).await {}
        debug!(worker, "worker stopped");
    }

    /// Process one key. Returns false once the queue has shut down.
    async fn process_next_work_item(&self, worker: usize) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let started = Instant::now();

        let result = AssertUnwindSafe(self.reconciler.sync_item(&key))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(())) => {
                self.queue.forget(&key);
                debug!(worker, %key, "Successfully synced");
                Outcome::Success
            }
            Ok(Err(e)) if e.is_retryable() => {
                error!(
                    worker,
                    %key,
                    retries = self.queue.num_requeues(&key),
                    "error syncing, requeuing: {}", e
                );
                self.queue.add_rate_limited(key.clone());
                Outcome::Requeued
            }
            Ok(Err(e)) => {
                error!(worker, %key, "error syncing, dropping: {}", e);
                self.queue.forget(&key);
                Outcome::Dropped
            }
            Err(panic) => {
                error!(worker, %key, "reconcile panicked: {}", panic_message(panic.as_ref()));
                self.queue.forget(&key);
                Outcome::Dropped
            }
        };

        self.queue.done(&key);
        self.metrics
            .record(outcome, started.elapsed(), self.queue.len());
        true
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}
