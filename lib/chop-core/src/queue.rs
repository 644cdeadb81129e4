//! Deduplicating, rate-limited work queue
//!
//! An item is handed to at most one consumer at a time. Adding an item that is
//! already queued is a no-op; adding one that is being processed marks it
//! dirty so it is queued exactly once more when the consumer calls `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Per-item exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay applied after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

/// Rate limiter tracking consecutive failures per item
///
/// The n-th consecutive failure of an item yields `base * 2^n`, capped at
/// `max`. The count only resets through [`ExponentialBackoff::forget`].
#[derive(Debug)]
pub struct ExponentialBackoff<T> {
    config: BackoffConfig,
    failures: HashMap<T, u32>,
}

impl<T: Eq + Hash + Clone> ExponentialBackoff<T> {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: HashMap::new(),
        }
    }

    /// Record a failure for `item` and return how long to wait before retrying
    pub fn when(&mut self, item: &T) -> Duration {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        let attempt = *failures;
        *failures = failures.saturating_add(1);
        self.delay_for(attempt)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.config.base_delay.checked_mul(factor))
            .map(|delay| delay.min(self.config.max_delay))
            .unwrap_or(self.config.max_delay)
    }

    /// Clear the failure history of `item`
    pub fn forget(&mut self, item: &T) {
        self.failures.remove(item);
    }

    /// Number of consecutive failures recorded for `item`
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    backoff: ExponentialBackoff<T>,
    shutting_down: bool,
}

struct Shared<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
}

/// Work queue shared between event producers and workers
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Debug + Send + 'static,
{
    /// Create a new named queue
    pub fn new(name: impl Into<String>, backoff: BackoffConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    backoff: ExponentialBackoff::new(backoff),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue an item, coalescing with a pending or in-flight copy
    pub fn add(&self, item: T) {
        let mut state = self.lock();
        if state.shutting_down {
            trace!(queue = %self.shared.name, ?item, "queue shutting down, dropping item");
            return;
        }
        if !state.dirty.insert(item.clone()) {
            trace!(queue = %self.shared.name, ?item, "item already pending");
            return;
        }
        if state.processing.contains(&item) {
            // Re-queued by `done` once the current pass finishes
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.shared.notify.notify_one();
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue is shutting down and has been drained.
    /// Every `Some` must be paired with exactly one call to [`WorkQueue::done`].
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.shared.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release an item handed out by `get`
    pub fn done(&self, item: &T) {
        let mut state = self.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Clear the backoff history of an item
    pub fn forget(&self, item: &T) {
        self.lock().backoff.forget(item);
    }

    /// Number of consecutive rate-limited re-adds since the last `forget`
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().backoff.num_requeues(item)
    }

    /// Re-enqueue an item after its backoff delay
    pub fn add_rate_limited(&self, item: T) {
        let delay = self.lock().backoff.when(&item);
        debug!(queue = %self.shared.name, ?item, ?delay, "requeueing with backoff");
        self.add_after(item, delay);
    }

    /// Enqueue an item once `delay` has elapsed
    pub fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Number of items waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting items and wake every waiting consumer
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        debug!(queue = %self.shared.name, "queue shutting down");
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
