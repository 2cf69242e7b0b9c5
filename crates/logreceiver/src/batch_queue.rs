// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-receiver queue that turns single events into batches.
//!
//! Producers call [`BatchQueue::enqueue`] from any task or thread. One
//! [`BatchWorker`] per queue waits for pending events, takes all of them at
//! once and hands the batch to every registered [`BatchListener`].
//!
//! ```text
//!    ┌──────────────┐
//!    │  Producers   │ (sockets, tailers, poll jobs)
//!    └──────┬───────┘
//!           │ enqueue (never waits for drain)
//!           v
//!    ┌──────────────┐
//!    │ Queue State  │ (pending + paused, one mutex)
//!    └──────┬───────┘
//!           │ snapshot-and-clear
//!           v
//!    ┌──────────────┐
//!    │ BatchWorker  │ (one task per receiver)
//!    └──────┬───────┘
//!           │ on_batch, in registration order
//!           v
//!    ┌──────────────┐
//!    │  Listeners   │
//!    └──────────────┘
//! ```
//!
//! # Queue interval
//!
//! An interval up to [`COALESCING_THRESHOLD`] drains as fast as events
//! arrive. Above it the worker sleeps for the interval after every
//! delivery, so events arriving meanwhile are coalesced into one batch.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::event::LogEvent;

/// Intervals above this value switch the worker to the coalescing path.
pub const COALESCING_THRESHOLD: Duration = Duration::from_millis(1000);

pub const DEFAULT_QUEUE_INTERVAL: Duration = Duration::from_millis(1000);

/// Consumer of delivered batches.
///
/// Called synchronously on the worker task. A listener that blocks stalls
/// delivery for its receiver. A listener that panics is logged and skipped
/// for that batch; delivery continues.
pub trait BatchListener: Send + Sync {
    fn on_batch(&self, batch: &[LogEvent]);
}

impl<F> BatchListener for F
where
    F: Fn(&[LogEvent]) + Send + Sync,
{
    fn on_batch(&self, batch: &[LogEvent]) {
        self(batch);
    }
}

/// What happens to an event that arrives while a bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest pending event to make room.
    #[default]
    DropOldest,
    /// Discard the arriving event.
    DropNewest,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            other => Err(format!(
                "unknown overflow policy '{other}', expected drop_oldest or drop_newest"
            )),
        }
    }
}

/// Settings for one batch queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub interval: Duration,
    /// Maximum number of pending events. `None` leaves the queue unbounded.
    pub capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_QUEUE_INTERVAL,
            capacity: None,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Result of [`BatchQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Accepted after evicting the oldest pending event.
    EvictedOldest,
    /// Discarded because the queue was full.
    Rejected,
    /// Discarded because the queue is paused.
    Paused,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<LogEvent>,
    paused: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Notify,
    listeners: RwLock<Vec<Arc<dyn BatchListener>>>,
    interval_millis: AtomicU64,
    capacity: Option<usize>,
    overflow_policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A listener panic never happens under this lock, so a poisoned
        // state is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Producer-side handle. Cheap to clone.
#[derive(Clone)]
pub struct BatchQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueue")
            .field("pending", &self.pending_len())
            .field("paused", &self.is_paused())
            .field("interval", &self.interval())
            .finish_non_exhaustive()
    }
}

impl BatchQueue {
    /// Creates a queue and the worker that drains it. Spawn
    /// [`BatchWorker::run`] to start delivery.
    #[must_use]
    pub fn new(config: &QueueConfig, cancel_token: CancellationToken) -> (Self, BatchWorker) {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            not_empty: Notify::new(),
            listeners: RwLock::new(Vec::new()),
            interval_millis: AtomicU64::new(duration_millis(config.interval)),
            capacity: config.capacity,
            overflow_policy: config.overflow_policy,
            dropped: AtomicU64::new(0),
        });
        let queue = Self {
            shared: Arc::clone(&shared),
        };
        let worker = BatchWorker {
            shared,
            cancel_token,
        };
        (queue, worker)
    }

    /// Appends `event` and wakes the worker. Paused queues discard the
    /// event; events queued before the pause are still delivered.
    pub fn enqueue(&self, event: LogEvent) -> Enqueued {
        let outcome = {
            let mut state = self.shared.lock();
            if state.paused {
                return Enqueued::Paused;
            }
            match self.shared.capacity {
                Some(capacity) if state.pending.len() >= capacity => {
                    match self.shared.overflow_policy {
                        OverflowPolicy::DropOldest => {
                            state.pending.pop_front();
                            state.pending.push_back(event);
                            Enqueued::EvictedOldest
                        }
                        OverflowPolicy::DropNewest => Enqueued::Rejected,
                    }
                }
                _ => {
                    state.pending.push_back(event);
                    Enqueued::Accepted
                }
            }
        };

        match outcome {
            Enqueued::Accepted => self.shared.not_empty.notify_one(),
            Enqueued::Paused => {}
            Enqueued::EvictedOldest | Enqueued::Rejected => {
                let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1_000 == 0 {
                    warn!("Batch queue full, {} events dropped so far", dropped);
                }
                if outcome == Enqueued::EvictedOldest {
                    self.shared.not_empty.notify_one();
                }
            }
        }
        outcome
    }

    /// Registers a listener. Listeners receive batches in registration order.
    pub fn add_listener(&self, listener: Arc<dyn BatchListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    /// Removes a previously registered listener, compared by identity.
    pub fn remove_listener(&self, listener: &Arc<dyn BatchListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.lock().paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_millis
            .store(duration_millis(interval), Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.shared.interval_millis.load(Ordering::Relaxed))
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Events discarded or evicted because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn take_pending(&self) -> Vec<LogEvent> {
        self.shared.lock().pending.drain(..).collect()
    }
}

/// Drains a [`BatchQueue`] and delivers batches until cancelled.
pub struct BatchWorker {
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
}

impl BatchWorker {
    pub async fn run(self) {
        debug!("Batch worker started");

        loop {
            let batch = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                batch = self.next_batch() => batch,
            };

            self.deliver(&batch);

            let interval = Duration::from_millis(self.shared.interval_millis.load(Ordering::Relaxed));
            if interval > COALESCING_THRESHOLD {
                tokio::select! {
                    biased;
                    () = self.cancel_token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            } else {
                tokio::task::yield_now().await;
            }
        }

        debug!("Batch worker stopped");
    }

    /// Waits until events are pending, then takes all of them.
    async fn next_batch(&self) -> Vec<LogEvent> {
        loop {
            {
                let mut state = self.shared.lock();
                if !state.pending.is_empty() {
                    return state.pending.drain(..).collect();
                }
            }
            self.shared.not_empty.notified().await;
        }
    }

    fn deliver(&self, batch: &[LogEvent]) {
        let listeners: Vec<Arc<dyn BatchListener>> = self
            .shared
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        debug!(
            "Delivering batch of {} events to {} listeners",
            batch.len(),
            listeners.len()
        );
        for (index, listener) in listeners.iter().enumerate() {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener.on_batch(batch))) {
                error!(
                    "Listener {} panicked on a batch of {} events: {}",
                    index,
                    batch.len(),
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
