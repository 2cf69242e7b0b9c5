// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A named receiver: threshold filter, pause switch, batch queue, and at
//! most one attached source.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::batch_queue::{BatchListener, BatchQueue, Enqueued, QueueConfig};
use crate::errors::ReceiverError;
use crate::event::LogEvent;
use crate::level::Level;
use crate::sources::Source;

/// Entry point for events produced by sources and poll jobs.
pub trait EventSink: Send + Sync {
    fn append(&self, event: LogEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub name: String,
    /// Events below this level are discarded. `None` accepts everything.
    pub threshold: Option<Level>,
    pub queue: QueueConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            name: "receiver".to_string(),
            threshold: None,
            queue: QueueConfig::default(),
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<(), ReceiverError> {
        if self.name.trim().is_empty() {
            return Err(ReceiverError::InvalidConfig(
                "Receiver name cannot be empty".to_string(),
            ));
        }
        if self.queue.capacity == Some(0) {
            return Err(ReceiverError::InvalidConfig(format!(
                "Queue capacity of receiver '{}' must be greater than 0",
                self.name
            )));
        }
        Ok(())
    }
}

struct Inner {
    name: String,
    threshold: AtomicU8,
    queue: BatchQueue,
}

impl Inner {
    fn threshold(&self) -> Option<Level> {
        Level::from_u8(self.threshold.load(Ordering::Relaxed))
    }
}

impl EventSink for Inner {
    fn append(&self, event: LogEvent) {
        if !event.level().is_as_severe_as(self.threshold()) {
            trace!(
                "Receiver '{}' discarding {} event below threshold",
                self.name,
                event.level()
            );
            return;
        }
        if self.queue.enqueue(event) == Enqueued::Paused {
            trace!("Receiver '{}' is paused, event discarded", self.name);
        }
    }
}

/// Filters, queues and delivers events for one named stream.
///
/// Creating a receiver spawns its batch worker, so it must happen inside a
/// Tokio runtime.
pub struct Receiver {
    inner: Arc<Inner>,
    cancel_token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    source: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("name", &self.inner.name)
            .field("threshold", &self.inner.threshold())
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}

impl Receiver {
    pub fn new(config: ReceiverConfig) -> Result<Self, ReceiverError> {
        config.validate()?;

        let cancel_token = CancellationToken::new();
        let (queue, worker) = BatchQueue::new(&config.queue, cancel_token.child_token());
        let inner = Arc::new(Inner {
            name: config.name,
            threshold: AtomicU8::new(config.threshold.map_or(0, Level::as_u8)),
            queue,
        });
        let worker = tokio::spawn(worker.run());
        debug!("Receiver '{}' created", inner.name);

        Ok(Self {
            inner,
            cancel_token,
            worker: Mutex::new(Some(worker)),
            source: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn set_threshold(&self, threshold: Option<Level>) {
        self.inner
            .threshold
            .store(threshold.map_or(0, Level::as_u8), Ordering::Relaxed);
    }

    pub fn threshold(&self) -> Option<Level> {
        self.inner.threshold()
    }

    pub fn set_paused(&self, paused: bool) {
        self.inner.queue.set_paused(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.queue.is_paused()
    }

    /// Up to one second events are delivered as soon as they arrive;
    /// longer intervals coalesce arrivals into one batch per interval.
    pub fn set_queue_interval(&self, interval: Duration) {
        self.inner.queue.set_interval(interval);
    }

    pub fn queue_interval(&self) -> Duration {
        self.inner.queue.interval()
    }

    pub fn add_listener(&self, listener: Arc<dyn BatchListener>) {
        self.inner.queue.add_listener(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn BatchListener>) {
        self.inner.queue.remove_listener(listener);
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.queue.dropped_count()
    }

    /// Append boundary handed to sources and poll jobs.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.inner) as Arc<dyn EventSink>
    }

    /// Runs `source` on its own task, feeding this receiver until shutdown.
    pub fn start<S: Source>(&self, source: S) -> Result<(), ReceiverError> {
        let mut slot = self
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Err(ReceiverError::AlreadyStarted(self.inner.name.clone()));
        }

        let name = self.inner.name.clone();
        let source_name = source.name();
        let sink = self.sink();
        let cancel_token = self.cancel_token.child_token();
        info!("Receiver '{}' starting {} source", name, source_name);
        *slot = Some(tokio::spawn(async move {
            match source.run(sink, cancel_token).await {
                Ok(()) => debug!("Receiver '{}' {} source finished", name, source_name),
                Err(e) => error!("Receiver '{}' {} source failed: {}", name, source_name, e),
            }
        }));
        Ok(())
    }

    /// Stops the source and the batch worker. A batch already being
    /// delivered completes; queued events are not drained.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let source = self
            .source
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        for (task, handle) in [("source", source), ("worker", worker)] {
            if let Some(handle) = handle {
                if let Err(e) = handle.await {
                    error!("Receiver '{}' {} task failed: {}", self.inner.name, task, e);
                }
            }
        }
        info!("Receiver '{}' shut down", self.inner.name);
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
