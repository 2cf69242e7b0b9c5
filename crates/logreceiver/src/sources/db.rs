// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Source;
use crate::errors::SourceError;
use crate::poll_job::PollJob;
use crate::receiver::EventSink;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Runs a [`PollJob`] on the blocking pool once per interval.
#[derive(Debug)]
pub struct DbSource {
    job: PollJob,
    interval: Duration,
}

impl DbSource {
    pub fn new(job: PollJob, interval: Duration) -> Self {
        Self { job, interval }
    }
}

#[async_trait]
impl Source for DbSource {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn run(
        self,
        sink: Arc<dyn EventSink>,
        cancel_token: CancellationToken,
    ) -> Result<(), SourceError> {
        let Self { mut job, interval } = self;
        info!("Polling '{}' every {:?}", job.name(), interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let poll_sink = Arc::clone(&sink);
            job = tokio::task::spawn_blocking(move || {
                job.run(poll_sink.as_ref());
                job
            })
            .await?;
            debug!("Poll of '{}' done, last id {}", job.name(), job.last_id());
        }
        Ok(())
    }
}
