// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reads XML logs from a file or URL, optionally following a local file as
//! it grows.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Source, Utf8Chunker, APPLICATION_KEY, HOSTNAME_KEY};
use crate::decoder::locator::Locator;
use crate::decoder::{Dialect, StreamDecoder};
use crate::errors::SourceError;
use crate::receiver::EventSink;

pub const DEFAULT_TAIL_INTERVAL: Duration = Duration::from_secs(1);

const LOCAL_HOSTNAME: &str = "file";

#[derive(Debug, Clone)]
pub struct XmlFileSource {
    locator: Locator,
    dialect: Dialect,
    tail: Option<Duration>,
}

impl XmlFileSource {
    pub fn new(locator: Locator, dialect: Dialect) -> Self {
        Self {
            locator,
            dialect,
            tail: None,
        }
    }

    /// Keeps polling the file every `interval` for appended records.
    /// Only plain local files can be tailed.
    #[must_use]
    pub fn tail(mut self, interval: Duration) -> Self {
        self.tail = Some(interval);
        self
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    fn properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                HOSTNAME_KEY.to_string(),
                self.locator
                    .host()
                    .unwrap_or_else(|| LOCAL_HOSTNAME.to_string()),
            ),
            (APPLICATION_KEY.to_string(), self.locator.to_string()),
        ])
    }

    async fn read_once(
        &self,
        mut decoder: StreamDecoder,
        sink: &dyn EventSink,
        cancel_token: &CancellationToken,
    ) -> Result<(), SourceError> {
        let events = tokio::select! {
            () = cancel_token.cancelled() => return Ok(()),
            events = decoder.decode_locator(&self.locator) => events?,
        };
        info!("Read {} events from {}", events.len(), self.locator);
        for event in events {
            sink.append(event);
        }
        Ok(())
    }
}

#[async_trait]
impl Source for XmlFileSource {
    fn name(&self) -> &'static str {
        "xml file"
    }

    async fn run(
        self,
        sink: Arc<dyn EventSink>,
        cancel_token: CancellationToken,
    ) -> Result<(), SourceError> {
        let mut decoder = StreamDecoder::new(self.dialect);
        decoder.set_additional_properties(self.properties());

        let tail_target = self
            .tail
            .zip(self.locator.as_path())
            .filter(|_| !self.locator.is_archive());
        match tail_target {
            Some((interval, path)) => {
                tail_file(path, interval, decoder, sink.as_ref(), &cancel_token).await;
                Ok(())
            }
            None => {
                if self.tail.is_some() {
                    warn!(
                        "Only plain local files can be tailed, reading {} once",
                        self.locator
                    );
                }
                self.read_once(decoder, sink.as_ref(), &cancel_token).await
            }
        }
    }
}

async fn tail_file(
    path: &Path,
    interval: Duration,
    mut decoder: StreamDecoder,
    sink: &dyn EventSink,
    cancel_token: &CancellationToken,
) {
    let mut offset = 0u64;
    let mut chunker = Utf8Chunker::default();
    info!("Tailing {} every {:?}", path.display(), interval);

    loop {
        match read_appended(path, &mut offset).await {
            Ok(appended) => {
                if appended.truncated {
                    info!("{} was truncated, reading from the start", path.display());
                    decoder.reset();
                    chunker.reset();
                }
                if !appended.bytes.is_empty() {
                    let text = chunker.push(&appended.bytes);
                    if let Some(events) = decoder.decode_chunk(&text) {
                        debug!("Read {} events from {}", events.len(), path.display());
                        for event in events {
                            sink.append(event);
                        }
                    }
                }
            }
            Err(e) => warn!("Failed to read {}: {}", path.display(), e),
        }

        tokio::select! {
            () = cancel_token.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
    decoder.reset();
}

struct Appended {
    bytes: Vec<u8>,
    truncated: bool,
}

async fn read_appended(path: &Path, offset: &mut u64) -> Result<Appended, SourceError> {
    let mut file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();

    let truncated = len < *offset;
    if truncated {
        *offset = 0;
    }
    if len == *offset {
        return Ok(Appended {
            bytes: Vec::new(),
            truncated,
        });
    }

    file.seek(SeekFrom::Start(*offset)).await?;
    let mut bytes = Vec::new();
    file.take(len - *offset).read_to_end(&mut bytes).await?;
    *offset += bytes.len() as u64;
    Ok(Appended { bytes, truncated })
}
