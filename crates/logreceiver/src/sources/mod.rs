// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transports that feed a receiver.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::SourceError;
use crate::receiver::EventSink;

pub mod db;
pub mod file;
pub mod socket;
pub mod udp;

pub use db::DbSource;
pub use file::XmlFileSource;
pub use socket::XmlSocketSource;
pub use udp::XmlUdpSource;

/// Property naming the host an event came from.
pub const HOSTNAME_KEY: &str = "hostname";
/// Property naming the `ip:port` of the peer that sent an event.
pub const REMOTE_SOURCE_KEY: &str = "log4j.remoteSourceInfo";
/// Property naming the file or URL an event was read from.
pub const APPLICATION_KEY: &str = "application";

/// Produces events into a sink until cancelled or exhausted.
#[async_trait]
pub trait Source: Send + Sized + 'static {
    fn name(&self) -> &'static str;

    async fn run(
        self,
        sink: Arc<dyn EventSink>,
        cancel_token: CancellationToken,
    ) -> Result<(), SourceError>;
}

/// Turns a byte stream into text without splitting multi-byte characters
/// across reads. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending.drain(..valid_up_to);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

pub(crate) fn peer_properties(peer: SocketAddr) -> BTreeMap<String, String> {
    BTreeMap::from([
        (HOSTNAME_KEY.to_string(), peer.ip().to_string()),
        (REMOTE_SOURCE_KEY.to_string(), peer.to_string()),
    ])
}
