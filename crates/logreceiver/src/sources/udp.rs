// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use super::{peer_properties, Source};
use crate::decoder::{Dialect, StreamDecoder};
use crate::errors::SourceError;
use crate::receiver::EventSink;

const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Receives XML records sent as UDP datagrams. Each sender gets its own
/// decoder, kept only while it holds an unterminated record.
#[derive(Debug)]
pub struct XmlUdpSource {
    socket: UdpSocket,
    dialect: Dialect,
}

impl XmlUdpSource {
    pub async fn bind(addr: SocketAddr, dialect: Dialect) -> Result<Self, SourceError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(
            "Listening for {} events on udp {}",
            dialect,
            socket.local_addr()?
        );
        Ok(Self { socket, dialect })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SourceError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl Source for XmlUdpSource {
    fn name(&self) -> &'static str {
        "xml udp"
    }

    async fn run(
        self,
        sink: Arc<dyn EventSink>,
        cancel_token: CancellationToken,
    ) -> Result<(), SourceError> {
        let mut decoders: HashMap<SocketAddr, StreamDecoder> = HashMap::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = tokio::select! {
                () = cancel_token.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };
            let (len, peer) = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive datagram: {}", e);
                    continue;
                }
            };
            trace!("Received {} bytes from {}", len, peer);

            let decoder = decoders.entry(peer).or_insert_with(|| {
                let mut decoder = StreamDecoder::new(self.dialect);
                decoder.set_additional_properties(peer_properties(peer));
                decoder
            });
            let text = String::from_utf8_lossy(&buf[..len]);
            if let Some(events) = decoder.decode_chunk(&text) {
                for event in events {
                    sink.append(event);
                }
            }
            if decoder.partial_len() == 0 {
                decoders.remove(&peer);
            }
        }
        Ok(())
    }
}
