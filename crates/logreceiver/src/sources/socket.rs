// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP listener accepting XML log streams from socket appenders.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{peer_properties, Source, Utf8Chunker};
use crate::decoder::{Dialect, StreamDecoder};
use crate::errors::SourceError;
use crate::receiver::EventSink;

const READ_BUFFER_SIZE: usize = 8192;

/// Accepts any number of connections; each gets its own decoder.
#[derive(Debug)]
pub struct XmlSocketSource {
    listener: TcpListener,
    dialect: Dialect,
}

impl XmlSocketSource {
    pub async fn bind(addr: SocketAddr, dialect: Dialect) -> Result<Self, SourceError> {
        let listener = TcpListener::bind(addr).await?;
        info!(
            "Listening for {} events on tcp {}",
            dialect,
            listener.local_addr()?
        );
        Ok(Self { listener, dialect })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SourceError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Source for XmlSocketSource {
    fn name(&self) -> &'static str {
        "xml socket"
    }

    async fn run(
        self,
        sink: Arc<dyn EventSink>,
        cancel_token: CancellationToken,
    ) -> Result<(), SourceError> {
        loop {
            let accepted = tokio::select! {
                () = cancel_token.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted {} connection from {}", self.dialect, peer);
                    tokio::spawn(read_connection(
                        stream,
                        peer,
                        self.dialect,
                        Arc::clone(&sink),
                        cancel_token.clone(),
                    ));
                }
                Err(e) => error!("Failed to accept connection: {}", e),
            }
        }
        Ok(())
    }
}

async fn read_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dialect: Dialect,
    sink: Arc<dyn EventSink>,
    cancel_token: CancellationToken,
) {
    let mut decoder = StreamDecoder::new(dialect);
    decoder.set_additional_properties(peer_properties(peer));
    let mut chunker = Utf8Chunker::default();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            () = cancel_token.cancelled() => break,
            read = stream.read(&mut buf) => read,
        };
        match read {
            Ok(0) => {
                debug!("Connection from {} closed", peer);
                break;
            }
            Ok(n) => {
                let text = chunker.push(&buf[..n]);
                if let Some(events) = decoder.decode_chunk(&text) {
                    for event in events {
                        sink.append(event);
                    }
                }
            }
            Err(e) => {
                error!("Error reading from {}: {}", peer, e);
                break;
            }
        }
    }
    decoder.reset();
}
