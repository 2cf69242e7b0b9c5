// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logreceiver::{
    config::AgentConfig,
    poll_job::{PollJob, SqliteConnectionSource},
    sources::{DbSource, XmlFileSource, XmlSocketSource, XmlUdpSource},
    BatchListener, LogEvent, Receiver,
};

/// Writes every delivered event to stdout as one JSON object per line.
struct JsonLinesListener;

impl BatchListener for JsonLinesListener {
    fn on_batch(&self, batch: &[LogEvent]) {
        let mut stdout = std::io::stdout().lock();
        for event in batch {
            match serde_json::to_string(event) {
                Ok(line) => {
                    if let Err(e) = writeln!(stdout, "{line}") {
                        error!("Failed to write event: {e}");
                        return;
                    }
                }
                Err(e) => error!("Failed to serialize event: {e}"),
            }
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush stdout: {e}");
        }
    }
}

#[tokio::main]
pub async fn main() {
    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // No subscriber yet, so report on stderr directly.
            eprintln!("Error creating config on logreceiver agent startup: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Could not parse log level in configuration: {e}");
            return;
        }
    };
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return;
    }
    debug!("Logging subsystem enabled");

    let host: IpAddr = match config.host.parse() {
        Ok(host) => host,
        Err(e) => {
            error!("Invalid LOGRECEIVER_HOST '{}': {e}", config.host);
            return;
        }
    };

    let listener: Arc<dyn BatchListener> = Arc::new(JsonLinesListener);
    let mut receivers = Vec::new();

    if let Some(port) = config.tcp_port {
        match start_socket_receiver(&config, SocketAddr::new(host, port), &listener).await {
            Ok(receiver) => receivers.push(receiver),
            Err(e) => error!("Failed to start tcp receiver on port {port}: {e}"),
        }
    }
    if let Some(port) = config.udp_port {
        match start_udp_receiver(&config, SocketAddr::new(host, port), &listener).await {
            Ok(receiver) => receivers.push(receiver),
            Err(e) => error!("Failed to start udp receiver on port {port}: {e}"),
        }
    }
    if let Some(locator) = &config.file {
        let mut source = XmlFileSource::new(locator.clone(), config.dialect);
        if config.file_tail {
            source = source.tail(config.tail_interval);
        }
        match start_receiver(&config, "file", source, &listener) {
            Ok(receiver) => receivers.push(receiver),
            Err(e) => error!("Failed to start file receiver for {locator}: {e}"),
        }
    }
    if let Some(path) = &config.db_path {
        let job = PollJob::new("db", Box::new(SqliteConnectionSource::new(path)));
        match start_receiver(
            &config,
            "db",
            DbSource::new(job, config.db_poll_interval),
            &listener,
        ) {
            Ok(receiver) => receivers.push(receiver),
            Err(e) => error!("Failed to start db receiver for {}: {e}", path.display()),
        }
    }

    if receivers.is_empty() {
        error!("No receiver could be started. Shutting down.");
        return;
    }
    info!("logreceiver agent running with {} receivers", receivers.len());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => error!("Failed to listen for shutdown signal: {e}"),
        }
        signal_token.cancel();
    });
    shutdown.cancelled().await;

    for receiver in &receivers {
        receiver.shutdown().await;
    }
    info!("logreceiver agent stopped");
}

async fn start_socket_receiver(
    config: &AgentConfig,
    addr: SocketAddr,
    listener: &Arc<dyn BatchListener>,
) -> Result<Receiver, Box<dyn std::error::Error>> {
    let source = XmlSocketSource::bind(addr, config.dialect).await?;
    Ok(start_receiver(config, "tcp", source, listener)?)
}

async fn start_udp_receiver(
    config: &AgentConfig,
    addr: SocketAddr,
    listener: &Arc<dyn BatchListener>,
) -> Result<Receiver, Box<dyn std::error::Error>> {
    let source = XmlUdpSource::bind(addr, config.dialect).await?;
    Ok(start_receiver(config, "udp", source, listener)?)
}

fn start_receiver<S: logreceiver::sources::Source>(
    config: &AgentConfig,
    name: &str,
    source: S,
    listener: &Arc<dyn BatchListener>,
) -> Result<Receiver, logreceiver::errors::ReceiverError> {
    let receiver = Receiver::new(config.receiver_config(name))?;
    receiver.add_listener(Arc::clone(listener));
    receiver.start(source)?;
    Ok(receiver)
}
