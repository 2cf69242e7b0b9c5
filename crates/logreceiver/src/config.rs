// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::batch_queue::{OverflowPolicy, QueueConfig, DEFAULT_QUEUE_INTERVAL};
use crate::decoder::locator::Locator;
use crate::decoder::Dialect;
use crate::errors::ConfigError;
use crate::level::Level;
use crate::receiver::ReceiverConfig;
use crate::sources::db::DEFAULT_POLL_INTERVAL;
use crate::sources::file::DEFAULT_TAIL_INTERVAL;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the agent binary, read from `LOGRECEIVER_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Log level of the agent itself (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Address the network receivers bind to
    pub host: String,
    /// Minimum level of events accepted by every receiver
    pub threshold: Option<Level>,
    pub queue: QueueConfig,
    /// Wire dialect of the socket and file receivers
    pub dialect: Dialect,
    pub tcp_port: Option<u16>,
    pub udp_port: Option<u16>,
    /// Path or URL of a log file to read
    pub file: Option<Locator>,
    /// Follow `file` as it grows
    pub file_tail: bool,
    pub tail_interval: Duration,
    /// SQLite database written by a log4j DBAppender
    pub db_path: Option<PathBuf>,
    pub db_poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host: "0.0.0.0".to_string(),
            threshold: None,
            queue: QueueConfig::default(),
            dialect: Dialect::Log4j,
            tcp_port: None,
            udp_port: None,
            file: None,
            file_tail: false,
            tail_interval: DEFAULT_TAIL_INTERVAL,
            db_path: None,
            db_poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_level = env::var("LOGRECEIVER_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);
        let host = env::var("LOGRECEIVER_HOST").unwrap_or(defaults.host);
        let threshold = parse_var::<Level>("LOGRECEIVER_THRESHOLD")?;
        let queue = QueueConfig {
            interval: parse_var::<u64>("LOGRECEIVER_QUEUE_INTERVAL_MS")?
                .map_or(DEFAULT_QUEUE_INTERVAL, Duration::from_millis),
            capacity: parse_var::<usize>("LOGRECEIVER_QUEUE_CAPACITY")?,
            overflow_policy: parse_var::<OverflowPolicy>("LOGRECEIVER_OVERFLOW_POLICY")?
                .unwrap_or_default(),
        };
        let dialect = parse_var::<Dialect>("LOGRECEIVER_DIALECT")?.unwrap_or(defaults.dialect);
        let tcp_port = parse_var::<u16>("LOGRECEIVER_TCP_PORT")?;
        let udp_port = parse_var::<u16>("LOGRECEIVER_UDP_PORT")?;
        let file = non_empty_var("LOGRECEIVER_FILE").map(|val| Locator::parse(&val));
        let file_tail = env::var("LOGRECEIVER_FILE_TAIL")
            .map(|val| val.to_lowercase() == "true")
            .unwrap_or(false);
        let db_path = non_empty_var("LOGRECEIVER_DB_PATH").map(PathBuf::from);
        let db_poll_interval = parse_var::<u64>("LOGRECEIVER_DB_POLL_INTERVAL_SECS")?
            .map_or(defaults.db_poll_interval, Duration::from_secs);

        let config = Self {
            log_level,
            host,
            threshold,
            queue,
            dialect,
            tcp_port,
            udp_port,
            file,
            file_tail,
            tail_interval: defaults.tail_interval,
            db_path,
            db_poll_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "LOGRECEIVER_HOST cannot be empty".to_string(),
            ));
        }

        if self.queue.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.db_poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "Database poll interval must be greater than 0".to_string(),
            ));
        }

        if self.tcp_port.is_none()
            && self.udp_port.is_none()
            && self.file.is_none()
            && self.db_path.is_none()
        {
            return Err(ConfigError::Invalid(
                "No receiver configured. Set one of LOGRECEIVER_TCP_PORT, LOGRECEIVER_UDP_PORT, \
                 LOGRECEIVER_FILE or LOGRECEIVER_DB_PATH"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Receiver settings shared by every configured receiver.
    pub fn receiver_config(&self, name: &str) -> ReceiverConfig {
        ReceiverConfig {
            name: name.to_string(),
            threshold: self.threshold,
            queue: self.queue.clone(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|val| !val.trim().is_empty())
}

fn parse_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    non_empty_var(name)
        .map(|val| {
            val.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::Invalid(format!("{name}='{val}': {e}")))
        })
        .transpose()
}
