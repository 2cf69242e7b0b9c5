// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the decoders, sources, poll job and receivers.

/// Failures while turning XML text into events.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed XML fragment: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("record has no level")]
    MissingLevel,

    #[error("unknown level '{0}'")]
    UnknownLevel(String),

    #[error("invalid {field} value '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

/// Failures of a transport: socket, file, URL or archive.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive '{0}' has no entries")]
    EmptyArchive(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Failures of the database poll path.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("row {id}: {source}")]
    Row { id: i64, source: DecodeError },
}

/// Errors raised by receiver lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Receiver '{0}' already has a source")]
    AlreadyStarted(String),
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
