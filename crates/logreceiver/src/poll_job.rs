// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pull-based ingestion from a log4j `DBAppender` style database.
//!
//! Every run fetches the rows newer than the last id seen, turns each row
//! into an event and appends it to the receiver. The cursor moves past a
//! row as soon as the row is read, so a row that fails later on is never
//! fetched again.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, Row};
use tracing::{debug, error, warn};

use crate::errors::DbError;
use crate::event::{LocationInfo, LogEvent, UNKNOWN_LOCATION};
use crate::level::Level;
use crate::receiver::EventSink;

/// Cursor value before any row has been read.
pub const NO_ROWS_SEEN: i64 = -1;

/// Property carrying the row id of every polled event.
pub const ROW_ID_KEY: &str = "log4jid";

/// `reference_flag` bit set when the row has property rows.
pub const PROPERTIES_EXIST: i64 = 0x01;
/// `reference_flag` bit set when the row has exception rows.
pub const EXCEPTION_EXISTS: i64 = 0x02;

pub const EVENTS_QUERY: &str = "SELECT event_id, timestamp, rendered_message, logger_name, \
     level_string, ndc, thread_name, reference_flag, caller_filename, caller_class, \
     caller_method, caller_line FROM logging_event WHERE event_id > ?1 ORDER BY event_id ASC";

pub const EXCEPTION_QUERY: &str =
    "SELECT trace_line FROM logging_event_exception WHERE event_id = ?1 ORDER BY i ASC";

pub const PROPERTIES_QUERY: &str =
    "SELECT mapped_key, mapped_value FROM logging_event_property WHERE event_id = ?1";

/// Hands out a fresh connection for each poll.
pub trait ConnectionSource: Send + Sync {
    fn connection(&self) -> Result<Connection, DbError>;
}

/// Opens the SQLite database at a path.
#[derive(Debug, Clone)]
pub struct SqliteConnectionSource {
    path: PathBuf,
}

impl SqliteConnectionSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConnectionSource for SqliteConnectionSource {
    fn connection(&self) -> Result<Connection, DbError> {
        Ok(Connection::open_with_flags(
            &self.path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }
}

struct EventRow {
    timestamp: i64,
    message: Option<String>,
    logger: Option<String>,
    level: String,
    ndc: Option<String>,
    thread: Option<String>,
    flags: i64,
    caller_file: Option<String>,
    caller_class: Option<String>,
    caller_method: Option<String>,
    caller_line: Option<String>,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            timestamp: row.get(1)?,
            message: row.get(2)?,
            logger: row.get(3)?,
            level: row.get(4)?,
            ndc: row.get(5)?,
            thread: row.get(6)?,
            flags: row.get::<_, Option<i64>>(7)?.unwrap_or_default(),
            caller_file: row.get(8)?,
            caller_class: row.get(9)?,
            caller_method: row.get(10)?,
            caller_line: row.get(11)?,
        })
    }

    fn location(&self) -> Option<LocationInfo> {
        let file = self.caller_file.as_deref()?;
        if file == UNKNOWN_LOCATION {
            return None;
        }
        let or_unknown = |value: &Option<String>| {
            value.clone().unwrap_or_else(|| UNKNOWN_LOCATION.to_string())
        };
        Some(LocationInfo::new(
            file,
            or_unknown(&self.caller_class),
            or_unknown(&self.caller_method),
            or_unknown(&self.caller_line),
        ))
    }
}

/// Cursor plus connection source for one polled database.
pub struct PollJob {
    name: String,
    connections: Box<dyn ConnectionSource>,
    last_id: i64,
}

impl std::fmt::Debug for PollJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollJob")
            .field("name", &self.name)
            .field("last_id", &self.last_id)
            .finish_non_exhaustive()
    }
}

impl PollJob {
    pub fn new(name: impl Into<String>, connections: Box<dyn ConnectionSource>) -> Self {
        Self {
            name: name.into(),
            connections,
            last_id: NO_ROWS_SEEN,
        }
    }

    /// Resumes after `last_id` instead of reading the table from the start.
    #[must_use]
    pub fn starting_after(mut self, last_id: i64) -> Self {
        self.last_id = last_id;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn last_id(&self) -> i64 {
        self.last_id
    }

    /// Polls once and returns the number of events appended to `sink`.
    ///
    /// Failures are logged. The connection is dropped before returning on
    /// every path and the cursor keeps every row already read.
    pub fn run(&mut self, sink: &dyn EventSink) -> usize {
        let connection = match self.connections.connection() {
            Ok(connection) => connection,
            Err(e) => {
                error!("Poll job '{}' could not connect: {}", self.name, e);
                return 0;
            }
        };

        let mut forwarded = 0;
        if let Err(e) = self.poll(&connection, sink, &mut forwarded) {
            error!(
                "Poll job '{}' query failed after id {}: {}",
                self.name, self.last_id, e
            );
        }
        if let Err((_, e)) = connection.close() {
            warn!("Poll job '{}' failed to close connection: {}", self.name, e);
        }
        debug!(
            "Poll job '{}' forwarded {} events, last id {}",
            self.name, forwarded, self.last_id
        );
        forwarded
    }

    fn poll(
        &mut self,
        connection: &Connection,
        sink: &dyn EventSink,
        forwarded: &mut usize,
    ) -> Result<(), DbError> {
        let mut statement = connection.prepare(EVENTS_QUERY)?;
        let mut rows = statement.query(params![self.last_id])?;

        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            self.last_id = self.last_id.max(id);

            let event = EventRow::read(row)
                .map_err(DbError::from)
                .and_then(|event_row| self.build_event(connection, id, &event_row));
            match event {
                Ok(event) => {
                    sink.append(event);
                    *forwarded += 1;
                }
                Err(e) => warn!("Poll job '{}' dropping row: {}", self.name, e),
            }
        }
        Ok(())
    }

    fn build_event(
        &self,
        connection: &Connection,
        id: i64,
        row: &EventRow,
    ) -> Result<LogEvent, DbError> {
        let level = row
            .level
            .parse::<Level>()
            .map_err(|source| DbError::Row { id, source })?;

        let mut builder = LogEvent::builder()
            .level(level)
            .timestamp(row.timestamp)
            .logger(row.logger.clone().unwrap_or_default())
            .thread(row.thread.clone().unwrap_or_default())
            .message(row.message.clone().unwrap_or_default())
            .property(ROW_ID_KEY, id.to_string());
        if let Some(ndc) = row.ndc.as_deref().filter(|ndc| !ndc.is_empty()) {
            builder = builder.ndc(ndc);
        }
        if let Some(location) = row.location() {
            builder = builder.location(location);
        }

        if row.flags & EXCEPTION_EXISTS != 0 {
            match exception_lines(connection, id) {
                Ok(lines) if !lines.is_empty() => builder = builder.throwable(lines),
                Ok(_) => {}
                Err(e) => warn!(
                    "Poll job '{}' could not read exception of row {}: {}",
                    self.name, id, e
                ),
            }
        }
        if row.flags & PROPERTIES_EXIST != 0 {
            match properties(connection, id) {
                Ok(entries) => {
                    builder = entries
                        .into_iter()
                        .fold(builder, |builder, (key, value)| builder.property(key, value));
                }
                Err(e) => warn!(
                    "Poll job '{}' could not read properties of row {}: {}",
                    self.name, id, e
                ),
            }
        }

        builder
            .build()
            .map_err(|source| DbError::Row { id, source })
    }
}

fn exception_lines(connection: &Connection, id: i64) -> Result<Vec<String>, DbError> {
    let mut statement = connection.prepare(EXCEPTION_QUERY)?;
    let lines = statement
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines)
}

fn properties(connection: &Connection, id: i64) -> Result<Vec<(String, String)>, DbError> {
    let mut statement = connection.prepare(PROPERTIES_QUERY)?;
    let entries = statement
        .query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}
