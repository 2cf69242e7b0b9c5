// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ordered log levels and the java.util.logging mapping onto them.

use std::str::FromStr;

use derive_more::Display;
use serde::Serialize;

use crate::errors::DecodeError;

/// Severity of a log event. Ordering follows severity, so
/// `Level::Fatal > Level::Error > ... > Level::Trace`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    #[display("TRACE")]
    Trace,
    #[display("DEBUG")]
    Debug,
    #[display("INFO")]
    Info,
    #[display("WARN")]
    Warn,
    #[display("ERROR")]
    Error,
    #[display("FATAL")]
    Fatal,
}

// java.util.logging.Level integer values
const JUL_SEVERE: i64 = 1000;
const JUL_WARNING: i64 = 900;
const JUL_CONFIG: i64 = 700;
const JUL_FINE: i64 = 500;

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Fatal,
    ];

    /// Resolves a java.util.logging level, given either by name or by its
    /// integer value. Custom integer levels fall into the nearest band below.
    pub fn from_jul(value: &str) -> Option<Level> {
        let value = value.trim();
        match value.to_ascii_uppercase().as_str() {
            "SEVERE" => return Some(Level::Error),
            "WARNING" => return Some(Level::Warn),
            "INFO" | "CONFIG" => return Some(Level::Info),
            "FINE" => return Some(Level::Debug),
            "FINER" | "FINEST" | "ALL" => return Some(Level::Trace),
            _ => {}
        }

        let numeric = value.parse::<i64>().ok()?;
        let level = if numeric >= JUL_SEVERE {
            Level::Error
        } else if numeric >= JUL_WARNING {
            Level::Warn
        } else if numeric >= JUL_CONFIG {
            Level::Info
        } else if numeric >= JUL_FINE {
            Level::Debug
        } else {
            Level::Trace
        };
        Some(level)
    }

    /// True when an event at this level passes `threshold`. No threshold
    /// accepts everything.
    #[must_use]
    pub fn is_as_severe_as(self, threshold: Option<Level>) -> bool {
        threshold.map_or(true, |threshold| self >= threshold)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8 + 1
    }

    pub(crate) fn from_u8(value: u8) -> Option<Level> {
        value
            .checked_sub(1)
            .and_then(|index| Level::ALL.get(index as usize).copied())
    }
}

impl FromStr for Level {
    type Err = DecodeError;

    /// Parses a log4j level name, falling back to java.util.logging names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "FATAL" => Ok(Level::Fatal),
            "" => Err(DecodeError::MissingLevel),
            _ => Level::from_jul(trimmed).ok_or_else(|| DecodeError::UnknownLevel(s.to_string())),
        }
    }
}
