// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The structured log event produced by every decoder and poll job.
//!
//! Events are assembled with [`LogEventBuilder`] and never change once
//! built. Anything that enriches an event (decoder additional properties,
//! exception and property lookups on the database path) goes through the
//! builder before [`LogEventBuilder::build`] is called.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::DecodeError;
use crate::level::Level;

/// Placeholder used by log4j for location fields it could not resolve.
pub const UNKNOWN_LOCATION: &str = "?";

/// Where in the source code an event was logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationInfo {
    pub file: String,
    pub class: String,
    pub method: String,
    pub line: String,
}

impl LocationInfo {
    pub fn new(
        file: impl Into<String>,
        class: impl Into<String>,
        method: impl Into<String>,
        line: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            class: class.into(),
            method: method.into(),
            line: line.into(),
        }
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    logger: String,
    level: Level,
    timestamp: i64,
    thread: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ndc: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mdc: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<LocationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    throwable: Option<Vec<String>>,
    properties: BTreeMap<String, String>,
}

impl LogEvent {
    #[must_use]
    pub fn builder() -> LogEventBuilder {
        LogEventBuilder::default()
    }

    pub fn logger(&self) -> &str {
        &self.logger
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn thread(&self) -> &str {
        &self.thread
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn ndc(&self) -> Option<&str> {
        self.ndc.as_deref()
    }

    /// Mapped diagnostic context in the order the entries were recorded.
    pub fn mdc(&self) -> &[(String, String)] {
        &self.mdc
    }

    pub fn location(&self) -> Option<&LocationInfo> {
        self.location.as_ref()
    }

    /// Exception trace lines, first line being the exception message.
    pub fn throwable(&self) -> Option<&[String]> {
        self.throwable.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogEventBuilder {
    logger: String,
    level: Option<Level>,
    timestamp: i64,
    thread: String,
    message: String,
    ndc: Option<String>,
    mdc: Vec<(String, String)>,
    location: Option<LocationInfo>,
    throwable: Option<Vec<String>>,
    properties: BTreeMap<String, String>,
}

impl LogEventBuilder {
    #[must_use]
    pub fn logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = logger.into();
        self
    }

    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    #[must_use]
    pub fn timestamp(mut self, millis: i64) -> Self {
        self.timestamp = millis;
        self
    }

    #[must_use]
    pub fn thread(mut self, thread: impl Into<String>) -> Self {
        self.thread = thread.into();
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn ndc(mut self, ndc: impl Into<String>) -> Self {
        self.ndc = Some(ndc.into());
        self
    }

    /// Appends an MDC entry. A repeated key replaces the earlier value in place.
    #[must_use]
    pub fn mdc_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.mdc.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.mdc.push((key, value)),
        }
        self
    }

    #[must_use]
    pub fn location(mut self, location: LocationInfo) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn throwable(mut self, lines: Vec<String>) -> Self {
        self.throwable = Some(lines);
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Merges `properties`, overwriting any same-named entries already set.
    #[must_use]
    pub fn properties<'a, I>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in properties {
            self.properties.insert(key.clone(), value.clone());
        }
        self
    }

    /// Finishes the event. Fails when no level was set.
    pub fn build(self) -> Result<LogEvent, DecodeError> {
        let level = self.level.ok_or(DecodeError::MissingLevel)?;
        Ok(LogEvent {
            logger: self.logger,
            level,
            timestamp: self.timestamp,
            thread: self.thread,
            message: self.message,
            ndc: self.ndc,
            mdc: self.mdc,
            location: self.location,
            throwable: self.throwable,
            properties: self.properties,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_level() {
        let result = LogEvent::builder().logger("a.b").message("hi").build();
        assert!(matches!(result, Err(DecodeError::MissingLevel)));
    }

    #[test]
    fn test_build_full_event() {
        let event = LogEvent::builder()
            .logger("a.b")
            .level(Level::Warn)
            .timestamp(1000)
            .thread("main")
            .message("hi")
            .ndc("outer inner")
            .mdc_entry("user", "alice")
            .mdc_entry("request", "42")
            .location(LocationInfo::new("A.java", "a.A", "run", "12"))
            .throwable(vec!["java.lang.Exception: boom".to_string()])
            .property("hostname", "box")
            .build()
            .unwrap();

        assert_eq!(event.logger(), "a.b");
        assert_eq!(event.level(), Level::Warn);
        assert_eq!(event.timestamp(), 1000);
        assert_eq!(event.ndc(), Some("outer inner"));
        assert_eq!(event.mdc()[0], ("user".to_string(), "alice".to_string()));
        assert_eq!(event.mdc()[1].0, "request");
        assert_eq!(event.location().unwrap().line, "12");
        assert_eq!(event.throwable().unwrap().len(), 1);
        assert_eq!(event.property("hostname"), Some("box"));
    }

    #[test]
    fn test_mdc_keeps_first_position_on_repeat() {
        let event = LogEvent::builder()
            .level(Level::Info)
            .mdc_entry("a", "1")
            .mdc_entry("b", "2")
            .mdc_entry("a", "3")
            .build()
            .unwrap();
        assert_eq!(
            event.mdc(),
            &[
                ("a".to_string(), "3".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn test_merged_properties_override_existing() {
        let mut extra = BTreeMap::new();
        extra.insert("hostname".to_string(), "remote".to_string());
        let event = LogEvent::builder()
            .level(Level::Info)
            .property("hostname", "local")
            .property("app", "svc")
            .properties(&extra)
            .build()
            .unwrap();
        assert_eq!(event.property("hostname"), Some("remote"));
        assert_eq!(event.property("app"), Some("svc"));
    }

    #[test]
    fn test_serializes_to_json() {
        let event = LogEvent::builder()
            .logger("x")
            .level(Level::Info)
            .timestamp(1000)
            .thread("t")
            .message("hi")
            .build()
            .unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["message"], "hi");
        assert!(json.get("ndc").is_none());
    }
}
