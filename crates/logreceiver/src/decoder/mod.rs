// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming decoders for XML log event streams.
//!
//! A [`StreamDecoder`] accepts text in arbitrary chunks. Chunk boundaries
//! do not have to line up with record boundaries: everything after the
//! last complete record is kept in a partial buffer and prepended to the
//! next chunk.
//!
//! ```text
//!   partial + chunk
//!        │
//!        v
//!   split after last terminator ──> tail becomes the new partial
//!        │
//!        v
//!   wrap ──> parse ──> records ──> one LogEvent per record
//! ```
//!
//! Two dialects are supported, see [`Dialect`].

pub mod fragment;
pub mod jul;
pub mod locator;
pub mod log4j;

use std::collections::BTreeMap;
use std::str::FromStr;

use derive_more::Display;
use roxmltree::Node;
use tracing::{debug, error, warn};

use crate::errors::{DecodeError, SourceError};
use crate::event::{LogEvent, LogEventBuilder};
use locator::{line_chunks, Locator, LINES_PER_CHUNK};

/// XML wire format of the records in a stream.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// log4j XMLLayout `event` elements.
    #[display("log4j")]
    Log4j,
    /// java.util.logging XMLFormatter `record` elements.
    #[display("jul")]
    JavaUtilLogging,
}

impl Dialect {
    /// Closing tags that end one record.
    pub fn terminators(self) -> &'static [&'static str] {
        match self {
            Dialect::Log4j => log4j::TERMINATORS,
            Dialect::JavaUtilLogging => jul::TERMINATORS,
        }
    }

    /// Opening and closing tags of the synthetic document root.
    pub fn synthetic_root(self) -> (&'static str, &'static str) {
        match self {
            Dialect::Log4j => (log4j::ROOT_OPEN, log4j::ROOT_CLOSE),
            Dialect::JavaUtilLogging => (jul::ROOT_OPEN, jul::ROOT_CLOSE),
        }
    }

    pub(crate) fn record_tag(self) -> &'static str {
        match self {
            Dialect::Log4j => log4j::RECORD_TAG,
            Dialect::JavaUtilLogging => jul::RECORD_TAG,
        }
    }

    fn read_record(self, node: Node<'_, '_>) -> Result<LogEventBuilder, DecodeError> {
        match self {
            Dialect::Log4j => log4j::read_event(node),
            Dialect::JavaUtilLogging => jul::read_record(node),
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log4j" | "xml" => Ok(Dialect::Log4j),
            "jul" | "java.util.logging" | "utillogging" => Ok(Dialect::JavaUtilLogging),
            other => Err(format!(
                "unknown dialect '{other}', expected one of: log4j, jul"
            )),
        }
    }
}

/// Stateful decoder for one stream. Feed chunks in stream order from a
/// single caller.
#[derive(Debug)]
pub struct StreamDecoder {
    dialect: Dialect,
    partial: String,
    additional_properties: BTreeMap<String, String>,
}

impl StreamDecoder {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            partial: String::new(),
            additional_properties: BTreeMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Properties merged into every decoded event. They win over
    /// same-named properties carried by the record itself.
    pub fn set_additional_properties(&mut self, properties: BTreeMap<String, String>) {
        self.additional_properties = properties;
    }

    pub fn additional_properties(&self) -> &BTreeMap<String, String> {
        &self.additional_properties
    }

    /// Bytes currently held back waiting for a record terminator.
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    /// Decodes the complete records available after appending `chunk`.
    ///
    /// Returns `None` when no record terminator has been seen yet. A chunk
    /// that fails to parse yields `Some` of an empty vector; the unparsable
    /// text is discarded and the undecoded tail is kept.
    pub fn decode_chunk(&mut self, chunk: &str) -> Option<Vec<LogEvent>> {
        self.partial.push_str(chunk);
        let end = fragment::last_terminator_end(self.dialect, &self.partial)?;
        let tail = self.partial.split_off(end);
        let decodable = std::mem::replace(&mut self.partial, tail);
        Some(self.decode_fragment(&decodable))
    }

    /// Decodes every complete record in `document` without touching the
    /// partial buffer. Trailing text without a terminator is ignored.
    pub fn decode(&self, document: &str) -> Vec<LogEvent> {
        let Some(end) = fragment::last_terminator_end(self.dialect, document) else {
            debug!("No complete {} record in document", self.dialect);
            return Vec::new();
        };
        if fragment::has_content(self.dialect, &document[end..]) {
            debug!(
                "Ignoring {} trailing bytes after the last {} record",
                document.len() - end,
                self.dialect
            );
        }
        self.decode_fragment(&document[..end])
    }

    /// Decodes a fragment expected to hold a single record, returning the
    /// first record found.
    pub fn decode_one(&self, fragment: &str) -> Option<LogEvent> {
        self.decode(fragment).into_iter().next()
    }

    /// Reads the stream behind `locator` and decodes it chunk by chunk.
    /// The partial buffer is empty when this returns.
    pub async fn decode_locator(&mut self, locator: &Locator) -> Result<Vec<LogEvent>, SourceError> {
        let text = locator.read_text().await;
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        let mut events = Vec::new();
        for chunk in line_chunks(&text, LINES_PER_CHUNK) {
            if let Some(decoded) = self.decode_chunk(&chunk) {
                events.extend(decoded);
            }
        }
        if fragment::has_content(self.dialect, &self.partial) {
            warn!(
                "Discarding {} bytes of incomplete {} record at end of {}",
                self.partial.len(),
                self.dialect,
                locator
            );
        }
        self.reset();
        Ok(events)
    }

    /// Drops any buffered partial record.
    pub fn reset(&mut self) {
        self.partial.clear();
    }

    fn decode_fragment(&self, fragment: &str) -> Vec<LogEvent> {
        let wrapped = fragment::wrap(self.dialect, fragment);
        let document = match fragment::parse(&wrapped) {
            Ok(document) => document,
            Err(e) => {
                error!(
                    "Failed to parse {} fragment of {} bytes: {}",
                    self.dialect,
                    fragment.len(),
                    e
                );
                return Vec::new();
            }
        };

        fragment::records(self.dialect, &document)
            .filter_map(|node| {
                let event = self
                    .dialect
                    .read_record(node)
                    .and_then(|builder| builder.properties(&self.additional_properties).build());
                match event {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!("Dropping {} record: {}", self.dialect, e);
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::level::Level;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    const SCENARIO: &str =
        r#"<event logger="x" timestamp="1000" level="INFO" thread="t"><message>hi</message></event>"#;

    fn log4j_event(index: usize, message: &str) -> String {
        format!(
            r#"<log4j:event logger="app.{index}" timestamp="{ts}" level="{level}" thread="worker-{index}"><log4j:message><![CDATA[{message}]]></log4j:message><log4j:properties><log4j:data name="n" value="{index}"/></log4j:properties></log4j:event>
"#,
            ts = 1_000 + index,
            level = Level::ALL[index % Level::ALL.len()],
        )
    }

    fn jul_record(index: usize, message: &str) -> String {
        format!(
            "<record>\n  <millis>{ts}</millis>\n  <sequence>{index}</sequence>\n  <logger>app.{index}</logger>\n  <level>INFO</level>\n  <thread>{index}</thread>\n  <message>{message}</message>\n</record>\n",
            ts = 2_000 + index,
        )
    }

    #[test]
    fn test_split_scenario_yields_one_event() {
        for offset in 1..SCENARIO.len() {
            let mut decoder = StreamDecoder::new(Dialect::Log4j);
            assert!(decoder.decode_chunk(&SCENARIO[..offset]).is_none());
            let events = decoder.decode_chunk(&SCENARIO[offset..]).unwrap();
            assert_eq!(events.len(), 1, "split at {offset}");
            assert_eq!(events[0].logger(), "x");
            assert_eq!(events[0].level(), Level::Info);
            assert_eq!(events[0].message(), "hi");
            assert_eq!(decoder.partial_len(), 0);
        }
    }

    #[test]
    fn test_tail_is_carried_to_next_chunk() {
        let mut decoder = StreamDecoder::new(Dialect::Log4j);
        let first = log4j_event(0, "one");
        let second = log4j_event(1, "two");
        let chunk = format!("{first}{}", &second[..20]);

        let events = decoder.decode_chunk(&chunk).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.partial_len(), 20);

        let events = decoder.decode_chunk(&second[20..]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message(), "two");
    }

    #[test]
    #[traced_test]
    fn test_malformed_fragment_is_dropped_and_stream_recovers() {
        let mut decoder = StreamDecoder::new(Dialect::Log4j);
        let events = decoder
            .decode_chunk("<event level=\"INFO\"><message>broken</event><event level=")
            .unwrap();
        assert!(events.is_empty());
        assert!(logs_contain("Failed to parse log4j fragment"));

        let events = decoder
            .decode_chunk("\"WARN\"><message>ok</message></event>")
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level(), Level::Warn);
    }

    #[test]
    #[traced_test]
    fn test_record_without_level_is_dropped_alone() {
        let decoder = StreamDecoder::new(Dialect::Log4j);
        let events = decoder.decode(
            r#"<event logger="a"><message>no level</message></event><event logger="b" level="ERROR"></event>"#,
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].logger(), "b");
        assert!(logs_contain("Dropping log4j record"));
    }

    #[test]
    fn test_markup_inside_cdata_message_is_preserved() {
        let message = r#"reply <?xml version="1.0"?><!DOCTYPE r><log4j:eventSet><r/></log4j:eventSet>"#;
        let mut decoder = StreamDecoder::new(Dialect::Log4j);
        let stream = format!("{}{}", log4j_event(0, message), log4j_event(1, "after"));
        let events = decoder.decode_chunk(&stream).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message(), message);
        assert_eq!(events[1].message(), "after");
    }

    #[test]
    fn test_decode_ignores_partial_buffer() {
        let mut decoder = StreamDecoder::new(Dialect::Log4j);
        assert!(decoder.decode_chunk("<event level=\"INFO\">").is_none());
        let events = decoder.decode(&log4j_event(3, "standalone"));
        assert_eq!(events.len(), 1);
        assert_eq!(decoder.partial_len(), "<event level=\"INFO\">".len());
    }

    #[test]
    fn test_decode_without_records_is_empty() {
        let decoder = StreamDecoder::new(Dialect::Log4j);
        assert!(decoder.decode("").is_empty());
        assert!(decoder.decode("<event level=\"INFO\">").is_empty());
        assert!(decoder.decode_one("<event level=\"INFO\">").is_none());
    }

    #[test]
    fn test_decode_one_returns_first_record() {
        let decoder = StreamDecoder::new(Dialect::JavaUtilLogging);
        let document = format!("{}{}", jul_record(1, "a"), jul_record(2, "b"));
        let event = decoder.decode_one(&document).unwrap();
        assert_eq!(event.message(), "a");
    }

    #[test]
    fn test_decode_full_jul_document() {
        let decoder = StreamDecoder::new(Dialect::JavaUtilLogging);
        let document = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n<!DOCTYPE log SYSTEM \"logger.dtd\">\n<log>\n{}{}</log>\n",
            jul_record(1, "a"),
            jul_record(2, "b")
        );
        let events = decoder.decode(&document);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].timestamp(), 2_002);
        assert_eq!(events[1].property(jul::SEQUENCE_KEY), Some("2"));
    }

    #[test]
    fn test_additional_properties_override_record_properties() {
        let mut decoder = StreamDecoder::new(Dialect::Log4j);
        let mut additional = BTreeMap::new();
        additional.insert("n".to_string(), "overridden".to_string());
        additional.insert("hostname".to_string(), "box".to_string());
        decoder.set_additional_properties(additional);

        let events = decoder.decode_chunk(&log4j_event(5, "m")).unwrap();
        assert_eq!(events[0].property("n"), Some("overridden"));
        assert_eq!(events[0].property("hostname"), Some("box"));
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut decoder = StreamDecoder::new(Dialect::JavaUtilLogging);
        assert!(decoder.decode_chunk("<record><level>INFO").is_none());
        decoder.reset();
        assert_eq!(decoder.partial_len(), 0);
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("log4j".parse::<Dialect>().unwrap(), Dialect::Log4j);
        assert_eq!("JUL".parse::<Dialect>().unwrap(), Dialect::JavaUtilLogging);
        assert!("yaml".parse::<Dialect>().is_err());
    }

    #[tokio::test]
    async fn test_decode_locator_reads_file_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.xml");
        let body: String = (0..2_500).map(|i| log4j_event(i, "from file")).collect();
        std::fs::write(&path, body).unwrap();

        let mut decoder = StreamDecoder::new(Dialect::Log4j);
        let events = decoder
            .decode_locator(&Locator::Path(path))
            .await
            .unwrap();
        assert_eq!(events.len(), 2_500);
        assert_eq!(events[2_499].logger(), "app.2499");
        assert_eq!(decoder.partial_len(), 0);
    }

    fn decode_in_chunks(dialect: Dialect, document: &str, cuts: &[usize]) -> Vec<LogEvent> {
        let mut decoder = StreamDecoder::new(dialect);
        let mut events = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&document.len())) {
            if let Some(decoded) = decoder.decode_chunk(&document[start..cut]) {
                events.extend(decoded);
            }
            start = cut;
        }
        events
    }

    fn sorted_cuts(len: usize, raw: Vec<usize>) -> Vec<usize> {
        let mut cuts: Vec<usize> = raw.into_iter().map(|cut| cut % (len + 1)).collect();
        cuts.sort_unstable();
        cuts.dedup();
        cuts
    }

    proptest! {
        #[test]
        fn prop_log4j_chunk_boundaries_do_not_matter(
            messages in prop::collection::vec("[a-zA-Z0-9 ]{0,24}", 1..8),
            raw_cuts in prop::collection::vec(any::<usize>(), 0..10),
        ) {
            let document: String = messages
                .iter()
                .enumerate()
                .map(|(i, message)| log4j_event(i, message))
                .collect();
            let decoder = StreamDecoder::new(Dialect::Log4j);
            let whole = decoder.decode(&document);
            prop_assert_eq!(whole.len(), messages.len());

            let cuts = sorted_cuts(document.len(), raw_cuts);
            let chunked = decode_in_chunks(Dialect::Log4j, &document, &cuts);
            prop_assert_eq!(chunked, whole);
        }

        #[test]
        fn prop_jul_chunk_boundaries_do_not_matter(
            messages in prop::collection::vec("[a-zA-Z0-9 ]{0,24}", 1..8),
            raw_cuts in prop::collection::vec(any::<usize>(), 0..10),
        ) {
            let document: String = messages
                .iter()
                .enumerate()
                .map(|(i, message)| jul_record(i, message))
                .collect();
            let decoder = StreamDecoder::new(Dialect::JavaUtilLogging);
            let whole = decoder.decode(&document);
            prop_assert_eq!(whole.len(), messages.len());

            let cuts = sorted_cuts(document.len(), raw_cuts);
            let chunked = decode_in_chunks(Dialect::JavaUtilLogging, &document, &cuts);
            prop_assert_eq!(chunked, whole);
        }
    }
}
