// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a run of XML records that is not a document on its own into
//! something a tree parser accepts, and back.
//!
//! The transform has three stages:
//!
//! 1. [`wrap`] strips any XML prolog, doctype and container root the
//!    producer may have written between records, then encloses the text
//!    in the dialect's synthetic root element. Record bodies are copied
//!    untouched.
//! 2. [`parse`] builds the tree.
//! 3. [`records`] walks the synthetic root and yields each record element.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use roxmltree::{Document, Node, ParsingOptions};

use super::Dialect;
use crate::errors::DecodeError;

/// Byte offset just past the last record terminator in `text`, if any.
pub(crate) fn last_terminator_end(dialect: Dialect, text: &str) -> Option<usize> {
    dialect
        .terminators()
        .iter()
        .filter_map(|terminator| text.rfind(terminator).map(|at| at + terminator.len()))
        .max()
}

/// Strips document-level markup from `fragment` and encloses the rest in
/// the synthetic root for `dialect`.
pub(crate) fn wrap(dialect: Dialect, fragment: &str) -> String {
    let body = strip_document_markup(dialect, fragment);
    let (open, close) = dialect.synthetic_root();
    let mut wrapped = String::with_capacity(open.len() + body.len() + close.len());
    wrapped.push_str(open);
    wrapped.push_str(&body);
    wrapped.push_str(close);
    wrapped
}

/// True when `text` holds more than whitespace and document-level markup.
pub(crate) fn has_content(dialect: Dialect, text: &str) -> bool {
    !strip_document_markup(dialect, text).trim().is_empty()
}

/// Removes prolog, doctype and container tags from the text between
/// records. Everything from a record start tag to its terminator is kept
/// as written.
fn strip_document_markup(dialect: Dialect, text: &str) -> String {
    let markup = document_markup(dialect);
    let mut stripped = String::with_capacity(text.len());
    let mut gap_start = 0;
    for span in record_spans(dialect, text) {
        stripped.push_str(&markup.replace_all(&text[gap_start..span.start], ""));
        stripped.push_str(&text[span.start..span.end]);
        gap_start = span.end;
    }
    stripped.push_str(&markup.replace_all(&text[gap_start..], ""));
    stripped
}

/// Byte ranges of the record elements in `text`. A record without a
/// terminator runs to the end of `text`.
fn record_spans(dialect: Dialect, text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(found) = record_start(dialect).find_at(text, from) {
        let start = found.start();
        let end = match start_tag_end(text, start + 1) {
            Some((tag_end, true)) => tag_end,
            Some((tag_end, false)) => dialect
                .terminators()
                .iter()
                .filter_map(|terminator| {
                    text[tag_end..]
                        .find(terminator)
                        .map(|at| tag_end + at + terminator.len())
                })
                .min()
                .unwrap_or(text.len()),
            None => text.len(),
        };
        spans.push(start..end);
        from = end;
    }
    spans
}

/// Offset just past the `>` closing the tag that starts before `from`,
/// skipping quoted attribute values, and whether the tag is self-closing.
fn start_tag_end(text: &str, from: usize) -> Option<(usize, bool)> {
    let bytes = text.as_bytes();
    let mut quote = None;
    for (at, &byte) in bytes.iter().enumerate().skip(from) {
        match (quote, byte) {
            (Some(open), _) if byte == open => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some((at + 1, at > 0 && bytes[at - 1] == b'/')),
            (None, _) => {}
        }
    }
    None
}

pub(crate) fn parse(wrapped: &str) -> Result<Document<'_>, DecodeError> {
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    Ok(Document::parse_with_options(wrapped, options)?)
}

/// Record elements directly under the synthetic root, in document order.
pub(crate) fn records<'a, 'input>(
    dialect: Dialect,
    document: &'a Document<'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    let record_tag = dialect.record_tag();
    document
        .root_element()
        .children()
        .filter(move |node| is_named(*node, record_tag))
}

/// True for an element whose local name matches `name`, ignoring case and
/// namespace prefix.
pub(crate) fn is_named(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name().eq_ignore_ascii_case(name)
}

/// Concatenated text and CDATA content below `node`.
pub(crate) fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|text| text.text())
        .collect()
}

/// `name`/`value` pairs of the `data` children of `node`, in order.
pub(crate) fn data_entries<'a>(node: Node<'a, '_>) -> Vec<(&'a str, &'a str)> {
    node.children()
        .filter(|child| is_named(*child, "data"))
        .filter_map(|data| Some((data.attribute("name")?, data.attribute("value").unwrap_or(""))))
        .collect()
}

pub(crate) fn parse_millis(field: &'static str, value: &str) -> Result<i64, DecodeError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| DecodeError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

#[allow(clippy::expect_used)]
fn document_markup(dialect: Dialect) -> &'static Regex {
    static LOG4J: OnceLock<Regex> = OnceLock::new();
    static JUL: OnceLock<Regex> = OnceLock::new();

    match dialect {
        Dialect::Log4j => LOG4J.get_or_init(|| {
            Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|</?(?:log4j:)?eventSet\b[^>]*>")
                .expect("failed creating regex")
        }),
        Dialect::JavaUtilLogging => JUL.get_or_init(|| {
            Regex::new(r"(?s)<\?xml.*?\?>|<!DOCTYPE[^>]*>|</?log\b[^>]*>")
                .expect("failed creating regex")
        }),
    }
}

#[allow(clippy::expect_used)]
fn record_start(dialect: Dialect) -> &'static Regex {
    static LOG4J: OnceLock<Regex> = OnceLock::new();
    static JUL: OnceLock<Regex> = OnceLock::new();

    match dialect {
        Dialect::Log4j => LOG4J.get_or_init(|| {
            Regex::new(r"(?i)<(?:[a-z_][\w.-]*:)?event[\s/>]").expect("failed creating regex")
        }),
        Dialect::JavaUtilLogging => JUL.get_or_init(|| {
            Regex::new(r"(?i)<(?:[a-z_][\w.-]*:)?record[\s/>]").expect("failed creating regex")
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_last_terminator_end_picks_latest_token() {
        let text = r#"<log4j:event level="INFO"></log4j:event><event level="INFO"></event><ev"#;
        let end = last_terminator_end(Dialect::Log4j, text).unwrap();
        assert_eq!(&text[end..], "<ev");

        assert_eq!(last_terminator_end(Dialect::Log4j, "<event level="), None);
        assert_eq!(last_terminator_end(Dialect::JavaUtilLogging, "</event>"), None);
    }

    #[test]
    fn test_wrap_encloses_fragment_in_synthetic_root() {
        let wrapped = wrap(Dialect::JavaUtilLogging, "<record></record>");
        assert_eq!(wrapped, "<log><record></record></log>");
    }

    #[test]
    fn test_wrap_strips_prolog_and_container() {
        let fragment = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE log SYSTEM "logger.dtd">
<log>
<record><logger>a</logger></record>"#;
        let wrapped = wrap(Dialect::JavaUtilLogging, fragment);
        assert!(!wrapped.contains("<?xml"));
        assert!(!wrapped.contains("DOCTYPE"));
        assert_eq!(wrapped.matches("<log>").count(), 1);
        assert!(wrapped.contains("<logger>a</logger>"));
        parse(&wrapped).unwrap();
    }

    #[test]
    fn test_wrap_strips_log4j_event_set() {
        let fragment = r#"<log4j:eventSet version="1.2" xmlns:log4j="http://jakarta.apache.org/log4j/">
<log4j:event logger="a" level="INFO" timestamp="1" thread="t"></log4j:event>"#;
        let wrapped = wrap(Dialect::Log4j, fragment);
        let document = parse(&wrapped).unwrap();
        assert_eq!(records(Dialect::Log4j, &document).count(), 1);
    }

    #[test]
    fn test_records_match_with_and_without_prefix() {
        let wrapped = wrap(
            Dialect::Log4j,
            r#"<event level="INFO"/><log4j:event level="WARN"/><other/>"#,
        );
        let document = parse(&wrapped).unwrap();
        let levels: Vec<_> = records(Dialect::Log4j, &document)
            .map(|node| node.attribute("level").unwrap())
            .collect();
        assert_eq!(levels, vec!["INFO", "WARN"]);
    }

    #[test]
    fn test_parse_rejects_broken_markup() {
        let wrapped = wrap(Dialect::Log4j, "<event><message></event>");
        assert!(matches!(parse(&wrapped), Err(DecodeError::Xml(_))));
    }

    #[test]
    fn test_text_of_joins_cdata() {
        let wrapped = wrap(
            Dialect::Log4j,
            "<event><message>a <![CDATA[<b>]]> c</message></event>",
        );
        let document = parse(&wrapped).unwrap();
        let event = records(Dialect::Log4j, &document).next().unwrap();
        let message = event.children().find(|n| is_named(*n, "message")).unwrap();
        assert_eq!(text_of(message), "a <b> c");
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("millis", " 1000 ").unwrap(), 1000);
        assert!(matches!(
            parse_millis("millis", "later"),
            Err(DecodeError::InvalidNumber { field: "millis", .. })
        ));
    }

    #[test]
    fn test_has_content_ignores_closing_container() {
        assert!(!has_content(Dialect::JavaUtilLogging, "\n</log>\n"));
        assert!(!has_content(Dialect::Log4j, "  </log4j:eventSet>"));
        assert!(has_content(Dialect::Log4j, "<log4j:event level=\"INFO\">"));
    }

    #[test]
    fn test_wrap_keeps_markup_inside_records() {
        let fragment = r#"<?xml version="1.0"?>
<log4j:eventSet version="1.2">
<log4j:event logger="a" level="INFO" timestamp="1" thread="t"><log4j:message><![CDATA[reply <?xml version="1.0"?><!DOCTYPE r><log4j:eventSet/><r/>]]></log4j:message></log4j:event>
<!DOCTYPE x>
<log4j:event logger="b" level="INFO" timestamp="2" thread="t"/>"#;
        let wrapped = wrap(Dialect::Log4j, fragment);
        let document = parse(&wrapped).unwrap();
        let events: Vec<_> = records(Dialect::Log4j, &document).collect();
        assert_eq!(events.len(), 2);
        let message = events[0]
            .children()
            .find(|n| is_named(*n, "message"))
            .unwrap();
        assert_eq!(
            text_of(message),
            r#"reply <?xml version="1.0"?><!DOCTYPE r><log4j:eventSet/><r/>"#
        );
        assert_eq!(events[1].attribute("logger"), Some("b"));
    }

    #[test]
    fn test_wrap_keeps_jul_container_tag_in_message() {
        let fragment = "<log>\n<record><level>INFO</level><message><![CDATA[<log>nested</log>?>]]></message></record>\n";
        let wrapped = wrap(Dialect::JavaUtilLogging, fragment);
        let document = parse(&wrapped).unwrap();
        let record = records(Dialect::JavaUtilLogging, &document).next().unwrap();
        let message = record.children().find(|n| is_named(*n, "message")).unwrap();
        assert_eq!(text_of(message), "<log>nested</log>?>");
    }

    #[test]
    fn test_record_spans_skip_quoted_angle_brackets() {
        let text = r#"<?xml version="1.0"?><event message="a>b" level="INFO"><x/></event> <event level="WARN"/>"#;
        let spans = record_spans(Dialect::Log4j, text);
        assert_eq!(spans.len(), 2);
        assert!(text[spans[0].clone()].ends_with("</event>"));
        assert_eq!(&text[spans[1].clone()], r#"<event level="WARN"/>"#);
    }

    #[test]
    fn test_has_content_sees_markup_inside_record() {
        assert!(has_content(
            Dialect::Log4j,
            "<log4j:event level=\"INFO\"><log4j:message><![CDATA[<?xml version=\"1.0\"?>"
        ));
    }
}
