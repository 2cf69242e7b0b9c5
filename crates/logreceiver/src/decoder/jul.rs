// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reader for java.util.logging XMLFormatter `record` elements.
//!
//! ```text
//! <record>
//!   <date>2000-08-23T19:21:05</date>
//!   <millis>967083665789</millis>
//!   <sequence>1256</sequence>
//!   <logger>kgh.test.fred</logger>
//!   <level>INFO</level>
//!   <class>kgh.test.XMLTest</class>
//!   <method>writeLog</method>
//!   <thread>10</thread>
//!   <message>Hello world!</message>
//!   <exception>
//!     <message>java.lang.Exception: boom</message>
//!     <frame><class>kgh.test.XMLTest</class><method>writeLog</method><line>12</line></frame>
//!   </exception>
//! </record>
//! ```

use roxmltree::Node;

use super::fragment::{is_named, parse_millis, text_of};
use crate::errors::DecodeError;
use crate::event::{LocationInfo, LogEvent, LogEventBuilder, UNKNOWN_LOCATION};
use crate::level::Level;

pub(super) const TERMINATORS: &[&str] = &["</record>"];
pub(super) const ROOT_OPEN: &str = "<log>";
pub(super) const ROOT_CLOSE: &str = "</log>";
pub(super) const RECORD_TAG: &str = "record";

pub const SEQUENCE_KEY: &str = "sequence";

pub(super) fn read_record(node: Node<'_, '_>) -> Result<LogEventBuilder, DecodeError> {
    let mut builder = LogEvent::builder();
    let mut class = None;
    let mut method = None;

    for child in node.children().filter(Node::is_element) {
        let name = child.tag_name().name().to_ascii_lowercase();
        let text = text_of(child);
        builder = match name.as_str() {
            "logger" => builder.logger(text),
            "millis" => builder.timestamp(parse_millis("millis", &text)?),
            "level" => builder.level(text.parse::<Level>()?),
            "thread" => builder.thread(text),
            "sequence" => builder.property(SEQUENCE_KEY, text.trim()),
            "message" => builder.message(text),
            "class" => {
                class = Some(text);
                builder
            }
            "method" => {
                method = Some(text);
                builder
            }
            "exception" => builder.throwable(exception_lines(child)),
            _ => builder,
        };
    }

    if class.is_some() || method.is_some() {
        builder = builder.location(LocationInfo::new(
            UNKNOWN_LOCATION,
            class.unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            method.unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            UNKNOWN_LOCATION,
        ));
    }

    Ok(builder)
}

fn exception_lines(exception: Node<'_, '_>) -> Vec<String> {
    let mut lines = Vec::new();
    for child in exception.children().filter(Node::is_element) {
        if is_named(child, "message") {
            lines.push(text_of(child));
        } else if is_named(child, "frame") {
            lines.push(frame_line(child));
        }
    }
    lines
}

fn frame_line(frame: Node<'_, '_>) -> String {
    let field = |name: &str| {
        frame
            .children()
            .find(|child| is_named(*child, name))
            .map(text_of)
    };
    let class = field("class").unwrap_or_default();
    let method = field("method").unwrap_or_default();
    match field("line") {
        Some(line) => format!("\tat {class}.{method}(line {line})"),
        None => format!("\tat {class}.{method}(Unknown Source)"),
    }
}
