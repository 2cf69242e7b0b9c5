// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reader for log4j XMLLayout `event` elements.
//!
//! ```text
//! <log4j:event logger="a.b" timestamp="1000" level="INFO" thread="main">
//!   <log4j:message><![CDATA[hello]]></log4j:message>
//!   <log4j:NDC>outer inner</log4j:NDC>
//!   <log4j:throwable><![CDATA[java.lang.Exception: boom
//!     at a.b.C.run(C.java:12)]]></log4j:throwable>
//!   <log4j:locationInfo class="a.b.C" method="run" file="C.java" line="12"/>
//!   <log4j:properties><log4j:data name="user" value="alice"/></log4j:properties>
//! </log4j:event>
//! ```

use roxmltree::Node;
use tracing::trace;

use super::fragment::{data_entries, parse_millis, text_of};
use crate::errors::DecodeError;
use crate::event::{LocationInfo, LogEvent, LogEventBuilder, UNKNOWN_LOCATION};
use crate::level::Level;

pub(super) const TERMINATORS: &[&str] = &["</log4j:event>", "</event>"];
pub(super) const ROOT_OPEN: &str = r#"<log4j:eventSet xmlns:log4j="http://jakarta.apache.org/log4j/">"#;
pub(super) const ROOT_CLOSE: &str = "</log4j:eventSet>";
pub(super) const RECORD_TAG: &str = "event";

pub(super) fn read_event(node: Node<'_, '_>) -> Result<LogEventBuilder, DecodeError> {
    let level = node
        .attribute("level")
        .ok_or(DecodeError::MissingLevel)?
        .parse::<Level>()?;

    let mut builder = LogEvent::builder()
        .level(level)
        .logger(node.attribute("logger").unwrap_or_default())
        .thread(node.attribute("thread").unwrap_or_default());
    if let Some(timestamp) = node.attribute("timestamp") {
        builder = builder.timestamp(parse_millis("timestamp", timestamp)?);
    }

    for child in node.children().filter(Node::is_element) {
        let name = child.tag_name().name().to_ascii_lowercase();
        builder = match name.as_str() {
            "message" => builder.message(text_of(child)),
            "ndc" => builder.ndc(text_of(child)),
            "mdc" => data_entries(child)
                .into_iter()
                .fold(builder, |builder, (key, value)| builder.mdc_entry(key, value)),
            "properties" => data_entries(child)
                .into_iter()
                .fold(builder, |builder, (key, value)| builder.property(key, value)),
            "throwable" => {
                let lines = throwable_lines(&text_of(child));
                if lines.is_empty() {
                    builder
                } else {
                    builder.throwable(lines)
                }
            }
            "locationinfo" => builder.location(LocationInfo::new(
                child.attribute("file").unwrap_or(UNKNOWN_LOCATION),
                child.attribute("class").unwrap_or(UNKNOWN_LOCATION),
                child.attribute("method").unwrap_or(UNKNOWN_LOCATION),
                child.attribute("line").unwrap_or(UNKNOWN_LOCATION),
            )),
            other => {
                trace!("Ignoring unknown log4j element '{}'", other);
                builder
            }
        };
    }

    Ok(builder)
}

fn throwable_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
