// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;
use std::sync::Arc;

use logreceiver::decoder::locator::Locator;
use logreceiver::poll_job::{PollJob, SqliteConnectionSource, ROW_ID_KEY};
use logreceiver::sources::{DbSource, XmlFileSource, XmlSocketSource, APPLICATION_KEY, HOSTNAME_KEY};
use logreceiver::{Dialect, Level, LogEvent, Receiver, ReceiverConfig};
use mockito::Server;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

fn receiver_with_channel(
    config: ReceiverConfig,
) -> (Receiver, mpsc::UnboundedReceiver<Vec<LogEvent>>) {
    let receiver = Receiver::new(config).expect("failed to create receiver");
    let (tx, rx) = mpsc::unbounded_channel();
    receiver.add_listener(Arc::new(move |batch: &[LogEvent]| {
        let _ = tx.send(batch.to_vec());
    }));
    (receiver, rx)
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<Vec<LogEvent>>, count: usize) -> Vec<LogEvent> {
    let mut events = Vec::new();
    while events.len() < count {
        let batch = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for batch")
            .expect("listener channel closed");
        assert!(!batch.is_empty(), "empty batch delivered");
        events.extend(batch);
    }
    events
}

fn log4j_event(level: &str, message: &str) -> String {
    format!(
        r#"<log4j:event logger="it" timestamp="1700000000000" level="{level}" thread="main"><log4j:message><![CDATA[{message}]]></log4j:message></log4j:event>
"#
    )
}

#[cfg(test)]
#[tokio::test]
async fn socket_receiver_delivers_filtered_events_in_order() {
    let (receiver, mut rx) = receiver_with_channel(ReceiverConfig {
        name: "tcp".to_string(),
        threshold: Some(Level::Warn),
        ..Default::default()
    });
    let source = XmlSocketSource::bind("127.0.0.1:0".parse().expect("bad addr"), Dialect::Log4j)
        .await
        .expect("failed to bind");
    let addr = source.local_addr().expect("no local addr");
    receiver.start(source).expect("failed to start source");

    let stream: String = [
        log4j_event("INFO", "skipped"),
        log4j_event("WARN", "first"),
        log4j_event("ERROR", "second"),
        log4j_event("DEBUG", "skipped"),
        log4j_event("FATAL", "third"),
    ]
    .concat();

    let mut client = TcpStream::connect(addr).await.expect("failed to connect");
    for piece in stream.as_bytes().chunks(37) {
        client.write_all(piece).await.expect("failed to write");
    }
    client.shutdown().await.expect("failed to shut down");

    let events = collect(&mut rx, 3).await;
    let messages: Vec<&str> = events.iter().map(LogEvent::message).collect();
    assert_eq!(messages, vec!["first", "second", "third"]);
    assert_eq!(events[0].property(HOSTNAME_KEY), Some("127.0.0.1"));

    receiver.shutdown().await;
}

#[cfg(test)]
#[tokio::test]
async fn file_receiver_reads_zipped_jul_document_over_http() {
    let document = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<!DOCTYPE log SYSTEM "logger.dtd">
<log>
<record>
  <millis>967083665789</millis>
  <sequence>1</sequence>
  <logger>kgh.test</logger>
  <level>SEVERE</level>
  <thread>10</thread>
  <message>first</message>
</record>
<record>
  <millis>967083665790</millis>
  <sequence>2</sequence>
  <logger>kgh.test</logger>
  <level>FINE</level>
  <thread>10</thread>
  <message>second</message>
</record>
</log>
"#;
    let mut archive = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    archive
        .start_file("log.xml", zip::write::SimpleFileOptions::default())
        .expect("failed to start entry");
    archive
        .write_all(document.as_bytes())
        .expect("failed to write entry");
    let bytes = archive.finish().expect("failed to finish archive").into_inner();

    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/logs/app.zip")
        .with_status(200)
        .with_body(bytes)
        .create_async()
        .await;

    let url = format!("{}/logs/app.zip", server.url());
    let (receiver, mut rx) = receiver_with_channel(ReceiverConfig {
        name: "file".to_string(),
        ..Default::default()
    });
    receiver
        .start(XmlFileSource::new(
            Locator::parse(&url),
            Dialect::JavaUtilLogging,
        ))
        .expect("failed to start source");

    let events = collect(&mut rx, 2).await;
    mock.assert_async().await;
    assert_eq!(events[0].level(), Level::Error);
    assert_eq!(events[1].level(), Level::Debug);
    assert_eq!(events[1].message(), "second");
    assert_eq!(events[0].property(APPLICATION_KEY), Some(url.as_str()));
    assert_eq!(events[0].property(HOSTNAME_KEY), Some("127.0.0.1"));

    receiver.shutdown().await;
}

#[cfg(test)]
#[tokio::test]
async fn db_receiver_forwards_new_rows() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("events.db");
    let connection = rusqlite::Connection::open(&path).expect("failed to open db");
    connection
        .execute_batch(
            "CREATE TABLE logging_event (
                event_id INTEGER PRIMARY KEY, timestamp INTEGER NOT NULL,
                rendered_message TEXT, logger_name TEXT, level_string TEXT NOT NULL,
                ndc TEXT, thread_name TEXT, reference_flag INTEGER,
                caller_filename TEXT, caller_class TEXT, caller_method TEXT, caller_line TEXT);
             CREATE TABLE logging_event_exception (event_id INTEGER, i INTEGER, trace_line TEXT);
             CREATE TABLE logging_event_property (event_id INTEGER, mapped_key TEXT, mapped_value TEXT);
             INSERT INTO logging_event VALUES (1, 10, 'boot', 'db', 'INFO', NULL, 'main', 1, '?', '?', '?', '?');
             INSERT INTO logging_event_property VALUES (1, 'app', 'billing');
             INSERT INTO logging_event VALUES (2, 20, 'crash', 'db', 'ERROR', NULL, 'main', 2, 'A.java', 'A', 'run', '7');
             INSERT INTO logging_event_exception VALUES (2, 0, 'java.lang.IllegalStateException');",
        )
        .expect("failed to seed db");

    let (receiver, mut rx) = receiver_with_channel(ReceiverConfig {
        name: "db".to_string(),
        ..Default::default()
    });
    let job = PollJob::new("events", Box::new(SqliteConnectionSource::new(&path)));
    receiver
        .start(DbSource::new(job, Duration::from_millis(50)))
        .expect("failed to start source");

    let events = collect(&mut rx, 2).await;
    assert_eq!(events[0].property(ROW_ID_KEY), Some("1"));
    assert_eq!(events[0].property("app"), Some("billing"));
    assert!(events[0].location().is_none());
    assert_eq!(
        events[1].throwable(),
        Some(&["java.lang.IllegalStateException".to_string()][..])
    );

    connection
        .execute(
            "INSERT INTO logging_event VALUES (3, 30, 'later', 'db', 'WARN', NULL, 'main', 0, '?', '?', '?', '?')",
            [],
        )
        .expect("failed to insert");
    let events = collect(&mut rx, 1).await;
    assert_eq!(events[0].message(), "later");

    receiver.shutdown().await;
}

#[cfg(test)]
#[tokio::test]
async fn second_source_is_rejected() {
    let (receiver, _rx) = receiver_with_channel(ReceiverConfig::default());
    let locator = Locator::parse("/does/not/matter.xml");
    receiver
        .start(XmlFileSource::new(locator.clone(), Dialect::Log4j))
        .expect("failed to start source");
    assert!(receiver
        .start(XmlFileSource::new(locator, Dialect::Log4j))
        .is_err());
    receiver.shutdown().await;
}
