// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logreceiver
//!
//! Ingests log4j and java.util.logging XML event streams from sockets,
//! files, URLs and databases, and delivers them in batches to listeners.
//!
//! ## Architecture
//!
//! - [`decoder`]: chunk-boundary independent XML decoding for both dialects
//! - [`poll_job`]: incremental reads from a log4j `DBAppender` database
//! - [`batch_queue`]: per-receiver queue and delivery worker
//! - [`receiver`]: threshold, pause and lifecycle of one stream
//! - [`sources`]: TCP, UDP, file and database transports
//!
//! ```text
//!   bytes ──> StreamDecoder ─┐
//!                            ├──> Receiver::append ──> BatchQueue ──> listeners
//!   rows  ──> PollJob ───────┘
//! ```

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![allow(clippy::missing_errors_doc)]

pub mod batch_queue;
pub mod config;
pub mod decoder;
pub mod errors;
pub mod event;
pub mod level;
pub mod poll_job;
pub mod receiver;
pub mod sources;

pub use batch_queue::{BatchListener, OverflowPolicy, QueueConfig};
pub use decoder::{Dialect, StreamDecoder};
pub use event::{LocationInfo, LogEvent};
pub use level::Level;
pub use receiver::{EventSink, Receiver, ReceiverConfig};
