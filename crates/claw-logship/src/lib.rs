//! # claw-logship
//!
//! Ships build console output to external log indexers.
//!
//! This crate provides:
//!
//! - [`LineFramer`] — Splits raw byte writes into lines
//! - [`Redactor`] — Masks secret values before lines leave the process
//! - [`ShippingWriter`] — Per-build writer with a one-way circuit breaker
//! - [`ConsoleTee`] — Console stream that ships everything written to it
//! - [`Backend`] — Elasticsearch, RabbitMQ, Redis and syslog indexers
//! - [`retrieve`] — Reads shipped lines back from Elasticsearch
//! - [`ShipperConfig`] — TOML configuration
//!
//! ## Example
//!
//! ```rust
//! use std::io::Write;
//! use claw_logship::{LineFramer, RedactingSink, Redactor};
//!
//! let redactor = Redactor::new(["hunter2"])?;
//! let mut framer = LineFramer::new(RedactingSink::new(redactor, Vec::<String>::new()));
//! framer.write_all(b"login with hunter2\r\npartial")?;
//!
//! let lines = framer.into_inner()?.into_inner();
//! assert_eq!(lines, vec!["login with ********", "partial"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod error;
pub mod framer;
pub mod indexer;
pub mod payload;
pub mod redact;
pub mod retrieval;
pub mod types;
pub mod writer;

// Re-export main types
pub use config::{LegacyDescriptor, LegacyIndexerType, ShipperConfig};
pub use console::{ConsoleTee, StreamKind, DEFAULT_STDERR_PREFIX};
pub use error::{ErrorClass, Result, ShipError};
pub use framer::{strip_console_notes, LineFramer, LineSink};
pub use indexer::{
    Backend, BackendFactory, FakeIndexer, FakeIndexerFactory, Indexer, IndexerFactory, Pullable,
    PushOutcome,
};
pub use payload::{local_sender, HostInfo, LogPayload};
pub use redact::{RedactingSink, Redactor, DEFAULT_MASK};
pub use retrieval::{assemble_hits, render_plain, retrieve, strip_timestamp_prefix, SearchQuery};
pub use types::{
    BuildIdentity, ElasticsearchConfig, IndexerConfig, IndexerKind, KeyValueConfig,
    MessageQueueConfig, NetworkSettings, SyslogConfig, SyslogFormat, SyslogProtocol,
};
pub use writer::{ShippingWriter, WriterSeed};
