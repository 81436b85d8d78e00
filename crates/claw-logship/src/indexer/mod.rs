//! Indexer backends that receive shipped payloads.
//!
//! Every backend implements [`Indexer`] (push). Only the search backend
//! implements [`Pullable`]; [`Backend`] is the closed set of backends and
//! exposes pull through [`Backend::as_pullable`].

pub mod fake;
pub mod key_value;
pub mod message_queue;
pub mod search;
pub mod syslog;

use std::fmt;

use crate::error::{Result, ShipError};
use crate::payload::LogPayload;
use crate::types::{BuildIdentity, IndexerConfig, IndexerKind, NetworkSettings};

pub use fake::{FakeIndexer, FakeIndexerFactory, PushOutcome};
pub use key_value::KeyValueIndexer;
pub use message_queue::MessageQueueIndexer;
pub use search::SearchIndexer;
pub use syslog::SyslogIndexer;

/// A destination for shipped payloads.
pub trait Indexer: Send + fmt::Debug {
    /// Returns the backend family.
    fn kind(&self) -> IndexerKind;

    /// Returns a short description of the target, for diagnostics.
    fn description(&self) -> String;

    /// Sends one payload.
    ///
    /// # Errors
    ///
    /// Returns a transport, protocol or serialization error if the payload
    /// was not accepted.
    fn push(&mut self, payload: &LogPayload) -> Result<()>;
}

/// A backend that can serve shipped lines back.
pub trait Pullable {
    /// Retrieves the lines shipped for `build` between `since_ms` and `to_ms`
    /// (epoch millis), formatted `"<timestamp> > <message>"` and sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the response cannot be parsed.
    fn pull(&self, build: &BuildIdentity, since_ms: i64, to_ms: i64) -> Result<Vec<String>>;
}

/// Creates indexers from configuration.
pub trait IndexerFactory: Send + Sync + fmt::Debug {
    /// Builds the indexer `config` selects.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    fn create(&self, config: &IndexerConfig) -> Result<Box<dyn Indexer>>;
}

/// The concrete backends.
#[derive(Debug)]
pub enum Backend {
    /// Elasticsearch.
    Search(SearchIndexer),
    /// RabbitMQ.
    MessageQueue(MessageQueueIndexer),
    /// Redis.
    KeyValue(KeyValueIndexer),
    /// Syslog.
    Syslog(SyslogIndexer),
}

impl Backend {
    /// Validates `config` and builds the matching backend.
    ///
    /// No network traffic happens here; connections are opened on first use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required field is missing or invalid.
    pub fn from_config(config: &IndexerConfig, network: &NetworkSettings) -> Result<Self> {
        network.validate()?;
        Ok(match config {
            IndexerConfig::Elasticsearch(c) => Self::Search(SearchIndexer::new(c, network)?),
            IndexerConfig::MessageQueue(c) => {
                Self::MessageQueue(MessageQueueIndexer::new(c, network)?)
            }
            IndexerConfig::KeyValue(c) => Self::KeyValue(KeyValueIndexer::new(c, network)?),
            IndexerConfig::Syslog(c) => Self::Syslog(SyslogIndexer::new(c, network)?),
        })
    }

    /// Returns the pull capability, if this backend has one.
    #[must_use]
    pub fn as_pullable(&self) -> Option<&dyn Pullable> {
        match self {
            Self::Search(search) => Some(search as &dyn Pullable),
            Self::MessageQueue(_) | Self::KeyValue(_) | Self::Syslog(_) => None,
        }
    }

    /// Retrieves shipped lines.
    ///
    /// # Errors
    ///
    /// Returns [`ShipError::Unsupported`] without any network call on backends
    /// that cannot serve data back, or the search backend's query error.
    pub fn pull(&self, build: &BuildIdentity, since_ms: i64, to_ms: i64) -> Result<Vec<String>> {
        match self.as_pullable() {
            Some(pullable) => pullable.pull(build, since_ms, to_ms),
            None => Err(ShipError::Unsupported {
                backend: self.kind(),
                operation: "data read",
            }),
        }
    }

    fn inner(&self) -> &dyn Indexer {
        match self {
            Self::Search(i) => i,
            Self::MessageQueue(i) => i,
            Self::KeyValue(i) => i,
            Self::Syslog(i) => i,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Indexer {
        match self {
            Self::Search(i) => i,
            Self::MessageQueue(i) => i,
            Self::KeyValue(i) => i,
            Self::Syslog(i) => i,
        }
    }
}

impl Indexer for Backend {
    fn kind(&self) -> IndexerKind {
        self.inner().kind()
    }

    fn description(&self) -> String {
        self.inner().description()
    }

    fn push(&mut self, payload: &LogPayload) -> Result<()> {
        self.inner_mut().push(payload)
    }
}

/// Builds real backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendFactory {
    network: NetworkSettings,
}

impl BackendFactory {
    /// Creates a factory whose backends use `network`.
    #[must_use]
    pub const fn new(network: NetworkSettings) -> Self {
        Self { network }
    }

    /// Returns the network settings handed to backends.
    #[must_use]
    pub const fn network(&self) -> NetworkSettings {
        self.network
    }
}

impl IndexerFactory for BackendFactory {
    fn create(&self, config: &IndexerConfig) -> Result<Box<dyn Indexer>> {
        Ok(Box::new(Backend::from_config(config, &self.network)?))
    }
}
