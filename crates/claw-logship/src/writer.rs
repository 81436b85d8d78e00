//! Per-build shipping writer with a one-way circuit breaker.
//!
//! A [`ShippingWriter`] wraps lines into payloads and pushes them to the
//! configured indexer. The first failure of any kind breaks the writer for the
//! rest of the build: it is logged once and every later write is a no-op.
//! Shipping never fails the caller.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Result, ShipError};
use crate::framer::LineSink;
use crate::indexer::{BackendFactory, Indexer, IndexerFactory};
use crate::payload::{HostInfo, LogPayload};
use crate::types::{BuildIdentity, IndexerConfig, NetworkSettings};

/// The state a writer needs to be rebuilt in another process.
///
/// Carries configuration only; connections are reopened on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterSeed {
    /// The build being shipped.
    pub build: BuildIdentity,
    /// Where lines go.
    pub indexer: IndexerConfig,
    /// Network behaviour.
    #[serde(default)]
    pub network: NetworkSettings,
    /// Host that owns the build.
    pub source_host: String,
}

/// Ships one build stream's lines to an indexer.
#[derive(Debug)]
pub struct ShippingWriter {
    build: BuildIdentity,
    config: IndexerConfig,
    network: NetworkSettings,
    host: HostInfo,
    factory: Arc<dyn IndexerFactory>,
    indexer: Option<Box<dyn Indexer>>,
    connection_broken: bool,
}

impl ShippingWriter {
    /// Creates a writer. Nothing is contacted until the first non-empty write.
    #[must_use]
    pub fn new(
        build: BuildIdentity,
        config: IndexerConfig,
        network: NetworkSettings,
        host: HostInfo,
    ) -> Self {
        Self {
            build,
            config,
            network,
            host,
            factory: Arc::new(BackendFactory::new(network)),
            indexer: None,
            connection_broken: false,
        }
    }

    /// Rebuilds a writer from a seed; the sender is this process's host name.
    #[must_use]
    pub fn from_seed(seed: WriterSeed) -> Self {
        let host = HostInfo::local(seed.source_host);
        Self::new(seed.build, seed.indexer, seed.network, host)
    }

    /// Uses `factory` instead of the real backends.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn IndexerFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Returns the state needed to rebuild this writer elsewhere.
    #[must_use]
    pub fn seed(&self) -> WriterSeed {
        WriterSeed {
            build: self.build.clone(),
            indexer: self.config.clone(),
            network: self.network,
            source_host: self.host.source_host.clone(),
        }
    }

    /// Returns the build this writer ships.
    #[must_use]
    pub const fn build(&self) -> &BuildIdentity {
        &self.build
    }

    /// Returns the host metadata stamped on payloads.
    #[must_use]
    pub const fn host(&self) -> &HostInfo {
        &self.host
    }

    /// Returns true once a shipping failure has disabled this writer.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.connection_broken
    }

    /// Ships one line. Empty lines are dropped.
    pub fn write(&mut self, line: &str) {
        if line.is_empty() || self.connection_broken {
            return;
        }
        self.write_batch([line]);
    }

    /// Ships `lines` as one payload. An empty batch is dropped.
    pub fn write_batch<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.connection_broken {
            return;
        }
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            return;
        }

        if let Err(err) = self.ship(lines) {
            self.break_connection(&err);
        }
    }

    fn ship(&mut self, lines: Vec<String>) -> Result<()> {
        if self.indexer.is_none() {
            let indexer = self.factory.create(&self.config)?;
            debug!(
                build = %self.build,
                backend = %indexer.kind(),
                target = %indexer.description(),
                "opened log indexer"
            );
            self.indexer = Some(indexer);
        }
        let indexer = self
            .indexer
            .as_mut()
            .ok_or_else(|| ShipError::config("log indexer unavailable"))?;

        let payload = LogPayload::now(&self.build, lines, &self.host);
        indexer.push(&payload)?;
        trace!(build = %self.build, lines = payload.message.len(), "shipped batch");
        Ok(())
    }

    fn break_connection(&mut self, err: &ShipError) {
        self.connection_broken = true;
        let target = self
            .indexer
            .take()
            .map_or_else(|| self.config.target(), |indexer| indexer.description());
        warn!(
            build = %self.build,
            backend = %self.config.kind(),
            target = %target,
            error = %err,
            "log shipping failed; no further lines will be shipped for this build"
        );
    }
}

impl LineSink for ShippingWriter {
    fn accept_line(&mut self, line: &str) -> io::Result<()> {
        self.write(line);
        Ok(())
    }
}
