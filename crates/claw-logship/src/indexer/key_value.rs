//! Redis backend: appends each payload to a list with `RPUSH`.

use std::fmt;
use std::time::Duration;

use redis::{Client, Connection, RedisError};
use tracing::debug;

use crate::error::{Result, ShipError};
use crate::indexer::Indexer;
use crate::payload::LogPayload;
use crate::types::{IndexerKind, KeyValueConfig, NetworkSettings};

const KIND: IndexerKind = IndexerKind::KeyValue;

/// Pushes payloads onto a Redis list.
pub struct KeyValueIndexer {
    host: String,
    port: u16,
    key: String,
    client: Client,
    timeout: Duration,
    connection: Option<Connection>,
}

impl KeyValueIndexer {
    /// Validates `config`. The server is contacted on first push.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host or key is blank, the port is
    /// zero, or the connection URL is rejected.
    pub fn new(config: &KeyValueConfig, network: &NetworkSettings) -> Result<Self> {
        let client = Client::open(config.redis_url()?.as_str())
            .map_err(|e| ShipError::config(format!("invalid redis address: {e}")))?;

        Ok(Self {
            host: config.host.trim().to_string(),
            port: config.port,
            key: config.key.clone(),
            client,
            timeout: network.timeout(),
            connection: None,
        })
    }

    /// Returns the list key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true while a server connection is cached.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn connect(&self) -> Result<Connection> {
        let connection = self
            .client
            .get_connection_with_timeout(self.timeout)
            .map_err(classify)?;
        connection
            .set_read_timeout(Some(self.timeout))
            .map_err(classify)?;
        connection
            .set_write_timeout(Some(self.timeout))
            .map_err(classify)?;
        Ok(connection)
    }

    fn rpush(&mut self, body: &str) -> Result<i64> {
        if self.connection.is_none() {
            self.connection = Some(self.connect()?);
        }
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| ShipError::transport(KIND, "no redis connection"))?;
        redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(body)
            .query::<i64>(connection)
            .map_err(classify)
    }
}

fn classify(err: RedisError) -> ShipError {
    if err.is_timeout() {
        ShipError::timeout(KIND, err.to_string())
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        ShipError::transport(KIND, err.to_string())
    } else {
        ShipError::protocol(KIND, err.to_string())
    }
}

impl Indexer for KeyValueIndexer {
    fn kind(&self) -> IndexerKind {
        KIND
    }

    fn description(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn push(&mut self, payload: &LogPayload) -> Result<()> {
        let body = payload.to_json()?;
        match self.rpush(&body) {
            Ok(length) => {
                debug!(key = %self.key, length, "pushed payload");
                Ok(())
            }
            Err(e) => {
                self.connection = None;
                Err(e)
            }
        }
    }
}

impl fmt::Debug for KeyValueIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueIndexer")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("key", &self.key)
            .field("connected", &self.connection.is_some())
            .finish_non_exhaustive()
    }
}
