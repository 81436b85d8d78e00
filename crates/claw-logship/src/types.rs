//! Core types: build identity, indexer configuration and network settings.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ShipError};

/// Identifies one build run.
///
/// Captured once when a writer is constructed and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildIdentity {
    /// Opaque, stable identifier of the job.
    pub job_id: String,
    /// Build number within the job.
    pub build_number: u64,
    /// Build start time in milliseconds since the Unix epoch.
    pub start_time_millis: i64,
}

impl BuildIdentity {
    /// Creates a new build identity.
    #[must_use]
    pub fn new(job_id: impl Into<String>, build_number: u64, start_time_millis: i64) -> Self {
        Self {
            job_id: job_id.into(),
            build_number,
            start_time_millis,
        }
    }

    /// Returns the build start time, falling back to the epoch if out of range.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.start_time_millis)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for BuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.job_id, self.build_number)
    }
}

/// The family of an indexer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerKind {
    /// HTTP document store with query support.
    Search,
    /// Publish/subscribe broker.
    MessageQueue,
    /// Key-value store list.
    KeyValue,
    /// Syslog collector.
    Syslog,
}

impl fmt::Display for IndexerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Search => write!(f, "elasticsearch"),
            Self::MessageQueue => write!(f, "rabbitmq"),
            Self::KeyValue => write!(f, "redis"),
            Self::Syslog => write!(f, "syslog"),
        }
    }
}

/// Configuration of the indexer a build's log is shipped to.
///
/// Fully determines which backend is instantiated and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexerConfig {
    /// Elasticsearch document endpoint.
    Elasticsearch(ElasticsearchConfig),
    /// RabbitMQ queue.
    MessageQueue(MessageQueueConfig),
    /// Redis list.
    KeyValue(KeyValueConfig),
    /// Syslog collector.
    Syslog(SyslogConfig),
}

impl IndexerConfig {
    /// Returns the backend family this configuration selects.
    #[must_use]
    pub const fn kind(&self) -> IndexerKind {
        match self {
            Self::Elasticsearch(_) => IndexerKind::Search,
            Self::MessageQueue(_) => IndexerKind::MessageQueue,
            Self::KeyValue(_) => IndexerKind::KeyValue,
            Self::Syslog(_) => IndexerKind::Syslog,
        }
    }

    /// Checks every field the selected backend needs, without building it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Elasticsearch(c) => c.endpoint().map(|_| ()),
            Self::MessageQueue(c) => c.amqp_uri().map(|_| ()),
            Self::KeyValue(c) => c.redis_url().map(|_| ()),
            Self::Syslog(c) => c.validate(),
        }
    }

    /// Returns the configured target for diagnostics, without credentials.
    #[must_use]
    pub fn target(&self) -> String {
        match self {
            Self::Elasticsearch(c) => redact_uri(&c.uri),
            Self::MessageQueue(c) => format!("{}:{}/{}", c.host, c.port, c.queue_name),
            Self::KeyValue(c) => format!("{}:{}/{}", c.host, c.port, c.key),
            Self::Syslog(c) => format!("{}:{}", c.host, c.port),
        }
    }
}

/// Elasticsearch connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Document endpoint, e.g. `http://localhost:9200/logstash/_doc`.
    pub uri: String,
    /// Optional basic-auth user.
    #[serde(default)]
    pub username: Option<String>,
    /// Optional basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
}

impl ElasticsearchConfig {
    /// Creates a configuration without credentials.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            username: None,
            password: None,
        }
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parses the document endpoint and returns it with the index name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URI does not parse, has no
    /// `http`/`https` scheme, no host, or no index path segment.
    pub fn endpoint(&self) -> Result<(Url, String)> {
        let uri = Url::parse(self.uri.trim()).map_err(|e| {
            ShipError::config(format!(
                "invalid elasticsearch uri '{}': {e}; host field must specify scheme, such as 'http://'",
                redact_uri(&self.uri)
            ))
        })?;

        if !matches!(uri.scheme(), "http" | "https") {
            return Err(ShipError::config(format!(
                "elasticsearch uri must use http:// or https://, got '{}'",
                uri.scheme()
            )));
        }
        if uri.host_str().is_none_or(str::is_empty) {
            return Err(ShipError::config("elasticsearch uri has no host"));
        }

        let index = uri
            .path_segments()
            .and_then(|mut segments| segments.next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ShipError::config("elastic index name is required"))?;
        Ok((uri, index))
    }
}

impl fmt::Debug for ElasticsearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchConfig")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &redacted(self.password.as_deref()))
            .finish()
    }
}

/// RabbitMQ connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQueueConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_amqp_port")]
    pub port: u16,
    /// Queue the payloads are published to.
    pub queue_name: String,
    /// Broker user.
    #[serde(default)]
    pub username: Option<String>,
    /// Broker password.
    #[serde(default)]
    pub password: Option<String>,
    /// Virtual host.
    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,
}

impl MessageQueueConfig {
    /// Creates a configuration for the given broker and queue.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, queue_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            queue_name: queue_name.into(),
            username: None,
            password: None,
            virtual_host: default_virtual_host(),
        }
    }

    /// Sets broker credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Builds the `amqp://` connection URI, credentials and vhost included.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host or queue name is blank, the
    /// port is zero, or the broker address cannot form an AMQP URI.
    pub fn amqp_uri(&self) -> Result<String> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ShipError::config("rabbitmq host is required"));
        }
        if self.port == 0 {
            return Err(ShipError::config("rabbitmq port must be greater than 0"));
        }
        if self.queue_name.trim().is_empty() {
            return Err(ShipError::config("rabbitmq queue name is required"));
        }

        let mut uri = Url::parse(&format!("amqp://{host}:{}", self.port))
            .map_err(|e| ShipError::config(format!("invalid rabbitmq host '{host}': {e}")))?;

        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            uri.set_username(user)
                .map_err(|()| ShipError::config("rabbitmq username cannot be set on this host"))?;
            uri.set_password(self.password.as_deref())
                .map_err(|()| ShipError::config("rabbitmq password cannot be set on this host"))?;
        }

        let vhost: String =
            url::form_urlencoded::byte_serialize(self.virtual_host.as_bytes()).collect();
        uri.set_path(&format!("/{vhost}"));
        Ok(uri.to_string())
    }
}

impl fmt::Debug for MessageQueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueueConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("queue_name", &self.queue_name)
            .field("username", &self.username)
            .field("password", &redacted(self.password.as_deref()))
            .field("virtual_host", &self.virtual_host)
            .finish()
    }
}

/// Redis connection settings.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    #[serde(default = "default_redis_port")]
    pub port: u16,
    /// List key the payloads are pushed onto.
    pub key: String,
    /// Optional AUTH password.
    #[serde(default)]
    pub password: Option<String>,
}

impl KeyValueConfig {
    /// Creates a configuration for the given server and list key.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            key: key.into(),
            password: None,
        }
    }

    /// Sets the AUTH password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Builds the `redis://` connection URL, AUTH password included.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host or key is blank, the port is
    /// zero, or the address cannot form a URL.
    pub fn redis_url(&self) -> Result<Url> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ShipError::config("redis host is required"));
        }
        if self.port == 0 {
            return Err(ShipError::config("redis port must be greater than 0"));
        }
        if self.key.trim().is_empty() {
            return Err(ShipError::config("redis key is required"));
        }

        let mut url = Url::parse(&format!("redis://{host}:{}/", self.port))
            .map_err(|e| ShipError::config(format!("invalid redis host '{host}': {e}")))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|()| ShipError::config("redis password cannot be set on this host"))?;
        }
        Ok(url)
    }
}

impl fmt::Debug for KeyValueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyValueConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("key", &self.key)
            .field("password", &redacted(self.password.as_deref()))
            .finish()
    }
}

/// Syslog collector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyslogConfig {
    /// Collector host.
    pub host: String,
    /// Collector port.
    #[serde(default = "default_syslog_port")]
    pub port: u16,
    /// Transport protocol.
    #[serde(default)]
    pub protocol: SyslogProtocol,
    /// Message framing.
    #[serde(default)]
    pub message_format: SyslogFormat,
}

impl SyslogConfig {
    /// Creates a UDP/RFC 3164 configuration.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: SyslogProtocol::Udp,
            message_format: SyslogFormat::Rfc3164,
        }
    }

    /// Sets the message format.
    #[must_use]
    pub const fn with_format(mut self, format: SyslogFormat) -> Self {
        self.message_format = format;
        self
    }

    /// Validates the collector address.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the host is blank or the port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ShipError::config("syslog host is required"));
        }
        if self.port == 0 {
            return Err(ShipError::config("syslog port must be greater than 0"));
        }
        Ok(())
    }
}

/// Syslog transport protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogProtocol {
    /// Datagrams over UDP.
    #[default]
    Udp,
}

/// Syslog message format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogFormat {
    /// BSD syslog.
    #[default]
    Rfc3164,
    /// Structured syslog.
    Rfc5424,
}

/// Network behaviour shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Bound on every connect, push and pull, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl NetworkSettings {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates settings with the given timeout.
    #[must_use]
    pub const fn with_timeout_secs(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    /// Returns the timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ShipError::config("network.timeout_secs must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// Renders `url` without its user name and password.
#[must_use]
pub fn url_without_credentials(url: &Url) -> String {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}

/// Renders a configured URI for diagnostics, dropping any credentials.
///
/// A URI without an authority keeps only what follows its last `@`.
#[must_use]
pub fn redact_uri(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(url) if !url.cannot_be_a_base() => url_without_credentials(&url),
        _ => raw.rsplit_once('@').map_or(raw, |(_, rest)| rest).to_string(),
    }
}

fn redacted(secret: Option<&str>) -> Option<&'static str> {
    secret.map(|_| "[REDACTED]")
}

const fn default_amqp_port() -> u16 {
    5672
}

const fn default_redis_port() -> u16 {
    6379
}

const fn default_syslog_port() -> u16 {
    514
}

const fn default_timeout_secs() -> u64 {
    NetworkSettings::DEFAULT_TIMEOUT_SECS
}

fn default_virtual_host() -> String {
    "/".to_string()
}
