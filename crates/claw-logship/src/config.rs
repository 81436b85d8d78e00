//! Shipper configuration.
//!
//! Configuration for log shipping, including:
//! - The indexer backend and its connection settings
//! - Network timeouts
//! - Console masking and the stderr prefix
//! - Migration of the flat legacy descriptor

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::console::{ConsoleTee, StreamKind, DEFAULT_STDERR_PREFIX};
use crate::error::{Result, ShipError};
use crate::payload::{local_sender, HostInfo};
use crate::redact::Redactor;
use crate::types::{
    redact_uri, BuildIdentity, ElasticsearchConfig, IndexerConfig, KeyValueConfig,
    MessageQueueConfig, NetworkSettings, SyslogConfig, SyslogFormat,
};
use crate::writer::ShippingWriter;

/// Main shipper configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShipperConfig {
    /// Where lines are shipped.
    pub indexer: IndexerConfig,
    /// Network settings shared by all backends.
    #[serde(default)]
    pub network: NetworkSettings,
    /// Whether the console itself shows masked lines.
    #[serde(default)]
    pub mask_console: bool,
    /// Prefix of shipped stderr lines.
    #[serde(default = "default_stderr_prefix")]
    pub stderr_prefix: String,
    /// Host that owns the builds; defaults to this host's name.
    #[serde(default)]
    pub source_host: Option<String>,
}

fn default_stderr_prefix() -> String {
    DEFAULT_STDERR_PREFIX.to_string()
}

impl ShipperConfig {
    /// Creates a configuration with defaults for everything but the indexer.
    #[must_use]
    pub fn new(indexer: IndexerConfig) -> Self {
        Self {
            indexer,
            network: NetworkSettings::default(),
            mask_console: false,
            stderr_prefix: default_stderr_prefix(),
            source_host: None,
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ShipError::config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the configuration is not.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ShipError::config(format!("invalid TOML: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration without building a backend or contacting
    /// the indexer.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.indexer.validate()?;

        if self.source_host.as_deref().is_some_and(|h| h.trim().is_empty()) {
            return Err(ShipError::config("source_host cannot be blank"));
        }

        Ok(())
    }

    /// Returns the host metadata payloads carry.
    #[must_use]
    pub fn host_info(&self) -> HostInfo {
        let source_host = self
            .source_host
            .clone()
            .unwrap_or_else(|| local_sender().to_string());
        HostInfo::local(source_host)
    }

    /// Creates a writer for one stream of `build`.
    #[must_use]
    pub fn writer(&self, build: BuildIdentity) -> ShippingWriter {
        ShippingWriter::new(build, self.indexer.clone(), self.network, self.host_info())
    }

    /// Decorates `console` so everything written to it is also shipped.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secrets cannot be compiled.
    pub fn console_tee<W, I, S>(
        &self,
        console: W,
        writer: ShippingWriter,
        stream: StreamKind,
        secrets: I,
    ) -> Result<ConsoleTee<W>>
    where
        W: Write,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let redactor = Redactor::new(secrets)?;
        Ok(ConsoleTee::new(console, writer, redactor, stream)
            .with_mask_console(self.mask_console)
            .with_stderr_prefix(self.stderr_prefix.clone()))
    }
}

/// Indexer families of the legacy descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegacyIndexerType {
    /// Redis list.
    Redis,
    /// Elasticsearch index.
    Elasticsearch,
    /// RabbitMQ queue.
    RabbitMq,
    /// Syslog collector.
    Syslog,
}

/// The flat, single-table descriptor older installations stored.
///
/// `key` meant the index for Elasticsearch, the queue for RabbitMQ and the
/// list for Redis.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDescriptor {
    /// Indexer family; nothing is migrated without it.
    #[serde(rename = "type", default)]
    pub indexer_type: Option<LegacyIndexerType>,
    /// Host, or the base URL for Elasticsearch.
    #[serde(default)]
    pub host: String,
    /// Port.
    #[serde(default)]
    pub port: u16,
    /// Index, queue or list name.
    #[serde(default)]
    pub key: Option<String>,
    /// User name.
    #[serde(default)]
    pub username: Option<String>,
    /// Password.
    #[serde(default)]
    pub password: Option<String>,
    /// `RFC3164` or `RFC5424`.
    #[serde(default)]
    pub syslog_format: Option<String>,
    /// Only `UDP` is supported.
    #[serde(default)]
    pub syslog_protocol: Option<String>,
}

impl std::fmt::Debug for LegacyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyDescriptor")
            .field("indexer_type", &self.indexer_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("key", &self.key)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("syslog_format", &self.syslog_format)
            .field("syslog_protocol", &self.syslog_protocol)
            .finish()
    }
}

impl LegacyDescriptor {
    /// Converts the descriptor to an indexer configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no type is set, the Elasticsearch host
    /// is not a URL, or the syslog protocol is not UDP.
    pub fn migrate(&self) -> Result<IndexerConfig> {
        let indexer_type = self
            .indexer_type
            .ok_or_else(|| ShipError::config("legacy descriptor has no indexer type"))?;
        info!(
            indexer_type = ?indexer_type,
            host = %redact_uri(&self.host),
            "migrating legacy indexer configuration"
        );

        let key = self.key.clone().unwrap_or_default();
        let config = match indexer_type {
            LegacyIndexerType::Redis => IndexerConfig::KeyValue(KeyValueConfig {
                host: self.host.clone(),
                port: self.port,
                key,
                password: self.password.clone(),
            }),
            LegacyIndexerType::Elasticsearch => {
                IndexerConfig::Elasticsearch(ElasticsearchConfig {
                    uri: self.elasticsearch_uri(&key)?,
                    username: self.username.clone(),
                    password: self.password.clone(),
                })
            }
            LegacyIndexerType::RabbitMq => {
                let mut mq = MessageQueueConfig::new(self.host.clone(), self.port, key);
                mq.username = self.username.clone();
                mq.password = self.password.clone();
                IndexerConfig::MessageQueue(mq)
            }
            LegacyIndexerType::Syslog => {
                if let Some(protocol) = self
                    .syslog_protocol
                    .as_deref()
                    .filter(|p| !p.eq_ignore_ascii_case("udp"))
                {
                    return Err(ShipError::config(format!(
                        "unsupported syslog protocol '{protocol}'"
                    )));
                }
                let format = match self.syslog_format.as_deref() {
                    Some(f) if f.eq_ignore_ascii_case("rfc5424") => SyslogFormat::Rfc5424,
                    _ => SyslogFormat::Rfc3164,
                };
                IndexerConfig::Syslog(SyslogConfig::new(self.host.clone(), self.port).with_format(format))
            }
        };
        Ok(config)
    }

    fn elasticsearch_uri(&self, key: &str) -> Result<String> {
        let mut uri = Url::parse(self.host.trim()).map_err(|e| {
            ShipError::config(format!(
                "cannot migrate elasticsearch host '{}': {e}",
                redact_uri(&self.host)
            ))
        })?;
        if self.port != 0 {
            uri.set_port(Some(self.port)).map_err(|()| {
                ShipError::config(format!("cannot set port on '{}'", redact_uri(&self.host)))
            })?;
        }
        uri.set_path(&format!("/{key}"));
        Ok(uri.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::types::IndexerKind;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    // ========================================================================
    // ShipperConfig
    // ========================================================================

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [indexer]
            type = "elasticsearch"
            uri = "http://localhost:9200/logstash/_doc"
        "#;

        let config = ShipperConfig::from_toml(toml).expect("should parse minimal config");

        assert_eq!(config.indexer.kind(), IndexerKind::Search);
        assert_eq!(config.network.timeout_secs, 30);
        assert!(!config.mask_console);
        assert_eq!(config.stderr_prefix, "ERROR: ");
        assert_eq!(config.source_host, None);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            mask_console = true
            stderr_prefix = "[err] "
            source_host = "https://ci.example.com/"

            [network]
            timeout_secs = 5

            [indexer]
            type = "message_queue"
            host = "mq.example.com"
            port = 5673
            queue_name = "builds"
            username = "ci"
            password = "hunter2"
            virtual_host = "logs"
        "#;

        let config = ShipperConfig::from_toml(toml).expect("should parse full config");

        assert!(config.mask_console);
        assert_eq!(config.stderr_prefix, "[err] ");
        assert_eq!(config.network.timeout_secs, 5);
        let IndexerConfig::MessageQueue(mq) = &config.indexer else {
            unreachable!("expected message queue, got {:?}", config.indexer);
        };
        assert_eq!(mq.port, 5673);
        assert_eq!(mq.queue_name, "builds");
        assert_eq!(mq.virtual_host, "logs");
        assert_eq!(config.host_info().source_host, "https://ci.example.com/");
    }

    #[test_case(r#"type = "key_value"
host = "redis.local"
key = "logstash""#, IndexerKind::KeyValue ; "key value")]
    #[test_case(r#"type = "syslog"
host = "logs.local"
message_format = "rfc5424""#, IndexerKind::Syslog ; "syslog")]
    fn parse_each_backend(indexer: &str, kind: IndexerKind) {
        let toml = format!("[indexer]\n{indexer}\n");
        let config = ShipperConfig::from_toml(&toml).expect("valid config");
        assert_eq!(config.indexer.kind(), kind);
    }

    #[test]
    fn zero_timeout_rejected() {
        let toml = r#"
            [network]
            timeout_secs = 0

            [indexer]
            type = "syslog"
            host = "logs.local"
        "#;
        let err = ShipperConfig::from_toml(toml).expect_err("zero timeout");
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn uri_without_scheme_rejected() {
        let toml = r#"
            [indexer]
            type = "elasticsearch"
            uri = "localhost:9200/logstash"
        "#;
        assert!(ShipperConfig::from_toml(toml).is_err());
    }

    #[test]
    fn unknown_indexer_type_rejected() {
        let toml = r#"
            [indexer]
            type = "carrier_pigeon"
            host = "coop"
        "#;
        let err = ShipperConfig::from_toml(toml).expect_err("unknown type");
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn validate_inside_async_context() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let toml = r#"
            [indexer]
            type = "elasticsearch"
            uri = "http://localhost:9200/logstash/_doc"
        "#;

        let parsed = runtime.block_on(async { ShipperConfig::from_toml(toml) });
        assert!(parsed.is_ok());
    }

    #[test]
    fn blank_source_host_rejected() {
        let mut config = ShipperConfig::new(IndexerConfig::Syslog(SyslogConfig::new("logs", 514)));
        config.source_host = Some("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file() {
        let toml = r#"
            [indexer]
            type = "syslog"
            host = "logs.local"
            port = 1514
        "#;

        let temp_file = create_temp_config(toml);
        let config = ShipperConfig::from_file(temp_file.path()).expect("should load from file");
        assert_eq!(
            config.indexer,
            IndexerConfig::Syslog(SyslogConfig::new("logs.local", 1514))
        );
    }

    #[test]
    fn file_not_found() {
        let err = ShipperConfig::from_file("/nonexistent/logship.toml").expect_err("missing file");
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn writer_uses_configured_source_host() {
        let mut config = ShipperConfig::new(IndexerConfig::Syslog(SyslogConfig::new("logs", 514)));
        config.source_host = Some("https://ci/".to_string());
        let writer = config.writer(BuildIdentity::new("job", 1, 0));
        assert_eq!(writer.host().source_host, "https://ci/");
        assert_eq!(writer.host().sender, local_sender());
    }

    #[test]
    fn console_tee_applies_mask_setting() {
        let mut config = ShipperConfig::new(IndexerConfig::Syslog(SyslogConfig::new("logs", 514)));
        config.mask_console = true;
        let writer = config.writer(BuildIdentity::new("job", 1, 0));
        let tee = config
            .console_tee(Vec::new(), writer, StreamKind::Stderr, ["pw"])
            .expect("tee");
        assert!(tee.masks_console());
    }

    // ========================================================================
    // LegacyDescriptor
    // ========================================================================

    fn legacy(indexer_type: LegacyIndexerType) -> LegacyDescriptor {
        LegacyDescriptor {
            indexer_type: Some(indexer_type),
            host: "mq.local".to_string(),
            port: 4000,
            key: Some("logstash".to_string()),
            username: Some("ci".to_string()),
            password: Some("pw".to_string()),
            ..LegacyDescriptor::default()
        }
    }

    #[test]
    fn migrate_elasticsearch_builds_uri() {
        let mut descriptor = legacy(LegacyIndexerType::Elasticsearch);
        descriptor.host = "http://es.local".to_string();
        descriptor.port = 9200;

        let config = descriptor.migrate().expect("migrate");
        assert_eq!(
            config,
            IndexerConfig::Elasticsearch(
                ElasticsearchConfig::new("http://es.local:9200/logstash").with_credentials("ci", "pw")
            )
        );
    }

    #[test]
    fn migrate_elasticsearch_requires_url_host() {
        let mut descriptor = legacy(LegacyIndexerType::Elasticsearch);
        descriptor.host = "es.local".to_string();
        assert!(descriptor.migrate().is_err());
    }

    #[test]
    fn migrate_rabbitmq_uses_key_as_queue() {
        let config = legacy(LegacyIndexerType::RabbitMq).migrate().expect("migrate");
        let IndexerConfig::MessageQueue(mq) = config else {
            unreachable!("expected message queue");
        };
        assert_eq!(mq.queue_name, "logstash");
        assert_eq!(mq.port, 4000);
        assert_eq!(mq.username.as_deref(), Some("ci"));
        assert_eq!(mq.virtual_host, "/");
    }

    #[test]
    fn migrate_redis() {
        let config = legacy(LegacyIndexerType::Redis).migrate().expect("migrate");
        assert_eq!(
            config,
            IndexerConfig::KeyValue(KeyValueConfig::new("mq.local", 4000, "logstash").with_password("pw"))
        );
    }

    #[test_case(None, SyslogFormat::Rfc3164 ; "missing defaults to 3164")]
    #[test_case(Some("RFC5424"), SyslogFormat::Rfc5424 ; "5424")]
    #[test_case(Some("RFC3164"), SyslogFormat::Rfc3164 ; "3164")]
    #[test_case(Some("bogus"), SyslogFormat::Rfc3164 ; "unknown defaults to 3164")]
    fn migrate_syslog_format(format: Option<&str>, expected: SyslogFormat) {
        let mut descriptor = legacy(LegacyIndexerType::Syslog);
        descriptor.syslog_format = format.map(str::to_string);
        let IndexerConfig::Syslog(syslog) = descriptor.migrate().expect("migrate") else {
            unreachable!("expected syslog");
        };
        assert_eq!(syslog.message_format, expected);
    }

    #[test]
    fn migrate_syslog_rejects_tcp() {
        let mut descriptor = legacy(LegacyIndexerType::Syslog);
        descriptor.syslog_protocol = Some("TCP".to_string());
        assert!(descriptor.migrate().is_err());
    }

    #[test]
    fn migrate_without_type_fails() {
        assert!(LegacyDescriptor::default().migrate().is_err());
    }

    #[test]
    fn legacy_descriptor_parses_upper_case_type() {
        let descriptor: LegacyDescriptor = toml::from_str(
            r#"
                type = "RABBIT_MQ"
                host = "mq"
                port = 5672
                key = "q"
            "#,
        )
        .expect("parse");
        assert_eq!(descriptor.indexer_type, Some(LegacyIndexerType::RabbitMq));
    }

    #[test]
    fn legacy_debug_hides_password() {
        let debug = format!("{:?}", legacy(LegacyIndexerType::Redis));
        assert!(!debug.contains("\"pw\""));
        assert!(debug.contains("[REDACTED]"));
    }
}
