//! The JSON document shipped for each batch of log lines.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::BuildIdentity;

/// Value of the `source` field on every payload.
pub const PAYLOAD_SOURCE: &str = "build-system";

/// Schema version written to `@version`.
pub const SCHEMA_VERSION: u32 = 1;

/// `strftime` pattern for payload timestamps, e.g. `2024-05-01T12:00:00.000+0000`.
///
/// Fixed width at millisecond precision, so lexicographic order equals
/// chronological order for equal offsets.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Formats a timestamp the way payloads carry it.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

static LOCAL_SENDER: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "?".to_string())
});

/// Returns this process's host name, resolved once and cached.
///
/// Falls back to `"?"` when the name cannot be determined.
#[must_use]
pub fn local_sender() -> &'static str {
    &LOCAL_SENDER
}

/// Host metadata stamped on every payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// The host that owns the build (e.g. the controller URL).
    pub source_host: String,
    /// The host that actually sends the payload.
    pub sender: String,
}

impl HostInfo {
    /// Creates host metadata from explicit values.
    #[must_use]
    pub fn new(source_host: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            source_host: source_host.into(),
            sender: sender.into(),
        }
    }

    /// Creates host metadata whose sender is this process's host name.
    #[must_use]
    pub fn local(source_host: impl Into<String>) -> Self {
        Self::new(source_host, local_sender())
    }
}

/// Build metadata nested under `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildData {
    /// Job identifier, matched by retrieval queries.
    pub job_id: String,
    /// Build number, matched by retrieval queries.
    pub build_num: u64,
    /// Build start time.
    pub timestamp: String,
}

impl From<&BuildIdentity> for BuildData {
    fn from(build: &BuildIdentity) -> Self {
        Self {
            job_id: build.job_id.clone(),
            build_num: build.build_number,
            timestamp: format_timestamp(&build.start_time()),
        }
    }
}

/// One shipped document: a batch of lines plus build and host metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    /// Build metadata.
    pub data: BuildData,
    /// The lines in this batch, in order.
    pub message: Vec<String>,
    /// Always [`PAYLOAD_SOURCE`].
    pub source: String,
    /// Host that owns the build.
    pub source_host: String,
    /// Host that sent the payload.
    pub sender: String,
    /// Build start time.
    #[serde(rename = "@buildTimestamp")]
    pub build_timestamp: String,
    /// Shipping time of this batch; retrieval sorts on it.
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    /// Always [`SCHEMA_VERSION`].
    #[serde(rename = "@version")]
    pub version: u32,
}

impl LogPayload {
    /// Builds a payload shipped at `shipped_at`.
    #[must_use]
    pub fn new(
        build: &BuildIdentity,
        lines: Vec<String>,
        host: &HostInfo,
        shipped_at: DateTime<Utc>,
    ) -> Self {
        let data = BuildData::from(build);
        Self {
            build_timestamp: data.timestamp.clone(),
            data,
            message: lines,
            source: PAYLOAD_SOURCE.to_string(),
            source_host: host.source_host.clone(),
            sender: host.sender.clone(),
            timestamp: format_timestamp(&shipped_at),
            version: SCHEMA_VERSION,
        }
    }

    /// Builds a payload shipped now.
    #[must_use]
    pub fn now(build: &BuildIdentity, lines: Vec<String>, host: &HostInfo) -> Self {
        Self::new(build, lines, host, Utc::now())
    }

    /// Serializes the payload to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
