//! Reading shipped lines back from the search backend.
//!
//! The store does not return documents in ingestion order. Every hit is
//! rendered as `"<timestamp> > <message>"` and the whole result is sorted;
//! the fixed-width timestamp makes lexicographic order chronological.

use std::borrow::Cow;
use std::io;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Result, ShipError};
use crate::indexer::Backend;
use crate::types::{BuildIdentity, IndexerConfig, IndexerKind, NetworkSettings};

/// Largest number of hits requested in one query.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Separator between timestamp and message in retrieved entries.
pub const ENTRY_SEPARATOR: &str = " > ";

static TIMESTAMP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}(?:[+-]\d{2}:?\d{2}|Z) > ")
        .unwrap_or_else(|_| unreachable!())
});

/// A search query selecting one build's shipped lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    job_id: String,
    build_number: u64,
    start_ms: i64,
    since_ms: Option<i64>,
    to_ms: Option<i64>,
    size: usize,
}

impl SearchQuery {
    /// Selects every line of `build` shipped since the build started.
    #[must_use]
    pub fn for_build(build: &BuildIdentity) -> Self {
        Self {
            job_id: build.job_id.clone(),
            build_number: build.build_number,
            start_ms: build.start_time_millis,
            since_ms: None,
            to_ms: None,
            size: MAX_PAGE_SIZE,
        }
    }

    /// Excludes lines shipped before `since_ms`. Never widens past the build start.
    #[must_use]
    pub const fn since(mut self, since_ms: i64) -> Self {
        self.since_ms = Some(since_ms);
        self
    }

    /// Excludes lines shipped after `to_ms`. Non-positive values and
    /// `i64::MAX` leave the range open.
    #[must_use]
    pub const fn until(mut self, to_ms: i64) -> Self {
        self.to_ms = if to_ms <= 0 || to_ms == i64::MAX {
            None
        } else {
            Some(to_ms)
        };
        self
    }

    /// Sets the page size, capped at [`MAX_PAGE_SIZE`].
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size.min(MAX_PAGE_SIZE);
        self
    }

    /// Returns the lower bound of the time range in epoch millis.
    #[must_use]
    pub fn lower_bound(&self) -> i64 {
        self.since_ms.map_or(self.start_ms, |since| since.max(self.start_ms))
    }

    /// Builds the query body.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut range = json!({
            "gte": self.lower_bound(),
            "format": "epoch_millis",
        });
        if let Some(to) = self.to_ms {
            range["lte"] = json!(to);
        }

        json!({
            "size": self.size,
            "_source": false,
            "fields": ["message", "@timestamp"],
            "query": {
                "bool": {
                    "must": [
                        { "match": { "data.jobId": self.job_id } },
                        { "match": { "data.buildNum": self.build_number } },
                    ],
                    "filter": [
                        { "range": { "@timestamp": range } },
                    ],
                },
            },
        })
    }

    /// Serializes the query body.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}

/// Converts a search response into sorted `"<timestamp> > <message>"` entries.
///
/// The lines of a multi-line batch stay together in one entry, joined by `\n`.
/// Hits without a timestamp or message are skipped.
///
/// # Errors
///
/// Returns a protocol error if the response has no `hits.hits` array.
pub fn assemble_hits(response: &Value) -> Result<Vec<String>> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            ShipError::protocol(IndexerKind::Search, "search response has no hits.hits array")
        })?;

    let mut entries: Vec<String> = hits.iter().filter_map(entry_from_hit).collect();
    let skipped = hits.len() - entries.len();
    if skipped > 0 {
        debug!(skipped, "ignored search hits without message or timestamp");
    }
    entries.sort();
    Ok(entries)
}

fn entry_from_hit(hit: &Value) -> Option<String> {
    let fields = hit.get("fields")?;
    let timestamp = fields.get("@timestamp")?.get(0)?.as_str()?;
    let message = fields
        .get("message")?
        .as_array()?
        .iter()
        .map(|m| m.as_str().map_or_else(|| m.to_string(), str::to_string))
        .collect::<Vec<_>>()
        .join("\n");
    Some(format!("{timestamp}{ENTRY_SEPARATOR}{message}"))
}

/// Retrieves the lines shipped for `build` between `since_ms` and `to_ms`.
///
/// # Errors
///
/// Every failure surfaces as one [`io::Error`]: configuration problems as
/// `InvalidInput`, push-only backends as `Unsupported`, timeouts as
/// `TimedOut`, everything else as `Other`.
pub fn retrieve(
    config: &IndexerConfig,
    network: &NetworkSettings,
    build: &BuildIdentity,
    since_ms: i64,
    to_ms: i64,
) -> io::Result<Vec<String>> {
    let backend = Backend::from_config(config, network)?;
    let lines = backend.pull(build, since_ms, to_ms)?;
    debug!(build = %build, count = lines.len(), "retrieved shipped lines");
    Ok(lines)
}

/// Removes the leading `"<timestamp> > "` of a retrieved entry.
#[must_use]
pub fn strip_timestamp_prefix(entry: &str) -> Cow<'_, str> {
    TIMESTAMP_PREFIX.replace(entry, "")
}

/// Renders retrieved entries as plain console text, one `\n`-terminated
/// line per entry.
#[must_use]
pub fn render_plain<S: AsRef<str>>(entries: &[S]) -> String {
    entries.iter().fold(String::new(), |mut out, entry| {
        out.push_str(&strip_timestamp_prefix(entry.as_ref()));
        out.push('\n');
        out
    })
}
