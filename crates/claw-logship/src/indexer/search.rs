//! Elasticsearch backend: HTTP document push and query-based pull.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use crate::error::{Result, ShipError};
use crate::indexer::{Indexer, Pullable};
use crate::payload::LogPayload;
use crate::retrieval::{assemble_hits, SearchQuery};
use crate::types::{
    url_without_credentials, BuildIdentity, ElasticsearchConfig, IndexerKind, NetworkSettings,
};

/// Ships payloads as documents to an Elasticsearch index.
pub struct SearchIndexer {
    client: Client,
    uri: Url,
    search_uri: Url,
    auth: Option<String>,
}

impl SearchIndexer {
    /// Validates `config` and prepares the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URI does not parse, has no
    /// `http`/`https` scheme, no host, or no index path segment.
    pub fn new(config: &ElasticsearchConfig, network: &NetworkSettings) -> Result<Self> {
        let (uri, index) = config.endpoint()?;

        let mut search_uri = uri.clone();
        search_uri.set_path(&format!("/{index}/_search"));
        search_uri.set_query(None);

        let auth = config
            .username
            .as_deref()
            .filter(|user| !user.trim().is_empty())
            .map(|user| {
                let password = config.password.as_deref().unwrap_or_default();
                format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
            });

        let client = Client::builder()
            .timeout(network.timeout())
            .connect_timeout(network.timeout())
            .no_proxy()
            .build()
            .map_err(|e| ShipError::config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            uri,
            search_uri,
            auth,
        })
    }

    /// Returns the document endpoint.
    #[must_use]
    pub const fn uri(&self) -> &Url {
        &self.uri
    }

    /// Returns the search endpoint used for pulls.
    #[must_use]
    pub const fn search_uri(&self) -> &Url {
        &self.search_uri
    }

    /// Returns true if requests carry a basic-auth header.
    #[must_use]
    pub const fn has_auth(&self) -> bool {
        self.auth.is_some()
    }

    fn post_json(&self, target: &Url, body: String) -> RequestBuilder {
        let request = self
            .client
            .post(target.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        match &self.auth {
            Some(auth) => request.header(AUTHORIZATION, auth),
            None => request,
        }
    }

    fn send(request: RequestBuilder, target: &Url) -> Result<Response> {
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                ShipError::timeout(IndexerKind::Search, e.to_string())
            } else {
                ShipError::transport(IndexerKind::Search, e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(ShipError::HttpStatus {
            status: status.as_u16(),
            uri: url_without_credentials(target),
            body,
        })
    }
}

impl fmt::Debug for SearchIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchIndexer")
            .field("uri", &url_without_credentials(&self.uri))
            .field("auth", &self.auth.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl Indexer for SearchIndexer {
    fn kind(&self) -> IndexerKind {
        IndexerKind::Search
    }

    fn description(&self) -> String {
        url_without_credentials(&self.uri)
    }

    fn push(&mut self, payload: &LogPayload) -> Result<()> {
        let body = payload.to_json()?;
        Self::send(self.post_json(&self.uri, body), &self.uri)?;
        Ok(())
    }
}

impl Pullable for SearchIndexer {
    fn pull(&self, build: &BuildIdentity, since_ms: i64, to_ms: i64) -> Result<Vec<String>> {
        let query = SearchQuery::for_build(build)
            .since(since_ms)
            .until(to_ms)
            .to_json()?;
        debug!(
            build = %build,
            uri = %url_without_credentials(&self.search_uri),
            "querying shipped log lines"
        );

        let response = Self::send(self.post_json(&self.search_uri, query), &self.search_uri)?;
        let text = response.text().map_err(|e| {
            ShipError::transport(IndexerKind::Search, format!("cannot read search response: {e}"))
        })?;
        let json: serde_json::Value = serde_json::from_str(&text)?;
        assemble_hits(&json)
    }
}
