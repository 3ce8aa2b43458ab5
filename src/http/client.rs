//! HTTP page fetcher
//!
//! Issues exactly one request per call and classifies the outcome:
//! - 2xx with a decodable body becomes a [`PageResult`]
//! - 429, 5xx and transport failures are transient
//! - 401/403, 402, 404, other 4xx and undecodable bodies are fatal
//!
//! Retrying and pacing are layered on top by the retry controller.

use crate::decode::{PageDecoder, PageResult, RecordMapper};
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Longest error body kept in a [`FetchError`]
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Source of pages for one upstream API
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the page that starts at `cursor` (`None` for the first page)
    async fn fetch_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<PageResult, FetchError>;
}

// ============================================================================
// Credentials
// ============================================================================

/// How the token is placed in the auth header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Bearer <token>`
    #[default]
    Bearer,
    /// The token verbatim
    Raw,
}

/// Credentials supplied by the caller's config collaborator
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Header carrying the token
    pub header: String,
    /// Value format
    pub scheme: AuthScheme,
    /// Secret token
    pub token: String,
}

impl Credentials {
    /// `Authorization: Bearer <token>`
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            header: "Authorization".to_string(),
            scheme: AuthScheme::Bearer,
            token: token.into(),
        }
    }

    /// `<header>: <token>`
    pub fn raw(header: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            scheme: AuthScheme::Raw,
            token: token.into(),
        }
    }

    /// Rendered header value
    pub fn header_value(&self) -> String {
        match self.scheme {
            AuthScheme::Bearer => format!("Bearer {}", self.token),
            AuthScheme::Raw => self.token.clone(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("header", &self.header)
            .field("scheme", &self.scheme)
            .field("token", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Client Config
// ============================================================================

/// Configuration for the HTTP page fetcher
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the upstream API
    pub base_url: String,
    /// Item listing path; `{id}` is replaced by the collection id
    pub path_template: String,
    /// Query parameter carrying the cursor
    pub cursor_param: String,
    /// Optional page size query parameter
    pub page_size_param: Option<String>,
    /// Page size value
    pub page_size: Option<u32>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Auth header
    pub credentials: Option<Credentials>,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path_template: "/collection/{id}/items".to_string(),
            cursor_param: "after".to_string(),
            page_size_param: None,
            page_size: None,
            timeout: Duration::from_secs(30),
            credentials: None,
            default_headers: HashMap::new(),
            user_agent: format!("cursor-harvest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the listing path template
    pub fn path_template(mut self, template: impl Into<String>) -> Self {
        self.config.path_template = template.into();
        self
    }

    /// Set the cursor query parameter
    pub fn cursor_param(mut self, param: impl Into<String>) -> Self {
        self.config.cursor_param = param.into();
        self
    }

    /// Request a page size on every call
    pub fn page_size(mut self, param: impl Into<String>, size: u32) -> Self {
        self.config.page_size_param = Some(param.into());
        self.config.page_size = Some(size);
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set credentials
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

// ============================================================================
// HTTP Page Fetcher
// ============================================================================

/// Page fetcher backed by reqwest
pub struct HttpPageFetcher {
    client: Client,
    config: HttpClientConfig,
    base_url: Url,
    decoder: PageDecoder,
    mapper: RecordMapper,
}

impl HttpPageFetcher {
    /// Create a fetcher for the given upstream
    pub fn new(config: HttpClientConfig, decoder: PageDecoder, mapper: RecordMapper) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
            decoder,
            mapper,
        })
    }

    /// Get the client config
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// URL of the page starting at `cursor`
    pub fn page_url(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<Url, FetchError> {
        if collection_id.is_empty() || collection_id.contains(['/', '?', '#']) {
            return Err(FetchError::InvalidRequest {
                reason: format!("collection id '{collection_id}' cannot be used in a URL path"),
            });
        }

        let path = self.config.path_template.replace("{id}", collection_id);
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}")).map_err(|e| {
            FetchError::InvalidRequest {
                reason: format!("invalid page URL: {e}"),
            }
        })?;

        {
            let mut query = url.query_pairs_mut();
            if let (Some(param), Some(size)) = (&self.config.page_size_param, self.config.page_size)
            {
                query.append_pair(param, &size.to_string());
            }
            if let Some(cursor) = cursor {
                query.append_pair(&self.config.cursor_param, cursor);
            }
        }
        // An empty query_pairs_mut() still leaves a dangling '?'
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> std::result::Result<PageResult, FetchError> {
        let url = self.page_url(collection_id, cursor)?;
        debug!(collection_id, cursor, %url, "Fetching page");

        let mut req = self.client.get(url.clone());
        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(credentials) = &self.config.credentials {
            req = req.header(credentials.header.as_str(), credentials.header_value());
        }

        let response = req.send().await.map_err(|e| classify_transport_error(&e))?;
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| FetchError::network(format!("failed to read response body: {e}")))?;
            let page = self.decoder.decode(collection_id, &body, &self.mapper)?;
            debug!(
                collection_id,
                records = page.len(),
                has_more = page.has_more(),
                "Page decoded"
            );
            return Ok(page);
        }

        let retry_after = extract_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, url.as_str(), &body, retry_after))
    }
}

impl std::fmt::Debug for HttpPageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPageFetcher")
            .field("config", &self.config)
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Classify a non-2xx response
pub(crate) fn classify_status(
    status: StatusCode,
    url: &str,
    body: &str,
    retry_after: Option<Duration>,
) -> FetchError {
    let body = truncate_body(body);
    match status.as_u16() {
        401 | 403 => FetchError::FatalAuth {
            status: status.as_u16(),
            body,
        },
        402 => FetchError::FatalPaymentRequired { body },
        404 => FetchError::FatalNotFound {
            url: url.to_string(),
        },
        429 => FetchError::TransientRateLimited { retry_after },
        s if status.is_server_error() => FetchError::TransientServer { status: s },
        s => FetchError::FatalClient { status: s, body },
    }
}

/// Classify a failure to get any response at all
fn classify_transport_error(e: &reqwest::Error) -> FetchError {
    if e.is_builder() {
        FetchError::InvalidRequest {
            reason: e.to_string(),
        }
    } else if e.is_timeout() {
        FetchError::network(format!("request timed out: {e}"))
    } else if e.is_connect() {
        FetchError::network(format!("connection failed: {e}"))
    } else {
        FetchError::network(e.to_string())
    }
}

/// Parse a `Retry-After` header: delta-seconds or an HTTP-date
pub(crate) fn extract_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Some(wait)
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        truncated.push('…');
        truncated
    }
}
