//! Harvest settings
//!
//! One YAML (or JSON) file describes the upstream API, how to pace and retry it, how to
//! read its responses and where to store results. Every field has a default except
//! `api.base_url`.
//!
//! ```yaml
//! api:
//!   base_url: https://api.example.com
//!   path_template: /collection/{id}/items
//!   page_size_param: limit
//!   page_size: 100
//! auth:
//!   token_env: HARVEST_API_TOKEN
//! rate_limit:
//!   ceiling_rps: 50
//!   headroom: 0.6
//! retry:
//!   max_attempts: 5
//! response:
//!   items_path: items
//!   next_cursor_path: next_cursor
//! records:
//!   key_field: personId
//!   fields:
//!     - column: name
//!     - column: org_id
//!       path: currentOrg.orgId
//! harvest:
//!   max_pages: 10000
//!   concurrency: 4
//! storage:
//!   path: harvest.duckdb
//! ```

use crate::decode::{PageDecoder, RecordMapper};
use crate::engine::HarvestConfig;
use crate::error::{Error, Result};
use crate::http::{AuthScheme, Credentials, HttpClientConfig, RateLimiterConfig, RetryPolicy};
use crate::types::BackoffType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Top-Level Settings
// ============================================================================

/// Complete harvest settings loaded from a file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestSettings {
    /// Upstream API location and request shape
    #[serde(default)]
    pub api: ApiSettings,

    /// Credentials source
    #[serde(default)]
    pub auth: AuthSettings,

    /// Request pacing
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Retry budget and backoff
    #[serde(default)]
    pub retry: RetrySettings,

    /// Response body shape
    #[serde(default)]
    pub response: PageDecoder,

    /// Natural key and extracted columns
    #[serde(default)]
    pub records: RecordMapper,

    /// Driver limits
    #[serde(default)]
    pub harvest: HarvestSettingsSection,

    /// Storage location
    #[serde(default)]
    pub storage: StorageSettings,
}

// ============================================================================
// Sections
// ============================================================================

/// Upstream API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL for API requests
    #[serde(default)]
    pub base_url: String,

    /// Listing path; `{id}` is replaced by the collection id
    #[serde(default = "default_path_template")]
    pub path_template: String,

    /// Query parameter carrying the cursor
    #[serde(default = "default_cursor_param")]
    pub cursor_param: String,

    /// Optional page size query parameter
    #[serde(default)]
    pub page_size_param: Option<String>,

    /// Page size value sent with `page_size_param`
    #[serde(default)]
    pub page_size: Option<u32>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// User agent override
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path_template: default_path_template(),
            cursor_param: default_cursor_param(),
            page_size_param: None,
            page_size: None,
            timeout_secs: default_timeout(),
            user_agent: None,
            headers: HashMap::new(),
        }
    }
}

fn default_path_template() -> String {
    "/collection/{id}/items".to_string()
}

fn default_cursor_param() -> String {
    "after".to_string()
}

fn default_timeout() -> u64 {
    30
}

/// Where the API token comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Header carrying the token
    #[serde(default = "default_auth_header")]
    pub header: String,

    /// Header value format
    #[serde(default)]
    pub scheme: AuthScheme,

    /// Inline token (prefer `token_env`)
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            header: default_auth_header(),
            scheme: AuthScheme::default(),
            token: None,
            token_env: default_token_env(),
        }
    }
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

fn default_token_env() -> String {
    "HARVEST_API_TOKEN".to_string()
}

/// Rate limiting settings
///
/// `ceiling_rps` takes precedence over `interval_ms` when both are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSettings {
    /// Minimum milliseconds between requests
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Published upstream ceiling in requests per second
    #[serde(default)]
    pub ceiling_rps: Option<u32>,

    /// Fraction of the ceiling kept in reserve
    #[serde(default = "default_headroom")]
    pub headroom: f64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            ceiling_rps: None,
            headroom: default_headroom(),
        }
    }
}

fn default_interval_ms() -> u64 {
    50
}

fn default_headroom() -> f64 {
    0.6
}

/// Retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per page, first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff growth
    #[serde(default)]
    pub backoff: BackoffType,

    /// First retry delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Cap for `Retry-After` hints in seconds
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffType::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_retry_after_secs() -> u64 {
    120
}

/// Driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSettingsSection {
    /// Page cap per collection and invocation
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Collections harvested concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for HarvestSettingsSection {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_pages() -> usize {
    10_000
}

fn default_concurrency() -> usize {
    4
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// DuckDB database file
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("harvest.duckdb")
}

// ============================================================================
// Loading
// ============================================================================

impl HarvestSettings {
    /// Load settings from a YAML or JSON file (chosen by extension)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                Error::config(format!(
                    "Failed to read settings file '{}': {e}",
                    path.display()
                ))
            }
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    /// Parse and validate YAML settings
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate JSON settings
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the settings for values the harvester cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(Error::missing_field("api.base_url"));
        }
        url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::invalid_value("api.base_url", e.to_string()))?;

        if !self.api.path_template.contains("{id}") {
            return Err(Error::invalid_value(
                "api.path_template",
                "must contain the {id} placeholder",
            ));
        }
        if self.api.page_size.is_some() != self.api.page_size_param.is_some() {
            return Err(Error::invalid_value(
                "api.page_size",
                "page_size and page_size_param must be set together",
            ));
        }
        if self.rate_limit.ceiling_rps.is_none() && self.rate_limit.interval_ms == 0 {
            return Err(Error::invalid_value(
                "rate_limit.interval_ms",
                "must be greater than zero",
            ));
        }
        if !(0.0..1.0).contains(&self.rate_limit.headroom) {
            return Err(Error::invalid_value(
                "rate_limit.headroom",
                "must be in [0, 1)",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_value(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }
        if self.harvest.max_pages == 0 {
            return Err(Error::invalid_value(
                "harvest.max_pages",
                "must be at least 1",
            ));
        }
        if self.harvest.concurrency == 0 {
            return Err(Error::invalid_value(
                "harvest.concurrency",
                "must be at least 1",
            ));
        }
        if self.records.key_field.trim().is_empty() {
            return Err(Error::missing_field("records.key_field"));
        }
        Ok(())
    }

    // ========================================================================
    // Component Configs
    // ========================================================================

    /// Resolve the API token: explicit override, then `auth.token`, then `auth.token_env`
    pub fn resolve_token(&self, token_override: Option<&str>) -> Option<String> {
        token_override
            .map(ToString::to_string)
            .or_else(|| self.auth.token.clone())
            .or_else(|| std::env::var(&self.auth.token_env).ok())
            .filter(|token| !token.trim().is_empty())
    }

    /// Credentials for the auth header, if a token is available
    pub fn credentials(&self, token_override: Option<&str>) -> Option<Credentials> {
        let token = self.resolve_token(token_override)?;
        Some(match self.auth.scheme {
            AuthScheme::Bearer => Credentials {
                header: self.auth.header.clone(),
                ..Credentials::bearer(token)
            },
            AuthScheme::Raw => Credentials::raw(self.auth.header.clone(), token),
        })
    }

    /// HTTP client configuration
    pub fn http_client_config(&self, token_override: Option<&str>) -> HttpClientConfig {
        let mut builder = HttpClientConfig::builder()
            .base_url(&self.api.base_url)
            .path_template(&self.api.path_template)
            .cursor_param(&self.api.cursor_param)
            .timeout(Duration::from_secs(self.api.timeout_secs));

        if let (Some(param), Some(size)) = (&self.api.page_size_param, self.api.page_size) {
            builder = builder.page_size(param, size);
        }
        if let Some(agent) = &self.api.user_agent {
            builder = builder.user_agent(agent);
        }
        if let Some(credentials) = self.credentials(token_override) {
            builder = builder.credentials(credentials);
        }
        for (key, value) in &self.api.headers {
            builder = builder.header(key, value);
        }
        builder.build()
    }

    /// Rate limiter configuration
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        match self.rate_limit.ceiling_rps {
            Some(ceiling) => RateLimiterConfig::from_ceiling(ceiling, self.rate_limit.headroom),
            None => RateLimiterConfig::new(Duration::from_millis(self.rate_limit.interval_ms)),
        }
    }

    /// Retry policy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.retry.max_attempts)
            .with_backoff(
                self.retry.backoff,
                Duration::from_millis(self.retry.initial_backoff_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
            )
            .with_max_retry_after(Duration::from_secs(self.retry.max_retry_after_secs))
    }

    /// Response decoder
    pub fn page_decoder(&self) -> PageDecoder {
        self.response.clone()
    }

    /// Record mapper
    pub fn record_mapper(&self) -> RecordMapper {
        self.records.clone()
    }

    /// Driver configuration
    pub fn harvest_config(&self) -> HarvestConfig {
        HarvestConfig::new()
            .with_max_pages(self.harvest.max_pages)
            .with_concurrency(self.harvest.concurrency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NextCursorFormat;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_parse_minimal_settings() {
        let settings = HarvestSettings::from_yaml_str("api:\n  base_url: https://api.example.com\n")
            .unwrap();

        assert_eq!(settings.api.path_template, "/collection/{id}/items");
        assert_eq!(settings.api.cursor_param, "after");
        assert_eq!(settings.auth.token_env, "HARVEST_API_TOKEN");
        assert_eq!(settings.rate_limit.interval_ms, 50);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.response, PageDecoder::default());
        assert_eq!(settings.records.key_field, "id");
        assert_eq!(settings.harvest.max_pages, 10_000);
        assert_eq!(settings.storage.path, PathBuf::from("harvest.duckdb"));
    }

    #[test]
    fn test_parse_full_settings() {
        let yaml = r"
api:
  base_url: https://api.example.com/v2
  path_template: /orgs/{id}/people
  cursor_param: cursor
  page_size_param: limit
  page_size: 100
  timeout_secs: 10
  headers:
    Accept: application/json
auth:
  header: X-Api-Key
  scheme: raw
  token: secret
rate_limit:
  ceiling_rps: 50
  headroom: 0.6
retry:
  max_attempts: 3
  backoff: linear
  initial_backoff_ms: 100
  max_backoff_ms: 1000
  max_retry_after_secs: 30
response:
  items_path: data.people
  next_cursor_path: links.next
  next_cursor_format: link
  cursor_param: cursor
records:
  key_field: personId
  fields:
    - column: name
    - column: org_id
      path: currentOrg.orgId
harvest:
  max_pages: 50
  concurrency: 2
storage:
  path: /tmp/people.duckdb
";
        let settings = HarvestSettings::from_yaml_str(yaml).unwrap();

        let http = settings.http_client_config(None);
        assert_eq!(http.base_url, "https://api.example.com/v2");
        assert_eq!(http.path_template, "/orgs/{id}/people");
        assert_eq!(http.cursor_param, "cursor");
        assert_eq!(http.page_size_param.as_deref(), Some("limit"));
        assert_eq!(http.page_size, Some(100));
        assert_eq!(http.timeout, Duration::from_secs(10));
        assert_eq!(
            http.default_headers.get("Accept").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(
            http.credentials,
            Some(Credentials::raw("X-Api-Key", "secret"))
        );

        let millis = settings.rate_limiter_config().interval.as_secs_f64() * 1000.0;
        assert!((millis - 50.0).abs() < 0.5, "got {millis}ms");

        let policy = settings.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_type, BackoffType::Linear);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_retry_after, Duration::from_secs(30));

        let decoder = settings.page_decoder();
        assert_eq!(decoder.items_path, "data.people");
        assert_eq!(decoder.next_cursor_format, NextCursorFormat::Link);

        let mapper = settings.record_mapper();
        assert_eq!(mapper.key_field, "personId");
        assert_eq!(mapper.fields.len(), 2);

        let harvest = settings.harvest_config();
        assert_eq!(harvest.max_pages, 50);
        assert_eq!(harvest.concurrency, 2);
    }

    #[test]
    fn test_missing_base_url() {
        let err = HarvestSettings::from_yaml_str("harvest:\n  max_pages: 5\n").unwrap_err();
        assert!(matches!(err, Error::MissingConfigField { ref field } if field == "api.base_url"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            "api:\n  base_url: not a url\n",
            "api:\n  base_url: https://x\n  path_template: /items\n",
            "api:\n  base_url: https://x\n  page_size: 10\n",
            "api:\n  base_url: https://x\nretry:\n  max_attempts: 0\n",
            "api:\n  base_url: https://x\nharvest:\n  max_pages: 0\n",
            "api:\n  base_url: https://x\nrate_limit:\n  interval_ms: 0\n",
        ];
        for yaml in cases {
            assert!(
                HarvestSettings::from_yaml_str(yaml).is_err(),
                "accepted: {yaml}"
            );
        }
    }

    #[test]
    fn test_unknown_section_rejected() {
        let err = HarvestSettings::from_yaml_str("api:\n  base_url: https://x\nstreams: []\n");
        assert!(matches!(err, Err(Error::YamlParse(_))));
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"api": {{"base_url": "https://api.example.com"}}, "harvest": {{"concurrency": 8}}}}"#
        )
        .unwrap();

        let settings = HarvestSettings::load(file.path()).unwrap();
        assert_eq!(settings.harvest.concurrency, 8);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "api:\n  base_url: https://api.example.com").unwrap();

        let settings = HarvestSettings::load(file.path()).unwrap();
        assert_eq!(settings.api.base_url, "https://api.example.com");
    }

    #[test]
    fn test_load_missing_file() {
        let err = HarvestSettings::load("/nonexistent/harvest.yaml").unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_token_precedence() {
        let mut settings = HarvestSettings::default();
        settings.auth.token_env = "CURSOR_HARVEST_TEST_TOKEN_PRECEDENCE".to_string();
        std::env::set_var("CURSOR_HARVEST_TEST_TOKEN_PRECEDENCE", "from-env");

        assert_eq!(settings.resolve_token(None).as_deref(), Some("from-env"));

        settings.auth.token = Some("from-file".to_string());
        assert_eq!(settings.resolve_token(None).as_deref(), Some("from-file"));
        assert_eq!(
            settings.resolve_token(Some("from-flag")).as_deref(),
            Some("from-flag")
        );

        std::env::remove_var("CURSOR_HARVEST_TEST_TOKEN_PRECEDENCE");
    }

    #[test]
    fn test_no_token_means_no_credentials() {
        let mut settings = HarvestSettings::default();
        settings.auth.token_env = "CURSOR_HARVEST_TEST_TOKEN_UNSET".to_string();
        assert!(settings.credentials(None).is_none());
        assert!(settings.http_client_config(None).credentials.is_none());
    }

    #[test]
    fn test_bearer_credentials_use_configured_header() {
        let mut settings = HarvestSettings::default();
        settings.auth.header = "X-Auth".to_string();
        let credentials = settings.credentials(Some("tok")).unwrap();
        assert_eq!(credentials.header, "X-Auth");
        assert_eq!(credentials.header_value(), "Bearer tok");
    }

    #[test]
    fn test_interval_rate_limit() {
        let mut settings = HarvestSettings::default();
        settings.rate_limit.interval_ms = 200;
        let config = settings.rate_limiter_config();
        assert_eq!(config.interval, Duration::from_millis(200));
    }

    #[test]
    fn test_ceiling_with_default_headroom() {
        let yaml = "api:\n  base_url: http://x\nrate_limit:\n  ceiling_rps: 50\n";
        let settings = HarvestSettings::from_yaml_str(yaml).unwrap();
        assert_eq!(settings.rate_limit.headroom, 0.6);
        let millis = settings.rate_limiter_config().interval.as_secs_f64() * 1000.0;
        assert!((millis - 50.0).abs() < 0.5, "got {millis}ms");
    }

    #[test]
    fn test_burst_setting_rejected() {
        let err = HarvestSettings::from_yaml_str(
            "api:\n  base_url: http://x\nrate_limit:\n  interval_ms: 50\n  burst: 3\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("burst"), "{err}");
    }
}
