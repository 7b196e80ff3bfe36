//! Configuration types and builders for sqlite-supasync.

use crate::error::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Environment variable holding the Supabase project URL.
pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
/// Environment variable holding the Supabase API key.
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_KEY";
/// Environment variable overriding the SQLite database path.
pub const ENV_SQLITE_PATH: &str = "SQLITE_PATH";
/// Environment variable overriding the table name (source and target).
pub const ENV_SYNC_TABLE: &str = "SYNC_TABLE";
/// Environment variable overriding the batch size.
pub const ENV_SYNC_BATCH_SIZE: &str = "SYNC_BATCH_SIZE";

/// Sample configuration written by `sqlite-supasync init`.
pub const SAMPLE_CONFIG: &str = r#"# SQLite SupaSync configuration

[source]
path = "IMDB_Movies_2021.db"
table = "REVIEWS"

[supabase]
url = "https://your-project.supabase.co"
key = "your_service_role_key"
table = "REVIEWS"
primary_key = "ID"
page_size = 1000
timeout_secs = 30

[sync]
batch_size = 100
# "proceed" inserts everything when existing keys cannot be read, "abort" stops
on_dedup_failure = "proceed"
dry_run = false

[retry]
max_retries = 5
initial_backoff_ms = 1000
max_backoff_ms = 60000
multiplier = 2.0
jitter = true

[logging]
level = "info"
format = "text"
timestamps = true
"#;

/// Main configuration for the sync client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// SQLite source configuration
    #[validate(nested)]
    #[serde(default)]
    pub source: SourceConfig,

    /// Supabase sink configuration
    #[validate(nested)]
    pub supabase: SupabaseConfig,

    /// Sync behavior configuration
    #[validate(nested)]
    #[serde(default)]
    pub sync: SyncBehaviorConfig,

    /// Retry configuration
    #[validate(nested)]
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// `from_env` is this with `std::env::var`; tests pass a map instead.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_SUPABASE_URL)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config(format!("{} not set", ENV_SUPABASE_URL)))?;

        let key = lookup(ENV_SUPABASE_KEY)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config(format!("{} not set", ENV_SUPABASE_KEY)))?;

        let mut builder = Self::builder().supabase_url(url).supabase_key(key);

        if let Some(path) = lookup(ENV_SQLITE_PATH) {
            builder = builder.source_path(path);
        }

        if let Some(table) = lookup(ENV_SYNC_TABLE) {
            builder = builder.table(table);
        }

        if let Some(size) = lookup(ENV_SYNC_BATCH_SIZE) {
            let size: usize = size
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer", ENV_SYNC_BATCH_SIZE))?;
            builder = builder.batch_size(size);
        }

        builder.build()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path, e)))?;

        Self::from_toml(&content)
            .map_err(|e| Error::config(format!("Failed to load {}: {}", path, e)))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("Invalid TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::validation(format!("Config validation failed: {}", e)))
    }
}

/// SQLite source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_source_path")]
    pub path: PathBuf,

    /// Table to read rows from
    #[validate(length(min = 1, max = 128))]
    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: default_source_path(),
            table: default_table(),
        }
    }
}

/// Supabase sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    #[validate(url)]
    pub url: String,

    /// API key (anon or service role)
    #[validate(length(min = 1))]
    #[serde(skip_serializing)]
    pub key: String,

    /// Target table
    #[validate(length(min = 1, max = 128))]
    #[serde(default = "default_table")]
    pub table: String,

    /// Primary key column, used for dedup
    #[validate(length(min = 1, max = 128))]
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Rows per page when listing existing keys
    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Request timeout in seconds
    #[validate(range(min = 1))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key: String::new(),
            table: default_table(),
            primary_key: default_primary_key(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SupabaseConfig {
    /// Get request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What the driver does when the existing-key fetch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupFailurePolicy {
    /// Continue with an empty key set and insert with duplicates ignored
    #[default]
    Proceed,
    /// Fail the run
    Abort,
}

impl std::fmt::Display for DedupFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupFailurePolicy::Proceed => write!(f, "proceed"),
            DedupFailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncBehaviorConfig {
    /// Records per insert batch
    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Policy when existing keys cannot be fetched
    #[serde(default)]
    pub on_dedup_failure: DedupFailurePolicy,

    /// Read and filter but never insert
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for SyncBehaviorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            on_dedup_failure: DedupFailurePolicy::default(),
            dry_run: false,
        }
    }
}

/// Retry configuration for batch inserts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Max retry attempts after the first failure
    #[validate(range(min = 0, max = 20))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Max backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    #[validate(range(min = 1.0, max = 10.0))]
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Add jitter
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Get initial backoff duration.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Get max backoff duration.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            timestamps: true,
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Builder for SyncConfig.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    source_path: Option<PathBuf>,
    source_table: Option<String>,
    supabase_url: Option<String>,
    supabase_key: Option<String>,
    target_table: Option<String>,
    primary_key: Option<String>,
    page_size: Option<usize>,
    batch_size: Option<usize>,
    on_dedup_failure: Option<DedupFailurePolicy>,
    dry_run: bool,
    retry: Option<RetryConfig>,
    log_level: Option<String>,
}

impl SyncConfigBuilder {
    /// Set SQLite database path.
    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Set SQLite table name.
    pub fn source_table(mut self, table: impl Into<String>) -> Self {
        self.source_table = Some(table.into());
        self
    }

    /// Set Supabase project URL.
    pub fn supabase_url(mut self, url: impl Into<String>) -> Self {
        self.supabase_url = Some(url.into());
        self
    }

    /// Set Supabase API key.
    pub fn supabase_key(mut self, key: impl Into<String>) -> Self {
        self.supabase_key = Some(key.into());
        self
    }

    /// Set Supabase table name.
    pub fn target_table(mut self, table: impl Into<String>) -> Self {
        self.target_table = Some(table.into());
        self
    }

    /// Set the same table name on both sides.
    pub fn table(self, table: impl Into<String>) -> Self {
        let table = table.into();
        self.source_table(table.clone()).target_table(table)
    }

    /// Set primary key column.
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Set page size for key listing.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Set batch size for inserts.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set dedup failure policy.
    pub fn on_dedup_failure(mut self, policy: DedupFailurePolicy) -> Self {
        self.on_dedup_failure = Some(policy);
        self
    }

    /// Enable dry run.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Build the SyncConfig.
    pub fn build(self) -> Result<SyncConfig> {
        let url = self
            .supabase_url
            .ok_or_else(|| Error::config("supabase_url required"))?;
        Url::parse(&url).map_err(|e| Error::config(format!("Invalid Supabase URL: {}", e)))?;

        let key = self
            .supabase_key
            .ok_or_else(|| Error::config("supabase_key required"))?;

        let config = SyncConfig {
            source: SourceConfig {
                path: self.source_path.unwrap_or_else(default_source_path),
                table: self.source_table.unwrap_or_else(default_table),
            },
            supabase: SupabaseConfig {
                url,
                key,
                table: self.target_table.unwrap_or_else(default_table),
                primary_key: self.primary_key.unwrap_or_else(default_primary_key),
                page_size: self.page_size.unwrap_or_else(default_page_size),
                ..Default::default()
            },
            sync: SyncBehaviorConfig {
                batch_size: self.batch_size.unwrap_or_else(default_batch_size),
                on_dedup_failure: self.on_dedup_failure.unwrap_or_default(),
                dry_run: self.dry_run,
            },
            retry: self.retry.unwrap_or_default(),
            logging: LoggingConfig {
                level: self.log_level.unwrap_or_else(default_log_level),
                ..Default::default()
            },
        };

        config.validate()?;
        Ok(config)
    }
}

// Defaults
fn default_source_path() -> PathBuf {
    PathBuf::from("IMDB_Movies_2021.db")
}
fn default_table() -> String {
    "REVIEWS".into()
}
fn default_primary_key() -> String {
    "ID".into()
}
fn default_page_size() -> usize {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    60000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_sample_config_parses() {
        let config = SyncConfig::from_toml(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.source.table, "REVIEWS");
        assert_eq!(config.supabase.primary_key, "ID");
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_config_builder() {
        let config = SyncConfig::builder()
            .supabase_url("https://example.supabase.co")
            .supabase_key("test_key")
            .source_path("reviews.db")
            .batch_size(500)
            .build()
            .unwrap();

        assert_eq!(config.source.path, PathBuf::from("reviews.db"));
        assert_eq!(config.source.table, "REVIEWS");
        assert_eq!(config.supabase.table, "REVIEWS");
        assert_eq!(config.supabase.primary_key, "ID");
        assert_eq!(config.sync.batch_size, 500);
        assert_eq!(config.sync.on_dedup_failure, DedupFailurePolicy::Proceed);
    }

    #[test]
    fn test_defaults_match_observed_tool() {
        let config = SyncConfig::builder()
            .supabase_url("https://example.supabase.co")
            .supabase_key("k")
            .build()
            .unwrap();

        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.retry.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.source.path, PathBuf::from("IMDB_Movies_2021.db"));
    }

    #[test]
    fn test_builder_requires_credentials() {
        let err = SyncConfig::builder()
            .supabase_url("https://example.supabase.co")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = SyncConfig::builder()
            .supabase_url("not a url")
            .supabase_key("k")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = SyncConfig::builder()
            .supabase_url("https://example.supabase.co")
            .supabase_key("k")
            .batch_size(0)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_from_lookup_missing_url() {
        let err = SyncConfig::from_lookup(lookup_from(&[("SUPABASE_KEY", "k")])).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[test]
    fn test_from_lookup_missing_key() {
        let err = SyncConfig::from_lookup(lookup_from(&[(
            "SUPABASE_URL",
            "https://example.supabase.co",
        )]))
        .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_KEY"));
    }

    #[test]
    fn test_from_lookup_empty_key_is_missing() {
        let err = SyncConfig::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "https://example.supabase.co"),
            ("SUPABASE_KEY", ""),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_KEY"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "https://example.supabase.co"),
            ("SUPABASE_KEY", "secret"),
            ("SQLITE_PATH", "/data/movies.db"),
            ("SYNC_TABLE", "RATINGS"),
            ("SYNC_BATCH_SIZE", "250"),
        ]))
        .unwrap();

        assert_eq!(config.source.path, PathBuf::from("/data/movies.db"));
        assert_eq!(config.source.table, "RATINGS");
        assert_eq!(config.supabase.table, "RATINGS");
        assert_eq!(config.sync.batch_size, 250);
    }

    #[test]
    fn test_from_lookup_bad_batch_size() {
        let err = SyncConfig::from_lookup(lookup_from(&[
            ("SUPABASE_URL", "https://example.supabase.co"),
            ("SUPABASE_KEY", "secret"),
            ("SYNC_BATCH_SIZE", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SYNC_BATCH_SIZE"));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [source]
            path = "reviews.db"

            [supabase]
            url = "https://example.supabase.co"
            key = "secret"

            [sync]
            batch_size = 50
            on_dedup_failure = "abort"

            [retry]
            max_retries = 2
            jitter = false
        "#;

        let config = SyncConfig::from_toml(toml).unwrap();
        assert_eq!(config.source.path, PathBuf::from("reviews.db"));
        assert_eq!(config.source.table, "REVIEWS");
        assert_eq!(config.supabase.page_size, 1000);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.on_dedup_failure, DedupFailurePolicy::Abort);
        assert_eq!(config.retry.max_retries, 2);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.initial_backoff_ms, 1000);
    }

    #[test]
    fn test_from_toml_invalid_url() {
        let toml = r#"
            [supabase]
            url = "nope"
            key = "secret"
        "#;

        let err = SyncConfig::from_toml(toml).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_key_not_serialized() {
        let config = SyncConfig::builder()
            .supabase_url("https://example.supabase.co")
            .supabase_key("super-secret")
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
