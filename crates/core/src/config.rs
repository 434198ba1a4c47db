//! TOML-based configuration for space-sync.
//!
//! API tokens are stored as `_env` fields that reference environment variable
//! names. The actual tokens are resolved at runtime via
//! [`AppConfig::resolve_env_vars`]; values set directly (for example from
//! command line flags) take precedence over the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::ClientSettings;
use crate::errors::ConfigError;
use crate::push::AssetPollConfig;
use crate::rate_limit::{RequestScheduler, RetryPolicy};
use crate::sync_engine::RunOptions;
use crate::token_store::FileTokenStore;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// The space content is read from.
    #[serde(default)]
    pub source: SourceConfig,

    /// The space content is written to.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// API hosts, shared token and request budget.
    #[serde(default)]
    pub api: ApiConfig,

    /// Run behaviour.
    #[serde(default)]
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Spaces
// ---------------------------------------------------------------------------

/// Source space configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub space_id: String,

    /// Env var holding the delivery API token.
    #[serde(default)]
    pub delivery_token_env: Option<String>,

    /// Env var holding a source-only management token (overrides
    /// `api.management_token_env`).
    #[serde(default)]
    pub management_token_env: Option<String>,

    /// Resolved delivery token (not serialized).
    #[serde(skip)]
    pub delivery_token: Option<String>,

    /// Resolved source management token (not serialized).
    #[serde(skip)]
    pub management_token: Option<String>,
}

/// Destination space configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(default)]
    pub space_id: String,

    /// Env var holding a destination-only management token (overrides
    /// `api.management_token_env`).
    #[serde(default)]
    pub management_token_env: Option<String>,

    /// Resolved destination management token (not serialized).
    #[serde(skip)]
    pub management_token: Option<String>,
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// API endpoints and request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Env var holding the management token used for both spaces.
    #[serde(default)]
    pub management_token_env: Option<String>,

    /// Resolved shared management token (not serialized).
    #[serde(skip)]
    pub management_token: Option<String>,

    #[serde(default = "default_delivery_host")]
    pub delivery_host: String,

    #[serde(default)]
    pub delivery_port: Option<u16>,

    /// Use `http` for the delivery API.
    #[serde(default)]
    pub delivery_insecure: bool,

    #[serde(default = "default_management_host")]
    pub management_host: String,

    #[serde(default)]
    pub management_port: Option<u16>,

    /// Use `http` for the management API.
    #[serde(default)]
    pub management_insecure: bool,

    #[serde(default)]
    pub proxy_host: Option<String>,

    #[serde(default)]
    pub proxy_port: Option<u16>,

    /// Requests per `rate_limit_period_ms` (default 6).
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    #[serde(default = "default_rate_limit_period")]
    pub rate_limit_period_ms: u64,

    /// Attempts per request, including the first (default 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_delivery_host() -> String {
    "cdn.contentful.com".into()
}
fn default_management_host() -> String {
    "api.contentful.com".into()
}
fn default_rate_limit() -> u32 {
    6
}
fn default_rate_limit_period() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            management_token_env: None,
            management_token: None,
            delivery_host: default_delivery_host(),
            delivery_port: None,
            delivery_insecure: false,
            management_host: default_management_host(),
            management_port: None,
            management_insecure: false,
            proxy_host: None,
            proxy_port: None,
            rate_limit: default_rate_limit(),
            rate_limit_period_ms: default_rate_limit_period(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Run behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Directory holding the sync token file.
    #[serde(default = "default_dir")]
    pub sync_token_dir: PathBuf,

    /// Directory the error log is written to.
    #[serde(default = "default_dir")]
    pub error_log_dir: PathBuf,

    /// Wait between creating and publishing entries (default 5000).
    #[serde(default = "default_pre_publish_delay")]
    pub pre_publish_delay_ms: u64,

    #[serde(default = "default_asset_poll_attempts")]
    pub asset_poll_attempts: u32,

    #[serde(default = "default_asset_poll_interval")]
    pub asset_poll_interval_ms: u64,

    /// Allow a fresh sync into a destination that already has content.
    #[serde(default)]
    pub force_overwrite: bool,

    /// Sync only entries and assets.
    #[serde(default)]
    pub skip_content_model: bool,

    /// Sync only content types and locales.
    #[serde(default)]
    pub content_model_only: bool,

    /// With `content_model_only`: sync content types without locales.
    #[serde(default)]
    pub skip_locales: bool,

    /// Ignore the stored sync token.
    #[serde(default)]
    pub fresh: bool,
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_pre_publish_delay() -> u64 {
    5000
}
fn default_asset_poll_attempts() -> u32 {
    10
}
fn default_asset_poll_interval() -> u64 {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_token_dir: default_dir(),
            error_log_dir: default_dir(),
            pre_publish_delay_ms: default_pre_publish_delay(),
            asset_poll_attempts: default_asset_poll_attempts(),
            asset_poll_interval_ms: default_asset_poll_interval(),
            force_overwrite: false,
            skip_content_model: false,
            content_model_only: false,
            skip_locales: false,
            fresh: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve the `*_env` token references that have no value yet.
    ///
    /// Missing variables log a warning but do not fail; [`validate`](Self::validate)
    /// decides which tokens are required.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        resolve_into(
            &mut self.source.delivery_token,
            self.source.delivery_token_env.as_deref(),
            "source.delivery_token_env",
        );
        resolve_into(
            &mut self.source.management_token,
            self.source.management_token_env.as_deref(),
            "source.management_token_env",
        );
        resolve_into(
            &mut self.destination.management_token,
            self.destination.management_token_env.as_deref(),
            "destination.management_token_env",
        );
        resolve_into(
            &mut self.api.management_token,
            self.api.management_token_env.as_deref(),
            "api.management_token_env",
        );

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.space_id.is_empty() {
            return Err(invalid("source.space_id", "source space ID must not be empty"));
        }
        if self.destination.space_id.is_empty() {
            return Err(invalid(
                "destination.space_id",
                "destination space ID must not be empty",
            ));
        }
        if self.source.delivery_token.is_none() {
            return Err(invalid(
                "source.delivery_token_env",
                "a delivery token for the source space is required",
            ));
        }

        let shared = self.api.management_token.is_some();
        let source = self.source.management_token.is_some();
        let destination = self.destination.management_token.is_some();
        if shared && source && destination {
            return Err(invalid(
                "api.management_token_env",
                "a shared management token cannot be combined with both per-space tokens",
            ));
        }
        if self.source_management_token().is_none() || self.destination_management_token().is_none()
        {
            return Err(invalid(
                "api.management_token_env",
                "provide a management token for both spaces, or separate source and \
                 destination management tokens",
            ));
        }

        if self.api.proxy_host.is_some() != self.api.proxy_port.is_some() {
            return Err(invalid(
                "api.proxy_host",
                "proxy host and proxy port must be given together",
            ));
        }
        if self.api.rate_limit == 0 {
            return Err(invalid("api.rate_limit", "rate limit must be > 0"));
        }
        if self.api.rate_limit_period_ms == 0 {
            return Err(invalid(
                "api.rate_limit_period_ms",
                "rate limit period must be > 0",
            ));
        }
        if self.sync.skip_content_model && self.sync.content_model_only {
            return Err(invalid(
                "sync.skip_content_model",
                "skip_content_model and content_model_only cannot be used together",
            ));
        }
        if self.sync.skip_locales && !self.sync.content_model_only {
            return Err(invalid(
                "sync.skip_locales",
                "skip_locales can only be used with content_model_only",
            ));
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    // -----------------------------------------------------------------------
    // Derived settings
    // -----------------------------------------------------------------------

    pub fn source_management_token(&self) -> Option<&str> {
        self.source
            .management_token
            .as_deref()
            .or(self.api.management_token.as_deref())
    }

    pub fn destination_management_token(&self) -> Option<&str> {
        self.destination
            .management_token
            .as_deref()
            .or(self.api.management_token.as_deref())
    }

    pub fn delivery_settings(&self) -> ClientSettings {
        self.client_settings(
            &self.api.delivery_host,
            self.api.delivery_port,
            self.api.delivery_insecure,
        )
    }

    pub fn management_settings(&self) -> ClientSettings {
        self.client_settings(
            &self.api.management_host,
            self.api.management_port,
            self.api.management_insecure,
        )
    }

    fn client_settings(&self, host: &str, port: Option<u16>, insecure: bool) -> ClientSettings {
        let mut settings = ClientSettings::new(host);
        settings.port = port;
        settings.insecure = insecure;
        settings.timeout = Duration::from_secs(self.api.request_timeout_secs);
        settings.proxy = self.api.proxy_host.clone().zip(self.api.proxy_port);
        settings
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.api.max_attempts)
            .with_initial_delay(Duration::from_millis(self.api.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.api.max_backoff_ms))
    }

    /// The request scheduler shared by every call of a run.
    pub fn scheduler(&self) -> Result<RequestScheduler, ConfigError> {
        RequestScheduler::new(
            self.api.rate_limit,
            Duration::from_millis(self.api.rate_limit_period_ms),
            self.retry_policy(),
        )
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            fresh: self.sync.fresh,
            force_overwrite: self.sync.force_overwrite,
            skip_content_model: self.sync.skip_content_model,
            content_model_only: self.sync.content_model_only,
            skip_locales: self.sync.skip_locales,
            pre_publish_delay: Duration::from_millis(self.sync.pre_publish_delay_ms),
        }
    }

    pub fn asset_poll(&self) -> AssetPollConfig {
        AssetPollConfig {
            attempts: self.sync.asset_poll_attempts,
            interval: Duration::from_millis(self.sync.asset_poll_interval_ms),
        }
    }

    /// `<sync_token_dir>/space-sync-token-<source>-<destination>`.
    pub fn token_store(&self) -> FileTokenStore {
        FileTokenStore::for_spaces(
            &self.sync.sync_token_dir,
            &self.source.space_id,
            &self.destination.space_id,
        )
    }

    /// `<error_log_dir>/space-sync-error-log-<source>-<destination>-<stamp>.json`.
    pub fn error_log_file(&self, stamp: &str) -> PathBuf {
        self.sync.error_log_dir.join(format!(
            "space-sync-error-log-{}-{}-{}.json",
            self.source.space_id, self.destination.space_id, stamp
        ))
    }
}

fn invalid(field: &str, detail: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        detail: detail.into(),
    }
}

/// Fill `slot` from the environment variable `env_name` unless it already
/// holds a value.
fn resolve_into(slot: &mut Option<String>, env_name: Option<&str>, field: &str) {
    if slot.is_some() {
        debug!(field, "value already set, skipping env lookup");
        return;
    }
    if let Some(env_name) = env_name {
        *slot = resolve_optional_env(env_name, field);
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[source]
space_id = "src"
delivery_token_env = "SOURCE_DELIVERY_TOKEN"

[destination]
space_id = "dst"
management_token_env = "DESTINATION_MANAGEMENT_TOKEN"

[api]
management_token_env = "CONTENTFUL_MANAGEMENT_TOKEN"
management_host = "api.eu.contentful.com"
rate_limit = 10
rate_limit_period_ms = 2000
proxy_host = "proxy.internal"
proxy_port = 3128

[sync]
sync_token_dir = "/var/lib/space-sync"
pre_publish_delay_ms = 100
content_model_only = true
skip_locales = true
"#
    }

    /// A parsed config with every token filled in.
    fn resolved() -> AppConfig {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.source.delivery_token = Some("cda".into());
        config.api.management_token = Some("cma".into());
        config
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.source.space_id, "src");
        assert_eq!(config.destination.space_id, "dst");
        assert_eq!(config.api.management_host, "api.eu.contentful.com");
        assert_eq!(config.api.rate_limit, 10);
        assert_eq!(config.api.proxy_port, Some(3128));
        assert!(config.sync.content_model_only);
        assert!(config.sync.skip_locales);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = AppConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.sync.pre_publish_delay_ms, 100);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/config.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.api.delivery_host, "cdn.contentful.com");
        assert_eq!(config.api.management_host, "api.contentful.com");
        assert_eq!(config.api.rate_limit, 6);
        assert_eq!(config.api.rate_limit_period_ms, 1000);
        assert_eq!(config.sync.pre_publish_delay_ms, 5000);
        assert_eq!(config.sync.sync_token_dir, PathBuf::from("."));
        assert!(!config.sync.fresh);
    }

    #[test]
    fn test_validate_accepts_resolved_config() {
        assert!(resolved().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_space() {
        let mut config = resolved();
        config.destination.space_id = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "destination.space_id"
        ));
    }

    #[test]
    fn test_validate_requires_delivery_token() {
        let mut config = resolved();
        config.source.delivery_token = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "source.delivery_token_env"
        ));
    }

    #[test]
    fn test_management_token_combinations() {
        let mut config = resolved();
        config.api.management_token = None;
        assert!(config.validate().is_err());

        config.source.management_token = Some("src-cma".into());
        config.destination.management_token = Some("dst-cma".into());
        assert!(config.validate().is_ok());
        assert_eq!(config.source_management_token(), Some("src-cma"));

        config.api.management_token = Some("cma".into());
        assert!(config.validate().is_err());

        config.destination.management_token = None;
        assert!(config.validate().is_ok());
        assert_eq!(config.source_management_token(), Some("src-cma"));
        assert_eq!(config.destination_management_token(), Some("cma"));
    }

    #[test]
    fn test_validate_proxy_pair() {
        let mut config = resolved();
        config.api.proxy_port = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "api.proxy_host"
        ));
    }

    #[test]
    fn test_validate_exclusive_model_flags() {
        let mut config = resolved();
        config.sync.skip_content_model = true;
        assert!(config.validate().is_err());

        config.sync.skip_content_model = false;
        config.sync.content_model_only = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "sync.skip_locales"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let mut config = resolved();
        config.api.rate_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_env_vars() {
        std::env::set_var("TEST_SPACE_SYNC_CDA", "cda-token");
        std::env::set_var("TEST_SPACE_SYNC_CMA", "cma-token");

        let toml_str = r#"
[source]
space_id = "src"
delivery_token_env = "TEST_SPACE_SYNC_CDA"
[destination]
space_id = "dst"
[api]
management_token_env = "TEST_SPACE_SYNC_CMA"
"#;
        let mut config: AppConfig = toml::from_str(toml_str).unwrap();
        config.resolve_env_vars().unwrap();

        assert_eq!(config.source.delivery_token.as_deref(), Some("cda-token"));
        assert_eq!(config.destination_management_token(), Some("cma-token"));
        assert!(config.validate().is_ok());

        // Clean up
        std::env::remove_var("TEST_SPACE_SYNC_CDA");
        std::env::remove_var("TEST_SPACE_SYNC_CMA");
    }

    #[test]
    fn test_explicit_token_wins_over_env() {
        std::env::set_var("TEST_SPACE_SYNC_OVERRIDE", "from-env");
        let mut config = AppConfig::default();
        config.source.delivery_token_env = Some("TEST_SPACE_SYNC_OVERRIDE".into());
        config.source.delivery_token = Some("from-flag".into());
        config.resolve_env_vars().unwrap();
        assert_eq!(config.source.delivery_token.as_deref(), Some("from-flag"));
        std::env::remove_var("TEST_SPACE_SYNC_OVERRIDE");
    }

    #[test]
    fn test_derived_settings() {
        let config = resolved();
        let settings = config.management_settings();
        assert_eq!(settings.base_url(), "https://api.eu.contentful.com");
        assert_eq!(settings.proxy, Some(("proxy.internal".to_string(), 3128)));

        let options = config.run_options();
        assert!(options.content_model_only);
        assert_eq!(options.pre_publish_delay, Duration::from_millis(100));

        assert!(config
            .token_store()
            .path()
            .ends_with("space-sync-token-src-dst"));
        assert_eq!(
            config.error_log_file("1700000000"),
            PathBuf::from("./space-sync-error-log-src-dst-1700000000.json")
        );
        assert!(config.scheduler().is_ok());
    }
}
