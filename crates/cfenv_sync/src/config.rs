//! Configuration for the client, transport retries, and hot updates.

use crate::error::{CfenvError, CfenvResult};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default Cloudflare API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// Default key prefix for remote keys.
pub const DEFAULT_KEY_PREFIX: &str = "cfenv";

/// How an environment is laid out in the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// One key per variable plus a metadata record.
    #[default]
    Flat,
    /// A current pointer naming one immutable, optionally encrypted version.
    Snapshot,
}

impl StorageMode {
    /// Returns the mode as a lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Flat => "flat",
            StorageMode::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = CfenvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(StorageMode::Flat),
            "snapshot" => Ok(StorageMode::Snapshot),
            _ => Err(CfenvError::Config(format!(
                "invalid storage mode {s:?}, use \"flat\" or \"snapshot\""
            ))),
        }
    }
}

/// Configuration for a [`CfenvClient`](crate::CfenvClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Cloudflare account ID.
    pub account_id: String,
    /// API token sent as a bearer token.
    pub api_token: String,
    /// KV namespace ID.
    pub namespace_id: String,
    /// Project name (second segment of every key).
    pub project: String,
    /// Environment name (third segment of every key).
    pub environment: String,
    /// First segment of every key.
    pub key_prefix: String,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// API base URL.
    pub api_base_url: String,
    /// Storage layout to read.
    pub storage_mode: StorageMode,
    /// Secret for encrypted snapshot versions.
    pub encryption_key: Option<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("account_id", &self.account_id)
            .field("api_token", &"[REDACTED]")
            .field("namespace_id", &self.namespace_id)
            .field("project", &self.project)
            .field("environment", &self.environment)
            .field("key_prefix", &self.key_prefix)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("api_base_url", &self.api_base_url)
            .field("storage_mode", &self.storage_mode)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ClientConfig {
    /// Creates a new client configuration with default tuning.
    pub fn new(
        account_id: impl Into<String>,
        api_token: impl Into<String>,
        namespace_id: impl Into<String>,
        project: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            api_token: api_token.into(),
            namespace_id: namespace_id.into(),
            project: project.into(),
            environment: environment.into(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            storage_mode: StorageMode::Flat,
            encryption_key: None,
        }
    }

    /// Reads the configuration from `CFENV_*` environment variables.
    ///
    /// Required fields that are unset come back empty and are rejected by
    /// [`validate`](Self::validate).
    pub fn from_env() -> CfenvResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> CfenvResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).unwrap_or_default();
        let mut config = Self::new(
            get("CFENV_ACCOUNT_ID"),
            get("CFENV_API_TOKEN"),
            get("CFENV_NAMESPACE_ID"),
            get("CFENV_PROJECT"),
            get("CFENV_ENVIRONMENT"),
        );

        if let Some(prefix) = lookup("CFENV_KEY_PREFIX").filter(|p| !p.is_empty()) {
            config.key_prefix = prefix;
        }
        if let Some(url) = lookup("CFENV_API_BASE_URL").filter(|u| !u.is_empty()) {
            config = config.with_api_base_url(url);
        }
        if let Some(raw) = lookup("CFENV_STORAGE_MODE").filter(|m| !m.is_empty()) {
            config.storage_mode = raw.parse()?;
        }
        if let Some(secret) = lookup("CFENV_ENCRYPTION_KEY").filter(|k| !k.trim().is_empty()) {
            config.encryption_key = Some(secret);
        }
        if let Some(raw) = lookup("CFENV_TIMEOUT_SECONDS") {
            config.timeout = parse_seconds("CFENV_TIMEOUT_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("CFENV_MAX_RETRIES") {
            config.retry.max_retries = raw.trim().parse().map_err(|_| {
                CfenvError::Config(format!("CFENV_MAX_RETRIES is not an integer: {raw:?}"))
            })?;
        }
        if let Some(raw) = lookup("CFENV_RETRY_BASE_SECONDS") {
            config.retry.base_delay = parse_seconds("CFENV_RETRY_BASE_SECONDS", &raw)?;
        }

        Ok(config)
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Sets the per-attempt request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the storage mode.
    #[must_use]
    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    /// Sets the secret used to decrypt snapshot versions.
    #[must_use]
    pub fn with_encryption_key(mut self, secret: impl Into<String>) -> Self {
        self.encryption_key = Some(secret.into());
        self
    }

    /// Checks that every required field is present.
    pub fn validate(&self) -> CfenvResult<()> {
        let required = [
            ("account_id", &self.account_id),
            ("api_token", &self.api_token),
            ("namespace_id", &self.namespace_id),
            ("project", &self.project),
            ("environment", &self.environment),
            ("key_prefix", &self.key_prefix),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CfenvError::Config(format!("{name} is required")));
            }
        }
        Ok(())
    }
}

fn parse_seconds(name: &str, raw: &str) -> CfenvResult<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| CfenvError::Config(format!("{name} is not a valid duration: {raw:?}")))
}

/// Configuration for transport retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Delay used when a `Retry-After` hint cannot be parsed.
    pub fallback_delay: Duration,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            fallback_delay: Duration::from_millis(500),
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Calculates the backoff for a zero-based attempt: `base * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Configuration for a [`HotUpdater`](crate::HotUpdater).
#[derive(Debug, Clone)]
pub struct HotUpdateConfig {
    /// Polling interval after a successful cycle.
    pub interval: Duration,
    /// Upper bound for the polling interval under failure.
    pub max_interval: Duration,
    /// Whether to refresh immediately on start.
    pub bootstrap: bool,
}

/// Exponent cap for failure backoff.
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Smallest allowed polling interval.
const MIN_INTERVAL: Duration = Duration::from_secs(1);

impl HotUpdateConfig {
    /// Creates a hot update configuration.
    ///
    /// The interval is raised to at least one second and the maximum is
    /// raised to at least the interval.
    pub fn new(interval: Duration, max_interval: Duration) -> Self {
        Self {
            interval,
            max_interval,
            bootstrap: true,
        }
        .normalized()
    }

    /// Sets whether to refresh immediately on start.
    #[must_use]
    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Returns a copy with the interval bounds enforced.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.interval = self.interval.max(MIN_INTERVAL);
        self.max_interval = self.max_interval.max(self.interval);
        self
    }

    /// Delay after `consecutive_errors` failed cycles in a row.
    ///
    /// `min(max_interval, interval * 2^min(n, 6))`; zero errors yields the
    /// base interval.
    pub fn delay_after_failures(&self, consecutive_errors: u32) -> Duration {
        let exponent = consecutive_errors.min(MAX_BACKOFF_EXPONENT);
        self.interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_interval)
    }
}

impl Default for HotUpdateConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> ClientConfig {
        ClientConfig::new("acc", "token", "ns", "demo", "development")
    }

    #[test]
    fn client_config_defaults() {
        let config = valid();
        assert_eq!(config.key_prefix, "cfenv");
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_fields() {
        let config = ClientConfig::new("acc", "", "ns", "demo", "development");
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "configuration error: api_token is required");

        let config = ClientConfig::new("acc", "token", "ns", "  ", "development");
        assert!(matches!(config.validate(), Err(CfenvError::Config(_))));
    }

    #[test]
    fn builder_trims_base_url() {
        let config = valid().with_api_base_url("http://127.0.0.1:8787/");
        assert_eq!(config.api_base_url, "http://127.0.0.1:8787");
    }

    #[test]
    fn from_lookup_reads_all_fields() {
        let vars: HashMap<&str, &str> = [
            ("CFENV_ACCOUNT_ID", "acc"),
            ("CFENV_API_TOKEN", "token"),
            ("CFENV_NAMESPACE_ID", "ns"),
            ("CFENV_PROJECT", "demo"),
            ("CFENV_ENVIRONMENT", "prod"),
            ("CFENV_KEY_PREFIX", "custom"),
            ("CFENV_TIMEOUT_SECONDS", "2.5"),
            ("CFENV_MAX_RETRIES", "5"),
            ("CFENV_RETRY_BASE_SECONDS", "0.1"),
            ("CFENV_API_BASE_URL", "http://127.0.0.1:8787/"),
            ("CFENV_STORAGE_MODE", "Snapshot"),
            ("CFENV_ENCRYPTION_KEY", "s3cret"),
        ]
        .into_iter()
        .collect();

        let config =
            ClientConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.environment, "prod");
        assert_eq!(config.key_prefix, "custom");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.api_base_url, "http://127.0.0.1:8787");
        assert_eq!(config.storage_mode, StorageMode::Snapshot);
        assert_eq!(config.encryption_key.as_deref(), Some("s3cret"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn storage_mode_parsing() {
        assert_eq!(" FLAT ".parse::<StorageMode>().unwrap(), StorageMode::Flat);
        assert_eq!("snapshot".parse::<StorageMode>().unwrap(), StorageMode::Snapshot);
        assert!(matches!("versions".parse::<StorageMode>(), Err(CfenvError::Config(_))));
        assert_eq!(StorageMode::default().to_string(), "flat");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = valid().with_encryption_key("hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("\"token\""));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn from_lookup_rejects_bad_numbers() {
        let result = ClientConfig::from_lookup(|name| {
            (name == "CFENV_MAX_RETRIES").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(CfenvError::Config(_))));

        let result = ClientConfig::from_lookup(|name| {
            (name == "CFENV_TIMEOUT_SECONDS").then(|| "-1".to_string())
        });
        assert!(matches!(result, Err(CfenvError::Config(_))));
    }

    #[test]
    fn from_lookup_missing_fields_fail_validation() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_delay_calculation() {
        let retry = RetryConfig::new(3, Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn retry_no_retry() {
        let retry = RetryConfig::no_retry();
        assert_eq!(retry.max_retries, 0);
        assert_eq!(retry.delay_for_attempt(4), Duration::ZERO);
    }

    #[test]
    fn hot_update_intervals_are_normalized() {
        let config = HotUpdateConfig::new(Duration::from_millis(10), Duration::ZERO);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_interval, Duration::from_secs(1));

        let defaults = HotUpdateConfig::default();
        assert_eq!(defaults.interval, Duration::from_secs(30));
        assert_eq!(defaults.max_interval, Duration::from_secs(300));
        assert!(defaults.bootstrap);
    }

    #[test]
    fn failure_delay_grows_and_caps() {
        let config = HotUpdateConfig::new(Duration::from_secs(1), Duration::from_secs(1000));
        assert_eq!(config.delay_after_failures(0), Duration::from_secs(1));
        assert_eq!(config.delay_after_failures(1), Duration::from_secs(2));
        assert_eq!(config.delay_after_failures(3), Duration::from_secs(8));
        // Exponent stops at 6.
        assert_eq!(config.delay_after_failures(6), Duration::from_secs(64));
        assert_eq!(config.delay_after_failures(40), Duration::from_secs(64));

        let capped = HotUpdateConfig::new(Duration::from_secs(30), Duration::from_secs(300));
        assert_eq!(capped.delay_after_failures(2), Duration::from_secs(120));
        assert_eq!(capped.delay_after_failures(4), Duration::from_secs(300));
    }
}
