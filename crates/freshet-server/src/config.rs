use std::time::Duration;

use freshet_core::{ExpirationPolicy, PollerConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration for the bulk ticker cache
    #[serde(default)]
    pub redis: RedisConfig,
    /// TTL window for in-process revalidating caches
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upstream retry budget
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ticker_cache: TickerCacheConfig,
    /// Background blob poller
    #[serde(default)]
    pub poller: PollerSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Redis validations
        if self.redis.url.is_empty() {
            return Err("redis.url must not be empty".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.redis.namespace.trim().is_empty() {
            return Err("redis.namespace must not be empty".into());
        }
        // Cache validations
        if self.cache.ttl_min_secs > self.cache.ttl_max_secs {
            return Err("cache.ttl_min_secs must be <= cache.ttl_max_secs".into());
        }
        // Retry validations
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be > 0".into());
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err("retry.initial_delay_ms must be <= retry.max_delay_ms".into());
        }
        if self.ticker_cache.ttl_secs == 0 {
            return Err("ticker_cache.ttl_secs must be > 0".into());
        }
        // Poller validations
        if self.poller.interval_secs == 0 {
            return Err("poller.interval_secs must be > 0".into());
        }
        if self.poller.enabled && self.poller.source.as_deref().unwrap_or("").is_empty() {
            return Err("poller.enabled=true requires poller.source".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis configuration for the distributed bulk cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Primary connection URL (e.g., "redis://localhost:6379"). Bulk writes always go here.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Optional read replica. Bulk fetches use it when set.
    #[serde(default)]
    pub replica_url: Option<String>,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Key prefix; ticker keys are `{namespace}:{SYMBOL}`
    #[serde(default = "default_redis_namespace")]
    pub namespace: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_namespace() -> String {
    "tickers".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            replica_url: None,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            namespace: default_redis_namespace(),
        }
    }
}

/// TTL window for revalidating caches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_min_secs")]
    pub ttl_min_secs: u64,
    #[serde(default = "default_ttl_max_secs")]
    pub ttl_max_secs: u64,
}

fn default_ttl_min_secs() -> u64 {
    50
}

fn default_ttl_max_secs() -> u64 {
    70
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_min_secs: default_ttl_min_secs(),
            ttl_max_secs: default_ttl_max_secs(),
        }
    }
}

impl CacheConfig {
    pub fn expiration_policy(&self) -> freshet_core::Result<ExpirationPolicy> {
        ExpirationPolicy::new(
            Duration::from_secs(self.ttl_min_secs),
            Duration::from_secs(self.ttl_max_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the random delay added to every backoff
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_jitter_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerCacheConfig {
    /// Shared TTL applied to every snapshot written back after an origin fetch
    #[serde(default = "default_ticker_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ticker_ttl_secs() -> u64 {
    300
}

impl Default for TickerCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ticker_ttl_secs(),
        }
    }
}

impl TickerCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Local file path or http(s) URL of the blob
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_max_size_bytes() -> u64 {
    256 * 1024 * 1024
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            source: None,
            interval_secs: default_poll_interval_secs(),
            max_size_bytes: default_max_size_bytes(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl PollerSettings {
    pub fn poller_config(&self, name: impl Into<String>) -> PollerConfig {
        PollerConfig {
            name: name.into(),
            interval: Duration::from_secs(self.interval_secs),
            max_size_bytes: self.max_size_bytes,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from("freshet.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., FRESHET__REDIS__POOL_SIZE=20
        builder = builder.add_source(
            Environment::with_prefix("FRESHET")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache.ttl_min_secs, 50);
        assert_eq!(cfg.cache.ttl_max_secs, 70);
        assert_eq!(cfg.ticker_cache.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn inverted_ttl_window_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.cache.ttl_min_secs = 90;
        let err = cfg.validate().expect_err("inverted window");
        assert!(err.contains("ttl_min_secs"));
    }

    #[test]
    fn enabled_poller_needs_a_source() {
        let mut cfg = AppConfig::default();
        cfg.poller.enabled = true;
        assert!(cfg.validate().is_err());
        cfg.poller.source = Some("/var/lib/freshet/model.json".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn sections_convert_to_core_policies() {
        let cfg = AppConfig::default();
        let expiration = cfg.cache.expiration_policy().unwrap();
        assert_eq!(expiration.ttl_max(), Duration::from_secs(70));

        let retry = cfg.retry.policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay, Duration::from_millis(200));
        assert_eq!(retry.jitter, Duration::from_secs(1));

        let poller = cfg.poller.poller_config("model");
        assert_eq!(poller.name, "model");
        assert_eq!(poller.interval, Duration::from_secs(60));
        assert_eq!(poller.max_size_bytes, 256 * 1024 * 1024);
    }
}
