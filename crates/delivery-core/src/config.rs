//! Configuration for the delivery pipeline.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding `log_level`.
pub const LOG_LEVEL_ENV: &str = "EMBRACE_DELIVERY_LOG_LEVEL";
/// Environment variable overriding `base_url`.
pub const BASE_URL_ENV: &str = "EMBRACE_DELIVERY_BASE_URL";

/// Delay policy for the pending-call retry task (generic transient failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(120),
            max_delay: Duration::from_secs(3600),
        }
    }
}

/// Delay policy applied per endpoint after the server signals a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied for every consecutive rate-limited response.
    pub growth_factor: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(3600),
            growth_factor: 2,
        }
    }
}

/// Delivery configuration, persisted as `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Collector base URL. Derived from `app_id` when unset.
    pub base_url: Option<String>,
    pub app_id: String,
    pub device_id: String,
    pub sdk_version: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Upper bound on queued pending calls; overflow is dropped.
    pub max_pending_api_calls: usize,
    /// Attempts after which a call is abandoned for this process.
    pub max_call_attempts: u32,
    pub shutdown_timeout_ms: u64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub rate_limit_base_delay_secs: u64,
    pub rate_limit_max_delay_secs: u64,
    pub rate_limit_growth_factor: u32,
    pub request_timeout_secs: u64,
    /// Gzip request bodies before sending.
    pub compress_payloads: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            app_id: String::new(),
            device_id: String::new(),
            sdk_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            max_pending_api_calls: 200,
            max_call_attempts: 20,
            shutdown_timeout_ms: 3000,
            retry_base_delay_secs: 120,
            retry_max_delay_secs: 3600,
            rate_limit_base_delay_secs: 3,
            rate_limit_max_delay_secs: 3600,
            rate_limit_growth_factor: 2,
            request_timeout_secs: 30,
            compress_payloads: true,
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from `<base>/config.json` (defaults when absent),
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeliveryConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        std::fs::create_dir_all(paths.base_dir())?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.log_level = level;
        }
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = Some(url);
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(CoreError::Config("app_id must not be empty".to_string()));
        }
        if self.max_pending_api_calls == 0 {
            return Err(CoreError::Config(
                "max_pending_api_calls must be at least 1".to_string(),
            ));
        }
        if self.rate_limit_growth_factor == 0 {
            return Err(CoreError::Config(
                "rate_limit_growth_factor must be at least 1".to_string(),
            ));
        }
        self.base_url()?;
        Ok(())
    }

    /// Collector base URL as a parsed URL.
    pub fn base_url(&self) -> CoreResult<Url> {
        let raw = match &self.base_url {
            Some(url) => url.clone(),
            None => format!("https://a-{}.data.emb-api.com", self.app_id),
        };
        Url::parse(&raw).map_err(CoreError::from)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_delay: Duration::from_secs(self.retry_max_delay_secs),
        }
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            base_delay: Duration::from_secs(self.rate_limit_base_delay_secs),
            max_delay: Duration::from_secs(self.rate_limit_max_delay_secs),
            growth_factor: self.rate_limit_growth_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DeliveryConfig::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.max_pending_api_calls, 200);
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(3000));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.rate_limit_policy(), RateLimitPolicy::default());
        assert!(config.compress_payloads);
    }

    #[test]
    fn test_base_url_derived_from_app_id() {
        let config = DeliveryConfig {
            app_id: "abc12".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.base_url().unwrap().as_str(),
            "https://a-abc12.data.emb-api.com/"
        );
    }

    #[test]
    fn test_config_load_from_file_keeps_defaults_for_missing_keys() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{ "app_id": "xyz99", "log_level": "debug", "max_pending_api_calls": 5 }"#,
        )
        .unwrap();

        let config = DeliveryConfig::load_from_file(&config_path).unwrap();
        assert_eq!(config.app_id, "xyz99");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_pending_api_calls, 5);
        assert_eq!(config.retry_base_delay_secs, 120);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = DeliveryConfig {
            app_id: "saved".to_string(),
            rate_limit_growth_factor: 3,
            ..Default::default()
        };
        config.save(&paths).unwrap();

        let loaded = DeliveryConfig::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.app_id, "saved");
        assert_eq!(loaded.rate_limit_policy().growth_factor, 3);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            (LOG_LEVEL_ENV, "trace"),
            (BASE_URL_ENV, "http://127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();

        let mut config = DeliveryConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.log_level, "trace");
        assert_eq!(config.base_url().unwrap().as_str(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn test_validate_rejects_missing_app_id() {
        let config = DeliveryConfig::default();
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let config = DeliveryConfig {
            app_id: "abc12".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
