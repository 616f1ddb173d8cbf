use std::time::Duration;

use mta_sync_core::{
    ConfigError, MapperOptions, RetryPolicy, ScheduleSettings, SyncSettings, parse_iso_duration,
};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub mta: MtaConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.settings().map(|_| ()).map_err(|e| e.to_string())
    }

    /// Parse durations and URLs into validated runtime settings.
    pub fn settings(&self) -> Result<SyncSettings, ConfigError> {
        if self.mta.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("mta.base_url is required"));
        }
        let base_url = Url::parse(self.mta.base_url.trim())
            .map_err(|e| ConfigError::invalid(format!("mta.base_url: {e}")))?;

        let settings = SyncSettings {
            mapper: MapperOptions {
                base_url,
                provider_id: self.provider.id.clone(),
                namespace: self.provider.namespace.clone(),
                owner_fallback: self.provider.owner_fallback.clone(),
                lifecycle: self.provider.lifecycle.clone(),
            },
            schedule: ScheduleSettings {
                frequency: duration("schedule.frequency", &self.schedule.frequency)?,
                timeout: duration("schedule.timeout", &self.schedule.timeout)?,
                initial_delay: duration("schedule.initial_delay", &self.schedule.initial_delay)?,
                initial_jitter: duration("schedule.initial_jitter", &self.schedule.initial_jitter)?,
            },
            retry: RetryPolicy {
                transient_backoff: duration("retry.transient_backoff", &self.retry.transient_backoff)?,
                max_backoff: duration("retry.max_backoff", &self.retry.max_backoff)?,
                auth_backoff: duration("retry.auth_backoff", &self.retry.auth_backoff)?,
            },
            request_timeout: duration("mta.request_timeout", &self.mta.request_timeout)?,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_iso_duration(value).map_err(|e| ConfigError::Duration(format!("{field}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtaConfig {
    /// MTA hub base URL, e.g. `https://mta.example.com/hub`.
    #[serde(default)]
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

fn default_request_timeout() -> String {
    "PT30S".into()
}

impl Default for MtaConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_env: None,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_id")]
    pub id: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_owner_fallback")]
    pub owner_fallback: String,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: String,
}

fn default_provider_id() -> String {
    "default".into()
}
fn default_namespace() -> String {
    "default".into()
}
fn default_owner_fallback() -> String {
    "unknown".into()
}
fn default_lifecycle() -> String {
    "production".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: default_provider_id(),
            namespace: default_namespace(),
            owner_fallback: default_owner_fallback(),
            lifecycle: default_lifecycle(),
        }
    }
}

/// ISO-8601 durations, see [`parse_iso_duration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_frequency")]
    pub frequency: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,
    #[serde(default = "default_initial_jitter")]
    pub initial_jitter: String,
}

fn default_frequency() -> String {
    "PT1H".into()
}
fn default_timeout() -> String {
    "PT5M".into()
}
fn default_initial_delay() -> String {
    "PT15S".into()
}
fn default_initial_jitter() -> String {
    "PT30S".into()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            timeout: default_timeout(),
            initial_delay: default_initial_delay(),
            initial_jitter: default_initial_jitter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_transient_backoff")]
    pub transient_backoff: String,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
    #[serde(default = "default_auth_backoff")]
    pub auth_backoff: String,
}

fn default_transient_backoff() -> String {
    "PT30S".into()
}
fn default_max_backoff() -> String {
    "PT30M".into()
}
fn default_auth_backoff() -> String {
    "PT1H".into()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_backoff: default_transient_backoff(),
            max_backoff: default_max_backoff(),
            auth_backoff: default_auth_backoff(),
        }
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

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "mta-sync.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., MTA_SYNC__SCHEDULE__FREQUENCY=PT5M
        builder = builder.add_source(
            Environment::with_prefix("MTA_SYNC")
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

    fn config(base_url: &str) -> AppConfig {
        AppConfig {
            mta: MtaConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_produce_valid_settings() {
        let settings = config("https://mta.example.com/hub").settings().unwrap();
        assert_eq!(settings.schedule.frequency, Duration::from_secs(3600));
        assert_eq!(settings.schedule.timeout, Duration::from_secs(300));
        assert_eq!(settings.retry.auth_backoff, Duration::from_secs(3600));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.mapper.provider_id, "default");
        assert_eq!(settings.mapper.owner_fallback, "unknown");
    }

    #[test]
    fn test_missing_base_url_is_rejected() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(err.contains("mta.base_url is required"));
    }

    #[test]
    fn test_bad_duration_names_the_field() {
        let mut cfg = config("https://mta.example.com");
        cfg.schedule.frequency = "hourly".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("schedule.frequency"));

        let mut cfg = config("https://mta.example.com");
        cfg.retry.max_backoff = "-PT1M".into();
        assert!(cfg.validate().unwrap_err().contains("retry.max_backoff"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut cfg = config("https://mta.example.com");
        cfg.logging.level = "verbose".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));
    }
}
