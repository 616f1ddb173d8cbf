//! Validated runtime settings assembled by the host from its config file.

use std::time::Duration;

use crate::engine::EngineOptions;
use crate::error::ConfigError;
use crate::mapper::{EntityMapper, MAX_NAME_LEN, MapperOptions};
use crate::schedule::{RetryPolicy, ScheduleSettings};

/// Longest accepted schedule period.
pub const MAX_FREQUENCY: Duration = Duration::from_secs(366 * 24 * 3600);

/// Everything one provider instance needs, checked as a whole.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub mapper: MapperOptions,
    pub schedule: ScheduleSettings,
    pub retry: RetryPolicy,
    /// Per-request bound for the HTTP client.
    pub request_timeout: Duration,
}

impl SyncSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let schedule = &self.schedule;
        if schedule.frequency.is_zero() {
            return Err(ConfigError::invalid("schedule.frequency must be greater than zero"));
        }
        if schedule.frequency > MAX_FREQUENCY {
            return Err(ConfigError::invalid(format!(
                "schedule.frequency must not exceed {} days",
                MAX_FREQUENCY.as_secs() / 86400
            )));
        }
        if schedule.timeout.is_zero() {
            return Err(ConfigError::invalid("schedule.timeout must be greater than zero"));
        }
        if schedule.timeout > schedule.frequency {
            return Err(ConfigError::invalid(format!(
                "schedule.timeout ({}s) must not exceed schedule.frequency ({}s)",
                schedule.timeout.as_secs(),
                schedule.frequency.as_secs()
            )));
        }
        if self.retry.transient_backoff > self.retry.max_backoff {
            return Err(ConfigError::invalid(
                "retry.transient_backoff must not exceed retry.max_backoff",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("mta.request_timeout must be greater than zero"));
        }

        let scheme = self.mapper.base_url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ConfigError::invalid(format!(
                "mta.base_url must use http or https, got '{scheme}'"
            )));
        }

        let id = &self.mapper.provider_id;
        if id.is_empty() {
            return Err(ConfigError::invalid("provider.id must not be empty"));
        }
        if id.len() > MAX_NAME_LEN || !id.chars().all(is_name_char) {
            return Err(ConfigError::invalid(format!(
                "provider.id '{id}' may only contain letters, digits, '.', '_' and '-'"
            )));
        }
        if self.mapper.namespace.is_empty() || !self.mapper.namespace.chars().all(is_name_char) {
            return Err(ConfigError::invalid(format!(
                "provider.namespace '{}' is not a valid namespace",
                self.mapper.namespace
            )));
        }

        Ok(())
    }

    /// Step bounds for the engine. Fetch and submit each get the whole run
    /// budget; the scheduler's deadline bounds their sum.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            fetch_timeout: self.schedule.timeout,
            submit_timeout: self.schedule.timeout,
        }
    }

    pub fn entity_mapper(&self) -> EntityMapper {
        EntityMapper::new(self.mapper.clone())
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// Parse an ISO-8601 duration of the form `PT{n}H`, `PT{n}M`, `PT{n}S` or
/// `P{n}D`. Negative durations are rejected.
pub fn parse_iso_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.starts_with('-') {
        return Err(ConfigError::Duration(format!("negative duration not allowed: {s}")));
    }

    let (digits, unit_secs) = if let Some(rest) = s.strip_prefix("PT") {
        if let Some(n) = rest.strip_suffix('H') {
            (n, 60 * 60)
        } else if let Some(n) = rest.strip_suffix('M') {
            (n, 60)
        } else if let Some(n) = rest.strip_suffix('S') {
            (n, 1)
        } else {
            return Err(ConfigError::Duration(format!("unsupported duration format: {s}")));
        }
    } else if let Some(n) = s.strip_prefix('P').and_then(|r| r.strip_suffix('D')) {
        (n, 24 * 60 * 60)
    } else {
        return Err(ConfigError::Duration(format!("unsupported duration format: {s}")));
    };

    let value: u64 = digits
        .parse()
        .map_err(|e| ConfigError::Duration(format!("invalid number in '{s}': {e}")))?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Duration(format!("duration too large: {s}")))
}
