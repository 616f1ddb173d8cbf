//! Error taxonomy for the reconciliation engine.
//!
//! Each collaborator boundary has its own error enum. Every enum reports an
//! [`ErrorCategory`] so the engine and the scheduler can decide between
//! deferring a run, failing it, or isolating a single record.

use std::fmt;
use std::time::Duration;

/// Broad classification used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rate limiting, connectivity problems and timeouts on the remote side.
    TransientRemote,
    /// Missing, expired or rejected credentials.
    Auth,
    /// A single source record could not be turned into an entity.
    Mapping,
    /// The catalog refused or could not accept a mutation.
    Submission,
    /// The run produced a result that cannot be trusted (e.g. every record unmappable).
    InvariantViolation,
    /// The run was cancelled by the host.
    Cancelled,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientRemote => write!(f, "transient_remote"),
            Self::Auth => write!(f, "auth"),
            Self::Mapping => write!(f, "mapping"),
            Self::Submission => write!(f, "submission"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors returned by an [`ApplicationSource`](crate::traits::ApplicationSource).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// Credentials were missing or rejected.
    ///
    /// `login_url` carries the hub's login redirect hint when it sent one. The
    /// engine never acts on it; it is kept for the UI layer.
    #[error("Unauthorized{}", .login_url.as_deref().map(|u| format!(" (login at {u})")).unwrap_or_default())]
    Unauthorized { login_url: Option<String> },

    /// The remote system asked us to slow down.
    #[error("Rate limited{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, timeout or an unexpected HTTP status.
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// The response body could not be understood as an application inventory.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Creates a new `Unreachable` error.
    #[must_use]
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }

    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Returns `true` for credential failures.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Server-provided hint for when to try again, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthorized { .. } => ErrorCategory::Auth,
            Self::RateLimited { .. } | Self::Unreachable(_) | Self::Malformed(_) => {
                ErrorCategory::TransientRemote
            }
        }
    }
}

/// A single record that could not be mapped into a catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot map record {}: {reason}", .record_id.as_deref().unwrap_or("<unknown>"))]
pub struct MappingError {
    /// Remote identifier of the offending record, when it had one.
    pub record_id: Option<String>,
    pub reason: String,
}

impl MappingError {
    pub const MISSING_NAME: &'static str = "missing name";
    pub const MISSING_IDENTIFIER: &'static str = "missing identifier";

    #[must_use]
    pub fn new(record_id: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            record_id: record_id.map(str::to_string),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Mapping
    }
}

/// Errors returned by an [`EntityProviderConnection`](crate::traits::EntityProviderConnection).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// The catalog refused the mutation (schema validation, ownership conflict).
    #[error("Mutation rejected: {0}")]
    Rejected(String),

    /// The catalog did not answer within the configured submit timeout.
    #[error("Mutation submission timed out")]
    Timeout,

    /// The catalog could not be reached.
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

impl SubmissionError {
    /// Creates a new `Rejected` error.
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Submission
    }
}

/// Errors returned by a [`DistributedLease`](crate::traits::DistributedLease) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("Lease backend error: {0}")]
    Backend(String),
}

/// Invalid schedule, retry or mapper configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid duration: {0}")]
    Duration(String),
}

impl ConfigError {
    /// Creates a new `Invalid` error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_categories() {
        assert_eq!(
            SourceError::Unauthorized { login_url: None }.category(),
            ErrorCategory::Auth
        );
        assert_eq!(
            SourceError::RateLimited { retry_after: None }.category(),
            ErrorCategory::TransientRemote
        );
        assert_eq!(
            SourceError::unreachable("connection refused").category(),
            ErrorCategory::TransientRemote
        );
        assert_eq!(
            SourceError::malformed("expected array").category(),
            ErrorCategory::TransientRemote
        );
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::Unauthorized {
            login_url: Some("https://hub.example.com/login".into()),
        };
        assert_eq!(
            err.to_string(),
            "Unauthorized (login at https://hub.example.com/login)"
        );

        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "Rate limited (retry after 30s)");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_mapping_error_display() {
        let err = MappingError::new(Some("42"), MappingError::MISSING_NAME);
        assert_eq!(err.to_string(), "Cannot map record 42: missing name");

        let err = MappingError::new(None, MappingError::MISSING_IDENTIFIER);
        assert_eq!(
            err.to_string(),
            "Cannot map record <unknown>: missing identifier"
        );
    }
}
