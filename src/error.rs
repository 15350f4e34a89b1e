//! Error types for the maintenance suppression service
//!
//! The crate-level [`Error`] covers startup, configuration and transport
//! failures. The remaining types follow the per-scope / per-resource /
//! per-event taxonomy used by the handler: [`ResolveError`] and
//! [`SuppressionError`] are accumulated into an outcome, only
//! [`HandlerError`] is surfaced to the event sender for redelivery.

use thiserror::Error;

use crate::azure::RemoteError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Failed to parse configuration file: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    ServerError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A single subscription scope could not be queried
#[derive(Error, Debug, Clone)]
#[error("resolve failed for scope {scope}: {source}")]
pub struct ResolveError {
    pub scope: String,
    #[source]
    pub source: RemoteError,
}

/// Creating or removing the suppression rule for one resource failed
#[derive(Error, Debug, Clone)]
#[error("suppression rule {rule} for {resource_id}: {source}")]
pub struct SuppressionError {
    pub rule: String,
    pub resource_id: String,
    #[source]
    pub source: RemoteError,
}

impl SuppressionError {
    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

/// Event-level failure, reported back to the sender so its retry policy applies
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Every scope in the event failed to resolve
    #[error("resolution failed for all {} scope(s) of maintenance {maintenance_id}", failures.len())]
    ResolutionFailed {
        maintenance_id: String,
        failures: Vec<ResolveError>,
    },

    /// Every per-resource rule operation failed
    #[error("all {failed} rule operation(s) failed for maintenance {maintenance_id}")]
    AllOperationsFailed {
        maintenance_id: String,
        failed: usize,
    },

    /// Some rule operations failed and partial outcomes are configured to be redelivered
    #[error("{failed} of {total} rule operation(s) failed for maintenance {maintenance_id}")]
    PartialFailure {
        maintenance_id: String,
        failed: usize,
        total: usize,
    },

    /// The process began shutting down before all resources were processed
    #[error("shutdown interrupted processing of maintenance {maintenance_id}")]
    ShuttingDown { maintenance_id: String },
}

impl HandlerError {
    pub fn maintenance_id(&self) -> &str {
        match self {
            HandlerError::ResolutionFailed { maintenance_id, .. }
            | HandlerError::AllOperationsFailed { maintenance_id, .. }
            | HandlerError::PartialFailure { maintenance_id, .. }
            | HandlerError::ShuttingDown { maintenance_id } => maintenance_id,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::ResolutionFailed { .. } => "resolution_failed",
            HandlerError::AllOperationsFailed { .. } => "all_operations_failed",
            HandlerError::PartialFailure { .. } => "partial_failure",
            HandlerError::ShuttingDown { .. } => "shutting_down",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_error_retryable_follows_source() {
        let err = SuppressionError {
            rule: "maint-suppress-vm-a".to_string(),
            resource_id: "/subscriptions/s/resourceGroups/rg/providers/x/y/vm-a".to_string(),
            source: RemoteError::Timeout,
        };
        assert!(err.is_retryable());

        let err = SuppressionError {
            source: RemoteError::Unauthorized("denied".to_string()),
            ..err
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_handler_error_message_counts_scopes() {
        let err = HandlerError::ResolutionFailed {
            maintenance_id: "m1".to_string(),
            failures: vec![
                ResolveError {
                    scope: "sub1".to_string(),
                    source: RemoteError::Timeout,
                },
                ResolveError {
                    scope: "sub2".to_string(),
                    source: RemoteError::Throttled,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "resolution failed for all 2 scope(s) of maintenance m1"
        );
        assert_eq!(err.maintenance_id(), "m1");
        assert_eq!(err.kind(), "resolution_failed");
    }
}
