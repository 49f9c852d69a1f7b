//! Error types for feedwatch.

use std::time::Duration;

/// Failure of a tenant state mutation: the input was rejected, or the
/// change could not be persisted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Rejected command input. State is never mutated when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid value for {setting}: {reason}")]
    InvalidSetting { setting: String, reason: String },

    #[error("Invalid interval {min}-{max}: both must be > 0 and min <= max")]
    InvalidInterval { min: i64, max: i64 },

    #[error("Missing argument: {0}")]
    MissingArgument(String),

    #[error("Not permitted: {0}")]
    NotPermitted(String),
}

/// Feed fetch/parse failures. Each one counts toward the error streak.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Feed request failed: {0}")]
    Request(String),

    #[error("Feed returned HTTP {status}")]
    Status { status: u16 },

    #[error("Feed parse failed: {0}")]
    Parse(String),

    #[error("Feed fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Messaging channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Send on channel {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutation_errors_keep_their_kind() {
        let rejected: Error = ValidationError::MissingArgument("word".into()).into();
        assert!(matches!(rejected, Error::Validation(ValidationError::MissingArgument(_))));

        let unsaved: Error = StoreError::Io {
            path: "config.json".into(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .into();
        assert!(matches!(unsaved, Error::Store(StoreError::Io { .. })));
        assert!(unsaved.to_string().starts_with("Store error: IO error on config.json"));
    }
}
