//! Error handling for the studio logging and inference runtime
//!
//! Every fallible operation in the crate returns [`StudioResult`]. Construction
//! failures (`Configuration`, `Settings`) are fatal to the component being
//! built; everything else is a per-call error the caller may recover from.

use thiserror::Error;

/// Main error type for the studio runtime
#[derive(Error, Debug)]
pub enum StudioError {
    #[error("Configuration error: cannot open log file {path}")]
    Configuration {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid payload for {kind} log entry: {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("Audit write failed: {operation}")]
    AuditWrite {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Write to {channel} channel failed")]
    ChannelWrite {
        channel: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Network operation failed: {operation}")]
    Network {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Prediction {id} ended with status {status}: {detail}")]
    Prediction {
        id: String,
        status: String,
        detail: String,
    },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Mutex lock failed: {resource}")]
    MutexPoisoned { resource: String },
}

/// Type alias for Result with StudioError
pub type StudioResult<T> = Result<T, StudioError>;

impl StudioError {
    /// Create a configuration error for an unusable log file path
    pub fn configuration(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Configuration {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind: kind.into(),
            reason: reason.into(),
        }
    }

    /// Create an audit write error
    pub fn audit_write(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::AuditWrite {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a channel write error
    pub fn channel_write(channel: impl Into<String>, source: std::io::Error) -> Self {
        Self::ChannelWrite {
            channel: channel.into(),
            source,
        }
    }

    /// Create a settings error
    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create a network error
    pub fn network(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source,
        }
    }

    /// Create a prediction failure error
    pub fn prediction(
        id: impl Into<String>,
        status: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Prediction {
            id: id.into(),
            status: status.into(),
            detail: detail.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Helper trait for mutex operations that return errors instead of panicking
pub trait SafeLock<T: ?Sized> {
    /// Lock the mutex, naming the guarded resource in the poison error
    fn safe_lock(&self, resource: &str) -> StudioResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self, resource: &str) -> StudioResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| StudioError::MutexPoisoned {
            resource: resource.to_string(),
        })
    }
}

impl From<serde_json::Error> for StudioError {
    fn from(err: serde_json::Error) -> Self {
        StudioError::serialization("json_operation", err)
    }
}

impl From<std::io::Error> for StudioError {
    fn from(err: std::io::Error) -> Self {
        StudioError::io("io_operation", err)
    }
}

impl From<reqwest::Error> for StudioError {
    fn from(err: reqwest::Error) -> Self {
        StudioError::network("http_request", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StudioError::invalid_payload("debug", "data must be absent");
        assert!(err.to_string().contains("Invalid payload for debug"));

        let err = StudioError::validation("poll_interval_ms", "must be positive");
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StudioError::configuration("/root/forbidden.log", io_err);

        assert!(err.source().is_some());
        assert!(err.to_string().contains("/root/forbidden.log"));
    }

    #[test]
    fn test_poisoned_mutex_is_reported() {
        use std::sync::{Arc, Mutex};

        let shared = Arc::new(Mutex::new(0u8));
        let clone = Arc::clone(&shared);
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison");
        })
        .join();

        match shared.safe_lock("counter") {
            Err(StudioError::MutexPoisoned { resource }) => assert_eq!(resource, "counter"),
            other => panic!("expected poison error, got {other:?}"),
        };
    }
}
