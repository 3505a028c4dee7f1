//! # Error Handling
//!
//! This module provides error handling for the Seiryu control plane.
//! It defines custom error types using `thiserror` for the xDS and
//! access-log servers.

/// Custom result type for Seiryu operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Seiryu control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration load or validation errors, tagged with the offending file
    #[error("Configuration error: {0}")]
    Config(String),

    /// Translation of a validated config into an Envoy resource failed
    #[error("Translation error: {0}")]
    Translation(String),

    /// A snapshot failed its cross-resource consistency check
    #[error("Snapshot inconsistent: {0}")]
    SnapshotInconsistent(String),

    /// Network transport errors (gRPC bind/serve)
    #[error("Transport error: {0}")]
    Transport(String),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new translation error
    pub fn translation<S: Into<String>>(message: S) -> Self {
        Self::Translation(message.into())
    }

    /// Create a new snapshot consistency error
    pub fn inconsistent<S: Into<String>>(message: S) -> Self {
        Self::SnapshotInconsistent(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new watch error
    pub fn watch<S: Into<String>>(message: S) -> Self {
        Self::Watch(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Config(format!("YAML parse failed: {}", error))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::Config(format!("Validation failed: {}", message))
    }
}

impl From<prost::EncodeError> for Error {
    fn from(error: prost::EncodeError) -> Self {
        Self::Translation(format!("protobuf encode failed: {}", error))
    }
}
