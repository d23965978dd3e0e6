//! Server error types.

use std::io;

use thiserror::Error;

/// Errors that stop the server from starting or serving.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configured address is not a socket address.
    #[error("invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The rejected address.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Failed to bind to the configured address.
    #[error("failed to bind to {addr}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Two routes were registered under the same operation name.
    #[error("operation '{operation}' already has a handler")]
    DuplicateOperation {
        /// The operation registered twice.
        operation: String,
    },

    /// The OS signal listener could not be installed.
    #[error("failed to install {signal} handler")]
    Signal {
        /// Name of the signal.
        signal: &'static str,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Create a new bind error.
    pub fn bind(addr: impl ToString, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }

    /// Create a duplicate operation error.
    pub fn duplicate_operation(operation: impl Into<String>) -> Self {
        Self::DuplicateOperation {
            operation: operation.into(),
        }
    }

    /// Create a new invalid address error.
    pub fn invalid_address(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::bind(
            "127.0.0.1:80",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "failed to bind to 127.0.0.1:80");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_invalid_address_display() {
        let err = ServerError::invalid_address("nowhere", "invalid socket address syntax");
        assert!(err.to_string().contains("nowhere"));
        assert!(err.to_string().contains("invalid socket address syntax"));
    }
}
