//! Error taxonomy for Harbor services.
//!
//! Every error a handler can surface is eventually mapped onto one of the four
//! [`ErrorKind`]s. The recognized domain conditions are the variants of
//! [`ServiceError`]; anything else is treated as [`ErrorKind::Internal`] by the
//! classifier.
//!
//! | `ServiceError`        | `ErrorKind`  | Status | Logged |
//! |-----------------------|--------------|--------|--------|
//! | `NotFound`            | `NotFound`   | 404    | no     |
//! | `Constraint`          | `Constraint` | 400    | no     |
//! | `Cancelled`           | `Timeout`    | 408    | no     |
//! | `Status { .. }`       | from status  | as-is  | >= 500 |
//! | anything else         | `Internal`   | 500    | yes    |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`ServiceError`].
pub type ServiceResult<T> = Result<T, ServiceError>;

/// The closed set of semantic error kinds used across a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The requested entity does not exist.
    NotFound,
    /// Caller-supplied input broke a constraint.
    Constraint,
    /// The request was cancelled or ran past its deadline.
    Timeout,
    /// Anything unrecognized.
    Internal,
}

impl ErrorKind {
    /// Returns the default HTTP status code for this kind.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Constraint => StatusCode::BAD_REQUEST,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` if errors of this kind are worth an error log line.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(self, Self::Internal)
    }

    /// Derives a kind from a status code carried by a pre-classified error.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::REQUEST_TIMEOUT => Self::Timeout,
            s if s.is_client_error() => Self::Constraint,
            _ => Self::Internal,
        }
    }

    /// Returns the snake_case name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Constraint => "constraint",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request stopped before its handler finished.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cancellation {
    /// The client went away or the request was cancelled explicitly.
    #[error("request canceled")]
    Canceled,
    /// The per-request deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

/// Recognized domain errors.
///
/// Handlers return these (usually through `anyhow::Error`, optionally wrapped
/// with `.context(..)`) and the classifier maps them onto HTTP responses.
///
/// # Example
///
/// ```
/// use harbor_core::{constraint, ErrorKind, ServiceError};
///
/// fn parse_limit(raw: &str) -> Result<u32, ServiceError> {
///     raw.parse().map_err(|_| constraint!("invalid int: {raw}"))
/// }
///
/// let err = parse_limit("a").unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::Constraint);
/// assert_eq!(err.to_string(), "invalid int: a");
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The not-found sentinel.
    #[error("not found")]
    NotFound,

    /// A broken constraint, usually on user input. The message is shown to callers.
    #[error("{message}")]
    Constraint {
        /// Caller-facing description of the violated constraint.
        message: String,
    },

    /// Context cancellation or deadline expiry.
    #[error(transparent)]
    Cancelled(#[from] Cancellation),

    /// A transport-level error that already knows its status code.
    #[error("{message}")]
    Status {
        /// Status code to respond with.
        status: StatusCode,
        /// Message to respond with.
        message: String,
    },
}

impl ServiceError {
    /// Creates the not-found sentinel.
    #[must_use]
    pub const fn not_found() -> Self {
        Self::NotFound
    }

    /// Creates a constraint error with the given message.
    #[must_use]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates a cancellation error for a cancelled request.
    #[must_use]
    pub const fn canceled() -> Self {
        Self::Cancelled(Cancellation::Canceled)
    }

    /// Creates a cancellation error for an expired deadline.
    #[must_use]
    pub const fn deadline_exceeded() -> Self {
        Self::Cancelled(Cancellation::DeadlineExceeded)
    }

    /// Creates a pre-classified error with an explicit status code.
    #[must_use]
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::Cancelled(_) => ErrorKind::Timeout,
            Self::Status { status, .. } => ErrorKind::from_status(*status),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Status { status, .. } => *status,
            other => other.kind().default_status_code(),
        }
    }
}

/// Builds a [`ServiceError::Constraint`] from a format string.
#[macro_export]
macro_rules! constraint {
    ($($arg:tt)*) => {
        $crate::ServiceError::constraint(format!($($arg)*))
    };
}

/// Returns `true` if the first recognized error in the chain is the not-found sentinel.
///
/// Read-through callers use this to tell a cache miss from a failing backend.
#[must_use]
pub fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.chain().find_map(|layer| layer.downcast_ref::<ServiceError>()),
        Some(ServiceError::NotFound)
    )
}
