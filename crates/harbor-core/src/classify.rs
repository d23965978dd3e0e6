//! Error classification.
//!
//! [`Classifier::classify`] turns an arbitrary `anyhow::Error` into a
//! [`ClassifiedError`]: the taxonomy kind, the status code and message shown
//! to callers, whether the error deserves a log line, and the full cause chain
//! plus a few stack frames for that log line.
//!
//! The cause chain is walked from the outermost context layer inwards and the
//! first recognized layer decides the outcome. Recognized layers are
//! [`ServiceError`], `tokio::time::error::Elapsed` and `std::io::Error` with
//! kind `TimedOut`. Anything else ends up as [`ErrorKind::Internal`].
//!
//! # Example
//!
//! ```
//! use anyhow::Context;
//! use harbor_core::{Classifier, ErrorKind, ServiceError};
//!
//! let err = anyhow::Error::new(ServiceError::NotFound).context("loading article 42");
//! let classified = Classifier::new().classify(&err);
//!
//! assert_eq!(classified.kind, ErrorKind::NotFound);
//! assert_eq!(classified.status.as_u16(), 404);
//! assert_eq!(classified.body(), r#"{"message":"not found"}"#);
//! assert!(!classified.should_log);
//! ```

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use http::StatusCode;

use crate::error::{ErrorKind, ServiceError};

/// Number of stack frames kept for the log line by default.
pub const DEFAULT_MAX_FRAMES: usize = 3;

/// Message shown to callers for unclassified errors.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// The normalized outcome of classifying one error.
///
/// `cause` and `frames` are meant for the log sink only and never end up in a
/// response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Status code to respond with.
    pub status: StatusCode,
    /// Message safe to show to the caller.
    pub public_message: String,
    /// Whether one error log line should be emitted.
    pub should_log: bool,
    /// Every layer of the cause chain, outermost first, joined with `": "`.
    pub cause: String,
    /// Up to `max_frames` captured stack frames.
    pub frames: Vec<String>,
}

impl ClassifiedError {
    /// Returns the JSON response body, `{"message": <public message>}`.
    #[must_use]
    pub fn body(&self) -> String {
        serde_json::json!({ "message": self.public_message }).to_string()
    }
}

/// Maps errors onto the taxonomy.
///
/// The classifier holds no mutable state, so classifying the same error
/// twice always yields equal results.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Echo the innermost cause of internal errors to callers.
    expose_internal_errors: bool,
    /// Message used for internal errors when not exposing them.
    internal_error_message: String,
    /// Maximum number of stack frames kept.
    max_frames: usize,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Creates a classifier that hides internal error details.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expose_internal_errors: false,
            internal_error_message: INTERNAL_ERROR_MESSAGE.to_string(),
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }

    /// Sets whether the innermost cause of internal errors is shown to callers.
    ///
    /// **Warning**: only enable this in development environments.
    #[must_use]
    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// Sets the message shown for internal errors.
    #[must_use]
    pub fn internal_error_message(mut self, message: impl Into<String>) -> Self {
        self.internal_error_message = message.into();
        self
    }

    /// Sets the maximum number of stack frames kept for logs.
    #[must_use]
    pub fn max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Returns whether internal error details are exposed.
    #[must_use]
    pub fn exposes_internal_errors(&self) -> bool {
        self.expose_internal_errors
    }

    /// Classifies an error.
    #[must_use]
    pub fn classify(&self, err: &anyhow::Error) -> ClassifiedError {
        let (kind, status, public_message, should_log) = match recognize(err) {
            Recognized::Service(ServiceError::Cancelled(reason)) => (
                ErrorKind::Timeout,
                StatusCode::REQUEST_TIMEOUT,
                reason.to_string(),
                false,
            ),
            Recognized::Service(ServiceError::NotFound) => (
                ErrorKind::NotFound,
                StatusCode::NOT_FOUND,
                ServiceError::NotFound.to_string(),
                false,
            ),
            Recognized::Service(ServiceError::Constraint { message }) => (
                ErrorKind::Constraint,
                StatusCode::BAD_REQUEST,
                message.clone(),
                false,
            ),
            Recognized::Service(ServiceError::Status { status, message }) => (
                ErrorKind::from_status(*status),
                *status,
                message.clone(),
                status.is_server_error(),
            ),
            Recognized::Timeout(layer) => (
                ErrorKind::Timeout,
                StatusCode::REQUEST_TIMEOUT,
                layer.to_string(),
                false,
            ),
            Recognized::Unknown(root) => {
                let message = if self.expose_internal_errors {
                    root.to_string()
                } else {
                    self.internal_error_message.clone()
                };
                (
                    ErrorKind::Internal,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    message,
                    true,
                )
            }
        };

        ClassifiedError {
            kind,
            status,
            public_message,
            should_log,
            cause: format!("{err:#}"),
            frames: capture_frames(err.backtrace(), self.max_frames),
        }
    }
}

/// Classifies an error with the default (hardened) classifier.
#[must_use]
pub fn classify(err: &anyhow::Error) -> ClassifiedError {
    Classifier::new().classify(err)
}

/// The first recognized layer of a cause chain.
enum Recognized<'a> {
    Service(&'a ServiceError),
    Timeout(&'a (dyn StdError + 'static)),
    Unknown(&'a (dyn StdError + 'static)),
}

fn recognize(err: &anyhow::Error) -> Recognized<'_> {
    for layer in err.chain() {
        if let Some(service) = layer.downcast_ref::<ServiceError>() {
            return Recognized::Service(service);
        }
        if layer.is::<tokio::time::error::Elapsed>() {
            return Recognized::Timeout(layer);
        }
        if let Some(io) = layer.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return Recognized::Timeout(layer);
            }
        }
    }

    // `chain()` always yields at least the error itself.
    let root = err.chain().last().unwrap_or_else(|| err.as_ref());
    Recognized::Unknown(root)
}

/// Extracts up to `max` frames from a captured backtrace.
///
/// Frames belonging to the backtrace machinery itself are skipped so the
/// first kept frame is the one that created the error.
fn capture_frames(backtrace: &Backtrace, max: usize) -> Vec<String> {
    if max == 0 || backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }

    let rendered = backtrace.to_string();
    let mut frames = Vec::with_capacity(max);
    let mut lines = rendered.lines().peekable();

    while let Some(line) = lines.next() {
        let Some((index, symbol)) = line.trim_start().split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }

        let mut frame = symbol.to_string();
        if let Some(location) = lines
            .peek()
            .and_then(|next| next.trim_start().strip_prefix("at "))
        {
            frame.push_str(" at ");
            frame.push_str(location);
            lines.next();
        }

        if is_machinery_frame(symbol) {
            continue;
        }
        frames.push(frame);
        if frames.len() == max {
            break;
        }
    }

    frames
}

fn is_machinery_frame(symbol: &str) -> bool {
    ["std::backtrace", "anyhow::", "<anyhow::", "core::ops::function"]
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint;
    use anyhow::{anyhow, Context};
    use proptest::prelude::*;
    use std::time::Duration;

    fn wrapped_three_deep() -> anyhow::Error {
        anyhow!("unexpected error")
            .context("first layer")
            .context("second layer")
            .context("third layer")
    }

    #[test]
    fn test_deadline_exceeded_is_timeout() {
        let classified = classify(&ServiceError::deadline_exceeded().into());
        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert_eq!(classified.status, StatusCode::REQUEST_TIMEOUT);
        assert!(!classified.should_log);
    }

    #[test]
    fn test_canceled_is_timeout() {
        let err = anyhow::Error::new(ServiceError::canceled()).context("calling downstream");
        let classified = classify(&err);
        assert_eq!(classified.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(classified.public_message, "request canceled");
        assert!(!classified.should_log);
    }

    #[tokio::test]
    async fn test_tokio_elapsed_is_timeout() {
        let elapsed = tokio::time::timeout(Duration::from_millis(1), std::future::pending::<()>())
            .await
            .unwrap_err();
        let classified = classify(&anyhow::Error::new(elapsed).context("slow operation"));
        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert_eq!(classified.status, StatusCode::REQUEST_TIMEOUT);
        assert!(!classified.should_log);
    }

    #[test]
    fn test_io_timed_out_is_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let classified = classify(&anyhow::Error::new(io));
        assert_eq!(classified.kind, ErrorKind::Timeout);
        assert_eq!(classified.public_message, "read timed out");
    }

    #[test]
    fn test_not_found_sentinel_body() {
        let classified = classify(&ServiceError::NotFound.into());
        assert_eq!(classified.status, StatusCode::NOT_FOUND);
        assert_eq!(classified.body(), r#"{"message":"not found"}"#);
        assert!(!classified.should_log);
    }

    #[test]
    fn test_constraint_message_passes_through() {
        let classified = classify(&constraint!("invalid int: {}", "a").into());
        assert_eq!(classified.kind, ErrorKind::Constraint);
        assert_eq!(classified.status, StatusCode::BAD_REQUEST);
        assert_eq!(classified.public_message, "invalid int: a");
        assert!(!classified.should_log);
    }

    #[test]
    fn test_status_error_logs_only_server_errors() {
        let bad_gateway =
            classify(&ServiceError::status(StatusCode::BAD_GATEWAY, "bad gateway error").into());
        assert_eq!(bad_gateway.status, StatusCode::BAD_GATEWAY);
        assert_eq!(bad_gateway.public_message, "bad gateway error");
        assert!(bad_gateway.should_log);

        let conflict =
            classify(&ServiceError::status(StatusCode::CONFLICT, "already exists").into());
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.kind, ErrorKind::Constraint);
        assert!(!conflict.should_log);
    }

    #[test]
    fn test_unclassified_error_is_hardened() {
        let classified = classify(&wrapped_three_deep());
        assert_eq!(classified.kind, ErrorKind::Internal);
        assert_eq!(classified.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(classified.public_message, INTERNAL_ERROR_MESSAGE);
        assert!(classified.should_log);
    }

    #[test]
    fn test_unclassified_error_exposes_innermost_cause_only() {
        let classified = Classifier::new()
            .expose_internal_errors(true)
            .classify(&wrapped_three_deep());
        assert_eq!(classified.body(), r#"{"message":"unexpected error"}"#);
    }

    #[test]
    fn test_cause_keeps_every_layer() {
        let classified = classify(&wrapped_three_deep());
        for part in ["third layer", "second layer", "first layer", "unexpected error"] {
            assert!(classified.cause.contains(part), "missing {part} in {}", classified.cause);
        }
        assert!(!classified.body().contains("layer"));
    }

    #[test]
    fn test_first_recognized_layer_wins() {
        let err = anyhow::Error::new(ServiceError::NotFound)
            .context(ServiceError::constraint("bad id"))
            .context("handler");
        let classified = classify(&err);
        assert_eq!(classified.kind, ErrorKind::Constraint);
        assert_eq!(classified.public_message, "bad id");
    }

    #[test]
    fn test_custom_internal_message() {
        let classified = Classifier::new()
            .internal_error_message("something broke")
            .classify(&anyhow!("db down"));
        assert_eq!(classified.public_message, "something broke");
    }

    #[test]
    fn test_frames_bounded() {
        let classified = Classifier::new().max_frames(3).classify(&wrapped_three_deep());
        assert!(classified.frames.len() <= 3);

        let none = Classifier::new().max_frames(0).classify(&wrapped_three_deep());
        assert!(none.frames.is_empty());
    }

    #[test]
    fn test_capture_frames_skips_uncaptured() {
        assert!(capture_frames(&Backtrace::disabled(), 3).is_empty());
    }

    proptest! {
        #[test]
        fn prop_classification_is_idempotent(
            message in ".*",
            layers in proptest::collection::vec("[a-z ]{1,16}", 0..4),
            kind in 0u8..4,
        ) {
            let mut err: anyhow::Error = match kind {
                0 => ServiceError::constraint(message.clone()).into(),
                1 => ServiceError::NotFound.into(),
                2 => ServiceError::deadline_exceeded().into(),
                _ => anyhow!(message.clone()),
            };
            for layer in layers {
                err = err.context(layer);
            }

            let classifier = Classifier::new();
            prop_assert_eq!(classifier.classify(&err), classifier.classify(&err));
        }
    }
}
