//! Structured error taxonomy for the engine.
//!
//! Every public operation returns [`EngineResult`]; callers never see a raw
//! transport error, only a typed `EngineError` with a `kind`, a message, and
//! optional machine-readable `details`.

use std::fmt;
use std::time::Duration;

/// The kind discriminant used by callers to decide how to react
/// (retry, surface to the user, escalate health, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    ZoneOverlap,
    ConnectionFailed,
    PrimaryUnavailable,
    NoHealthyConnection,
    QueryTimeout,
    BatchPartial,
    WebhookDeliveryFailed,
    NotInitialized,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::ZoneOverlap => "ZoneOverlap",
            ErrorKind::ConnectionFailed => "ConnectionFailed",
            ErrorKind::PrimaryUnavailable => "PrimaryUnavailable",
            ErrorKind::NoHealthyConnection => "NoHealthyConnection",
            ErrorKind::QueryTimeout => "QueryTimeout",
            ErrorKind::BatchPartial => "BatchPartial",
            ErrorKind::WebhookDeliveryFailed => "WebhookDeliveryFailed",
            ErrorKind::NotInitialized => "NotInitialized",
        };
        write!(f, "{}", s)
    }
}

/// A structured engine error: `{kind, message, details?}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub retry_after: Option<Duration>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        EngineError {
            kind,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn zone_overlap(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ZoneOverlap, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn primary_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PrimaryUnavailable, message)
    }

    pub fn no_healthy_connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoHealthyConnection, message)
    }

    pub fn query_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueryTimeout, message)
    }

    pub fn batch_partial(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BatchPartial, message)
    }

    pub fn webhook_delivery_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WebhookDeliveryFailed, message)
    }

    pub fn not_initialized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotInitialized, message)
    }

    /// True for errors the governor/dispatcher should retry automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::QueryTimeout | ErrorKind::ConnectionFailed
        )
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, d: Duration) -> Self {
        self.retry_after = Some(d);
        self
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        let kind = match e.kind() {
            IoKind::TimedOut => ErrorKind::QueryTimeout,
            IoKind::ConnectionRefused | IoKind::ConnectionReset | IoKind::NotConnected => {
                ErrorKind::ConnectionFailed
            }
            _ => ErrorKind::ConnectionFailed,
        };
        EngineError::new(kind, e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            EngineError::new(ErrorKind::QueryTimeout, e.to_string())
        } else {
            EngineError::new(ErrorKind::WebhookDeliveryFailed, e.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::new(ErrorKind::Validation, format!("malformed JSON: {e}"))
    }
}

/// Builder for attaching context to an error before it leaves a call site,
/// in the style of the teacher's `ErrorContext`.
pub struct ErrorContext {
    kind: ErrorKind,
    message: String,
    details: Option<serde_json::Value>,
    retry_after: Option<Duration>,
}

impl ErrorContext {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ErrorContext {
            kind,
            message: message.into(),
            details: None,
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, d: Duration) -> Self {
        self.retry_after = Some(d);
        self
    }

    pub fn build(self) -> EngineError {
        EngineError {
            kind: self.kind,
            message: self.message,
            details: self.details,
            retry_after: self.retry_after,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = EngineError::validation("name too short");
        assert_eq!(e.to_string(), "Validation: name too short");
    }

    #[test]
    fn test_error_context_builder() {
        let e = ErrorContext::new(ErrorKind::QueryTimeout, "index did not respond")
            .with_retry_after(Duration::from_millis(500))
            .build();
        assert_eq!(e.kind, ErrorKind::QueryTimeout);
        assert_eq!(e.retry_after, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::query_timeout("x").is_retryable());
        assert!(!EngineError::validation("x").is_retryable());
    }
}
