use std::fmt;

use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Failure category of a single fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The per-attempt timer fired before a response arrived.
    Timeout,
    /// Connection-level failure.
    Network,
    /// HTTP 5xx.
    Server(u16),
    /// HTTP 429.
    RateLimited,
    /// HTTP 401 - the session has expired.
    Auth,
    /// Any other HTTP 4xx.
    Client(u16),
    /// The response body could not be decoded.
    MalformedResponse,
    /// The owning view went away while the call was in flight.
    Cancelled,
}

impl ErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorKind::Auth,
            429 => ErrorKind::RateLimited,
            500..=599 => ErrorKind::Server(status),
            _ => ErrorKind::Client(status),
        }
    }

    /// Default retry policy: transport trouble and server-side failures are
    /// worth another attempt, anything the server rejected on purpose is not.
    pub fn classification(self) -> Classification {
        match self {
            ErrorKind::Timeout
            | ErrorKind::Network
            | ErrorKind::Server(_)
            | ErrorKind::RateLimited => Classification::Retryable,
            ErrorKind::Auth
            | ErrorKind::Client(_)
            | ErrorKind::MalformedResponse
            | ErrorKind::Cancelled => Classification::Fatal,
        }
    }

    pub fn status(self) -> Option<u16> {
        match self {
            ErrorKind::Server(s) | ErrorKind::Client(s) => Some(s),
            ErrorKind::Auth => Some(401),
            ErrorKind::RateLimited => Some(429),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Network => write!(f, "network error"),
            ErrorKind::Server(s) => write!(f, "server error ({})", s),
            ErrorKind::RateLimited => write!(f, "rate limited"),
            ErrorKind::Auth => write!(f, "session expired"),
            ErrorKind::Client(s) => write!(f, "request rejected ({})", s),
            ErrorKind::MalformedResponse => write!(f, "malformed response"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable,
    Fatal,
}

/// Error produced by one fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "view is no longer active")
    }

    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::new(ErrorKind::from_status(status), truncate_body(body))
    }

    pub fn classification(&self) -> Classification {
        self.kind.classification()
    }
}

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut cut = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
}

/// Final failure of a retried call, tagged with its classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct ClassifiedError {
    pub source: FetchError,
    pub classification: Classification,
    pub attempts: u32,
}

impl ClassifiedError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind
    }

    pub fn is_auth(&self) -> bool {
        self.source.kind == ErrorKind::Auth
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.kind == ErrorKind::Cancelled
    }
}

/// Errors surfaced by the view controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] ClassifiedError),

    #[error("Unknown view: {0}")]
    UnknownView(String),

    #[error("Controller has been torn down")]
    TornDown,
}

impl SyncError {
    /// Kind of the underlying fetch failure, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::Fetch(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Short message suitable for an inline error indicator.
    pub fn user_message(&self) -> String {
        match self.kind() {
            Some(ErrorKind::Auth) => "Session expired - please sign in again".to_string(),
            Some(ErrorKind::Timeout) | Some(ErrorKind::Network) => {
                "Connection problem - showing last loaded data".to_string()
            }
            Some(ErrorKind::Server(_)) | Some(ErrorKind::RateLimited) => {
                "Server unavailable - showing last loaded data".to_string()
            }
            _ => self.to_string(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_mapping() {
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Auth);
        assert_eq!(ErrorKind::from_status(404), ErrorKind::Client(404));
        assert_eq!(ErrorKind::from_status(429), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_status(503), ErrorKind::Server(503));
    }

    #[test]
    fn test_default_classification() {
        assert_eq!(ErrorKind::Timeout.classification(), Classification::Retryable);
        assert_eq!(ErrorKind::Network.classification(), Classification::Retryable);
        assert_eq!(ErrorKind::Server(500).classification(), Classification::Retryable);
        assert_eq!(ErrorKind::Auth.classification(), Classification::Fatal);
        assert_eq!(ErrorKind::Client(400).classification(), Classification::Fatal);
        assert_eq!(ErrorKind::MalformedResponse.classification(), Classification::Fatal);
        assert_eq!(ErrorKind::Cancelled.classification(), Classification::Fatal);
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(2000);
        let err = FetchError::from_status(500, &body);
        assert!(err.message.len() < 600);
        assert!(err.message.contains("2000 total bytes"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let body = "é".repeat(400);
        let err = FetchError::from_status(502, &body);
        assert!(err.message.starts_with('é'));
    }

    #[test]
    fn test_user_message_for_auth() {
        let err = SyncError::Fetch(ClassifiedError {
            source: FetchError::from_status(401, ""),
            classification: Classification::Fatal,
            attempts: 1,
        });
        assert!(err.user_message().contains("sign in"));
    }
}
