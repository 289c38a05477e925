//! Error types
//!
//! [`AuthError`] is the caller-facing taxonomy. Every validation step returns
//! exactly one variant so the boundary layer can pick a response without
//! inspecting internals. `Display` is precise and meant for logs; use
//! [`AuthError::public_message`] for response bodies.

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Result alias used throughout the crate
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication, abuse-control and OAuth exchange errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Token is not three base64url segments or a required claim is missing
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Signature does not verify under any known key
    #[error("Invalid token signature")]
    InvalidSignature,

    /// `now` is at or past the token's `exp`
    #[error("Token expired")]
    Expired,

    /// Token id (or the device behind the subject) has been revoked
    #[error("Token revoked")]
    Revoked,

    /// Token lacks one or more required scopes
    #[error("Insufficient scope, missing: {}", missing.join(" "))]
    InsufficientScope {
        /// Scopes that were required but not granted
        missing: Vec<String>,
    },

    /// Subject denotes a device that is unknown or revoked
    #[error("Unknown or inactive subject: {0}")]
    UnknownSubject(String),

    /// Client exceeded its admission budget
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Time until at least one request will be admitted
        retry_after: Duration,
    },

    /// No pending authorization for the returned state
    #[error("Unknown authorization state")]
    UnknownState,

    /// Pending authorization outlived its timeout
    #[error("Authorization state expired")]
    StateExpired,

    /// Provider rejected the code or returned an unusable response
    #[error("Authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    /// Provider did not answer within the caller-supplied bound
    #[error("Authorization code exchange timed out after {0:?}")]
    ExchangeTimeout(Duration),

    /// Pending authorization store is full
    #[error("Too many pending authorizations (limit {0})")]
    TooManyPendingAuthorizations(usize),

    /// An already-rotated refresh token was presented again
    #[error("Refresh token reuse detected")]
    ReuseDetected,

    /// An unrevoked device with the same fingerprint exists
    #[error("Device fingerprint already registered: {0}")]
    DuplicateFingerprint(String),

    /// Device id was never registered
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Refresh token used as a bearer token, or the reverse
    #[error("Wrong token kind: expected {expected}")]
    WrongTokenKind {
        /// Kind the operation required
        expected: &'static str,
    },

    /// Caller input rejected before any state was touched
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Signing or serialization failure (never produced by validation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether this error is one of the bearer-token failures
    pub fn is_token_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::InvalidSignature
                | Self::Expired
                | Self::Revoked
                | Self::ReuseDetected
                | Self::WrongTokenKind { .. }
                | Self::UnknownSubject(_)
        )
    }

    /// HTTP status the boundary layer should answer with
    pub fn status_code(&self) -> StatusCode {
        match self {
            e if e.is_token_failure() => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UnknownState
            | Self::StateExpired
            | Self::InvalidRequest(_)
            | Self::DuplicateFingerprint(_) => StatusCode::BAD_REQUEST,
            Self::UnknownDevice(_) => StatusCode::NOT_FOUND,
            Self::ExchangeFailed(_) => StatusCode::BAD_GATEWAY,
            Self::ExchangeTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::TooManyPendingAuthorizations(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Response-body message
    ///
    /// All token failures share one message so a client cannot tell an
    /// expired token from a revoked or forged one.
    pub fn public_message(&self) -> &'static str {
        match self {
            e if e.is_token_failure() => "invalid or expired credentials",
            Self::InsufficientScope { .. } => "insufficient scope",
            Self::RateLimited { .. } => "too many requests",
            Self::UnknownState | Self::StateExpired => "authorization request not found or expired",
            Self::ExchangeFailed(_) | Self::ExchangeTimeout(_) => "authorization provider unavailable",
            Self::InvalidRequest(_) | Self::DuplicateFingerprint(_) => "invalid request",
            Self::UnknownDevice(_) => "device not found",
            Self::TooManyPendingAuthorizations(_) => "authorization temporarily unavailable",
            _ => "internal error",
        }
    }

    /// Retry hint for rate-limited requests
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Source could not be read or deserialized
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A field holds an unusable value
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid {
        /// Dotted field path
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_failures_share_public_message() {
        let failures = [
            AuthError::MalformedToken("x".into()),
            AuthError::InvalidSignature,
            AuthError::Expired,
            AuthError::Revoked,
            AuthError::ReuseDetected,
        ];

        for err in &failures {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
            assert_eq!(err.public_message(), failures[0].public_message());
        }
    }

    #[test]
    fn test_rate_limited_maps_to_429_with_hint() {
        let err = AuthError::RateLimited {
            retry_after: Duration::from_secs(6),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(6)));
        assert_eq!(AuthError::Expired.retry_after(), None);
    }

    #[test]
    fn test_insufficient_scope_display_lists_missing() {
        let err = AuthError::InsufficientScope {
            missing: vec!["admin".into(), "export:delete".into()],
        };
        assert_eq!(err.to_string(), "Insufficient scope, missing: admin export:delete");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }
}
