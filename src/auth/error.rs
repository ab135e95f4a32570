//! Error types for the identity core.

use std::fmt;

use http::StatusCode;
use tracing::error;

/// Failures of the token codec.
///
/// The variants are kept distinct so callers can tell "log in again" apart
/// from "malformed request", even though the extractor collapses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The signature does not match the header and payload.
    InvalidSignature,
    /// `exp` is in the past.
    Expired,
    /// `nbf` is in the future.
    NotYetValid,
    /// The token is structurally broken or carries unacceptable claims.
    Malformed(String),
    /// Signing failed.
    Encoding(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "Token signature is invalid"),
            Self::Expired => write!(f, "Token has expired"),
            Self::NotYetValid => write!(f, "Token is not valid yet"),
            Self::Malformed(msg) => write!(f, "Malformed token: {}", msg),
            Self::Encoding(msg) => write!(f, "Token encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

/// Errors returned by identity operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing, invalid or expired session token.
    Unauthenticated,
    /// Valid identity that may not perform the operation.
    Unauthorized,
    /// The caller has no binding to the requested resource.
    NotFound(String),
    /// Verification token mismatch, reuse or expiry.
    InvalidToken,
    /// No account for the given email.
    UserNotFound,
    /// Unknown email or wrong password at login.
    InvalidCredentials,
    /// Registration with an email that already has an account.
    EmailTaken,
    /// Request data failed validation.
    InvalidInput(String),
    /// Store or codec failure not attributable to the caller.
    Internal,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "Authentication required"),
            Self::Unauthorized => write!(f, "Not allowed to perform this operation"),
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::InvalidToken => write!(f, "Invalid or expired token"),
            Self::UserNotFound => write!(f, "User not found"),
            Self::InvalidCredentials => write!(f, "Invalid email or password"),
            Self::EmailTaken => write!(f, "Email is already registered"),
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::Internal => write!(f, "Internal server error"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Result type for identity operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err)
    }
}

impl AuthError {
    /// Log the backend detail and return the detail-free `Internal` error.
    pub fn internal(err: impl fmt::Display) -> Self {
        error!(error = %err, "internal identity error");
        Self::Internal
    }

    /// Stable machine-readable code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::InvalidToken => "invalid_token",
            Self::UserNotFound => "user_not_found",
            Self::InvalidCredentials => "invalid_credentials",
            Self::EmailTaken => "email_taken",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::InvalidToken | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::EmailTaken => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        assert_eq!(
            AuthError::Unauthenticated.to_string(),
            "Authentication required"
        );
        assert_eq!(AuthError::InvalidToken.to_string(), "Invalid or expired token");
        assert_eq!(
            AuthError::NotFound("school s1".to_string()).to_string(),
            "Not found: school s1"
        );
    }

    #[test]
    fn test_internal_hides_detail() {
        let err: AuthError = anyhow::anyhow!("connection refused on 10.0.0.3:8000").into();
        assert_eq!(err, AuthError::Internal);
        assert!(!err.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuthError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::Unauthorized.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AuthError::InvalidToken.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::EmailTaken.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::Internal.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_token_error_display() {
        assert_eq!(TokenError::Expired.to_string(), "Token has expired");
        assert_eq!(
            TokenError::Malformed("bad json".into()).to_string(),
            "Malformed token: bad json"
        );
    }
}
