//! Error classification shared by the API crates.
//!
//! Every crate defines its own error enum; [`ErrorCode`] is the common
//! vocabulary used to surface those errors to RPC callers. The codes follow
//! the connect/gRPC status names.
//!
//! | Error | `ErrorCode` | HTTP |
//! |---|---|---|
//! | no caller identity | `Unauthenticated` | 401 |
//! | access review denied | `PermissionDenied` | 403 |
//! | invalid policy rule | `InvalidArgument` | 400 |
//! | access review failed | `Internal` | 500 |
//! | call cancelled | `Canceled` | 499 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes surfaced to RPC callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The call was cancelled by the caller.
    Canceled,
    /// The request was malformed.
    InvalidArgument,
    /// The target object does not exist.
    NotFound,
    /// The target object already exists.
    AlreadyExists,
    /// The caller may not perform the operation.
    PermissionDenied,
    /// The caller could not be identified.
    Unauthenticated,
    /// The operation is not supported by the backend.
    Unimplemented,
    /// Something failed that the caller cannot fix.
    Internal,
}

impl ErrorCode {
    /// Returns the wire name of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::Unauthenticated => "unauthenticated",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
        }
    }

    /// Returns the HTTP status used when the code is sent over plain HTTP.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self {
            // 499 is the de facto "client closed request" status.
            Self::Canceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists => StatusCode::CONFLICT,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by error types that can be surfaced to RPC callers.
pub trait CodedError: std::error::Error {
    /// Returns the status code for this error.
    fn code(&self) -> ErrorCode;

    /// Builds the serializable envelope for this error.
    fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Serializable error body returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The status code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Denied;

    impl fmt::Display for Denied {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("denied")
        }
    }

    impl std::error::Error for Denied {}

    impl CodedError for Denied {
        fn code(&self) -> ErrorCode {
            ErrorCode::PermissionDenied
        }
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::PermissionDenied.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::Internal.http_status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::Canceled.http_status().as_u16(), 499);
    }

    #[test]
    fn test_envelope() {
        let envelope = Denied.envelope();
        assert_eq!(envelope.code, ErrorCode::PermissionDenied);
        assert_eq!(envelope.message, "denied");

        let json = serde_json::to_string(&envelope).expect("serialization should work");
        assert_eq!(json, r#"{"code":"permission_denied","message":"denied"}"#);
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(ErrorCode::InvalidArgument.to_string(), "invalid_argument");
    }
}
