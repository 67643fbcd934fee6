//! Error types for the authorization crate.

use kargo_core::{CodedError, ErrorCode};
use thiserror::Error;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Result type for privileged cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors returned by the authorization core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The call carries no caller identity.
    #[error("not allowed: request carries no caller identity")]
    NotAllowed,

    /// The caller may not perform the operation.
    #[error("forbidden: caller cannot {verb} {resource}{}: {reason}", display_name(.name))]
    Forbidden {
        /// The verb that was checked.
        verb: String,
        /// The resource (and sub-resource) that was checked.
        resource: String,
        /// The object name, empty for collection operations.
        name: String,
        /// Reason given by the access review backend.
        reason: String,
    },

    /// The access review itself failed.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// The call was cancelled while a decision was pending.
    #[error("request cancelled")]
    Cancelled,

    /// A type was used that was never registered with the scheme.
    #[error("no kind registered for type {type_name}")]
    UnregisteredType {
        /// Rust type name.
        type_name: &'static str,
    },

    /// The privileged operation failed after authorization succeeded.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Converting between typed and dynamic objects failed.
    #[error("object conversion failed: {0}")]
    Conversion(#[from] serde_json::Error),
}

fn display_name(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!(" {name:?}")
    }
}

impl AuthzError {
    /// Create a forbidden error.
    pub fn forbidden(
        verb: impl Into<String>,
        resource: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Forbidden {
            verb: verb.into(),
            resource: resource.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a not-allowed error.
    pub const fn is_not_allowed(&self) -> bool {
        matches!(self, Self::NotAllowed)
    }

    /// Check if this is a forbidden error.
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Check if this is an internal error.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Check if this is a cancellation.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Label used for the `outcome` metric dimension.
    pub(crate) const fn outcome_label(&self) -> &'static str {
        match self {
            Self::NotAllowed => "not_allowed",
            Self::Forbidden { .. } => "forbidden",
            Self::Cancelled => "cancelled",
            _ => "error",
        }
    }
}

impl CodedError for AuthzError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::NotAllowed => ErrorCode::Unauthenticated,
            Self::Forbidden { .. } => ErrorCode::PermissionDenied,
            Self::Cancelled => ErrorCode::Canceled,
            Self::Cluster(err) => err.code(),
            Self::Internal { .. } | Self::UnregisteredType { .. } | Self::Conversion(_) => {
                ErrorCode::Internal
            }
        }
    }
}

/// Errors returned by a [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// The object does not exist.
    #[error("{resource} {name:?} not found")]
    NotFound {
        /// Plural resource name.
        resource: String,
        /// Object name.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{resource} {name:?} already exists")]
    AlreadyExists {
        /// Plural resource name.
        resource: String,
        /// Object name.
        name: String,
    },

    /// The object is malformed for the requested operation.
    #[error("invalid object: {0}")]
    Invalid(String),

    /// The backend does not support the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Error from the Kubernetes API.
    #[error(transparent)]
    Kube(#[from] kube::Error),

    /// Serialization of an object or patch failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            name: name.into(),
        }
    }

    /// Check if this is a not found error, from any backend.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

impl CodedError for ClusterError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::Invalid(_) => ErrorCode::InvalidArgument,
            Self::Unsupported(_) => ErrorCode::Unimplemented,
            Self::Kube(kube::Error::Api(resp)) => match resp.code {
                400 | 422 => ErrorCode::InvalidArgument,
                403 => ErrorCode::PermissionDenied,
                404 => ErrorCode::NotFound,
                409 => ErrorCode::AlreadyExists,
                _ => ErrorCode::Internal,
            },
            Self::Kube(_) | Self::Serialization(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    #[test]
    fn test_forbidden_message() {
        let err = AuthzError::forbidden("get", "stages.kargo.akuity.io", "prod", "no rule");
        assert!(err.is_forbidden());
        assert_eq!(
            err.to_string(),
            r#"forbidden: caller cannot get stages.kargo.akuity.io "prod": no rule"#
        );

        let err = AuthzError::forbidden("list", "stages.kargo.akuity.io", "", "no rule");
        assert_eq!(
            err.to_string(),
            "forbidden: caller cannot list stages.kargo.akuity.io: no rule"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthzError::NotAllowed.code(), ErrorCode::Unauthenticated);
        assert_eq!(
            AuthzError::forbidden("get", "secrets", "x", "").code(),
            ErrorCode::PermissionDenied
        );
        assert_eq!(AuthzError::internal("boom").code(), ErrorCode::Internal);
        assert_eq!(AuthzError::Cancelled.code(), ErrorCode::Canceled);
        assert_eq!(
            AuthzError::from(ClusterError::not_found("stages", "prod")).code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn test_predicates() {
        assert!(AuthzError::NotAllowed.is_not_allowed());
        assert!(AuthzError::internal("x").is_internal());
        assert!(AuthzError::Cancelled.is_cancelled());
        assert!(!AuthzError::Cancelled.is_forbidden());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(AuthzError::NotAllowed.outcome_label(), "not_allowed");
        assert_eq!(AuthzError::internal("x").outcome_label(), "error");
        assert_eq!(AuthzError::Cancelled.outcome_label(), "cancelled");
    }

    #[test]
    fn test_kube_api_error_codes() {
        let err = ClusterError::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "stages.kargo.akuity.io \"prod\" not found".to_string(),
            reason: "NotFound".to_string(),
            code: 404,
        }));
        assert!(err.is_not_found());
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
