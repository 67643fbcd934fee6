//! Error types for policy rule normalization.

use kargo_core::{CodedError, ErrorCode};
use thiserror::Error;

/// Result type for normalization operations.
pub type RbacResult<T> = Result<T, RbacError>;

/// Errors that can occur while normalizing policy rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RbacError {
    /// A rule named a resource type in its singular form.
    #[error("unrecognized resource type {resource:?}; did you mean {suggestion:?}?")]
    SingularResourceType {
        /// The resource type as given.
        resource: String,
        /// The plural form that should have been used.
        suggestion: String,
    },

    /// A rule named a resource type that is not known at all.
    #[error("unrecognized resource type {resource:?}")]
    UnknownResourceType {
        /// The resource type as given.
        resource: String,
    },

    /// A rule listed an empty or blank resource name.
    #[error("empty resource name in rule for {resource:?}")]
    BlankResourceName {
        /// The resource type the name was given for.
        resource: String,
    },
}

impl RbacError {
    /// Create a singular resource type error.
    pub fn singular(resource: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::SingularResourceType {
            resource: resource.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create an unknown resource type error.
    pub fn unknown(resource: impl Into<String>) -> Self {
        Self::UnknownResourceType {
            resource: resource.into(),
        }
    }

    /// Create a blank resource name error.
    pub fn blank_name(resource: impl Into<String>) -> Self {
        Self::BlankResourceName {
            resource: resource.into(),
        }
    }

    /// Returns the corrective suggestion, if there is one.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::SingularResourceType { suggestion, .. } => Some(suggestion),
            Self::UnknownResourceType { .. } | Self::BlankResourceName { .. } => None,
        }
    }
}

impl CodedError for RbacError {
    fn code(&self) -> ErrorCode {
        ErrorCode::InvalidArgument
    }
}
