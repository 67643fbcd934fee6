//! The access review seam.
//!
//! An [`AccessReviewer`] asks the cluster's authorizer whether a subject may
//! perform a verb on a resource. A denial is an expected answer and is
//! reported as [`ReviewError::Forbidden`]; anything else that goes wrong is
//! [`ReviewError::Backend`].

use std::fmt;

use async_trait::async_trait;
use kargo_core::ServiceAccountRef;
use thiserror::Error;

use crate::descriptor::{ObjectKey, ResourceDescriptor};
use crate::verb::Verb;

/// The attributes of the request being reviewed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceAttributes {
    /// Verb, e.g. `get`.
    pub verb: String,
    /// API group, empty for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Plural resource name.
    pub resource: String,
    /// Sub-resource, empty for the main resource.
    pub subresource: String,
    /// Target namespace, empty for cluster-scoped resources.
    pub namespace: String,
    /// Target name, empty for collection operations.
    pub name: String,
}

impl ResourceAttributes {
    /// Builds the attributes for an operation.
    pub fn new(verb: &Verb, descriptor: &ResourceDescriptor, key: &ObjectKey) -> Self {
        Self {
            verb: verb.as_str().to_string(),
            group: descriptor.group().to_string(),
            version: descriptor.version().to_string(),
            resource: descriptor.resource().to_string(),
            subresource: descriptor.subresource().to_string(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        }
    }
}

/// Who a review is evaluated for.
#[derive(Clone, PartialEq, Eq)]
pub enum ReviewSubject {
    /// Impersonated review: would this service account be allowed?
    ServiceAccount(ServiceAccountRef),
    /// Self review: would the presenter of this bearer token be allowed?
    BearerToken(String),
}

impl ReviewSubject {
    /// Label used for the `subject` metric dimension.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::ServiceAccount(_) => "service_account",
            Self::BearerToken(_) => "caller",
        }
    }
}

impl fmt::Debug for ReviewSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(sa) => f.debug_tuple("ServiceAccount").field(sa).finish(),
            Self::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
        }
    }
}

/// Failure of a single access review.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    /// The subject is not allowed.
    #[error("access review denied{}", reason_suffix(.reason))]
    Forbidden {
        /// Reason given by the authorizer, possibly empty.
        reason: String,
    },

    /// The review could not be performed.
    #[error("access review failed: {message}")]
    Backend {
        /// Error message.
        message: String,
    },
}

fn reason_suffix(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

impl ReviewError {
    /// Create a forbidden result.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Check if this is a denial.
    pub const fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}

/// Performs access reviews against the cluster's authorizer.
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    /// Returns `Ok(())` if `subject` may perform the request described by
    /// `attributes`.
    async fn review(
        &self,
        attributes: &ResourceAttributes,
        subject: &ReviewSubject,
    ) -> Result<(), ReviewError>;
}
