//! Test fixtures for code that depends on an [`AccessReviewer`].
//!
//! ```
//! use kargo_authz::fixtures::{ScriptedResponse, ScriptedReviewer};
//! use kargo_core::ServiceAccountRef;
//!
//! let sa = ServiceAccountRef::new("kargo-demo", "promoter");
//! let reviewer = ScriptedReviewer::new()
//!     .respond_to_service_account(&sa, ScriptedResponse::Allow)
//!     .respond_to_token("alice-token", ScriptedResponse::Forbid);
//! assert_eq!(reviewer.call_count(), 0);
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use kargo_core::ServiceAccountRef;
use parking_lot::Mutex;

use crate::review::{AccessReviewer, ResourceAttributes, ReviewError, ReviewSubject};

/// What a [`ScriptedReviewer`] answers for a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    /// The review succeeds.
    Allow,
    /// The review is denied.
    Forbid,
    /// The review fails with a backend error.
    Fail(String),
    /// The review never completes.
    Hang,
}

/// A review the [`ScriptedReviewer`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewCall {
    /// The subject key: a service account username or `token:<token>`.
    pub subject: String,
    /// The attributes that were reviewed.
    pub attributes: ResourceAttributes,
}

/// An [`AccessReviewer`] answering from a script and recording every call.
#[derive(Debug)]
pub struct ScriptedReviewer {
    responses: HashMap<String, ScriptedResponse>,
    default: ScriptedResponse,
    calls: Mutex<Vec<ReviewCall>>,
}

impl Default for ScriptedReviewer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedReviewer {
    /// Creates a reviewer that denies every subject.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            default: ScriptedResponse::Forbid,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the answer for subjects without a scripted response.
    pub fn with_default(mut self, response: ScriptedResponse) -> Self {
        self.default = response;
        self
    }

    /// Scripts the answer for impersonated reviews as `sa`.
    pub fn respond_to_service_account(
        mut self,
        sa: &ServiceAccountRef,
        response: ScriptedResponse,
    ) -> Self {
        self.responses.insert(sa.username(), response);
        self
    }

    /// Scripts the answer for self reviews with `token`.
    pub fn respond_to_token(mut self, token: &str, response: ScriptedResponse) -> Self {
        self.responses.insert(token_key(token), response);
        self
    }

    /// Every review received so far, in order.
    pub fn calls(&self) -> Vec<ReviewCall> {
        self.calls.lock().clone()
    }

    /// The subject keys of every review received so far, in order.
    pub fn subjects(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.subject.clone()).collect()
    }

    /// Number of reviews received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

fn token_key(token: &str) -> String {
    format!("token:{token}")
}

#[async_trait]
impl AccessReviewer for ScriptedReviewer {
    async fn review(
        &self,
        attributes: &ResourceAttributes,
        subject: &ReviewSubject,
    ) -> Result<(), ReviewError> {
        let key = match subject {
            ReviewSubject::ServiceAccount(sa) => sa.username(),
            ReviewSubject::BearerToken(token) => token_key(token),
        };
        let response = self
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        self.calls.lock().push(ReviewCall {
            subject: key,
            attributes: attributes.clone(),
        });

        match response {
            ScriptedResponse::Allow => Ok(()),
            ScriptedResponse::Forbid => Err(ReviewError::forbidden("scripted denial")),
            ScriptedResponse::Fail(message) => Err(ReviewError::backend(message)),
            ScriptedResponse::Hang => std::future::pending().await,
        }
    }
}
