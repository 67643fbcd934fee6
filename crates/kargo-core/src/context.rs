//! Request context types.
//!
//! The [`RequestContext`] carries the per-call state the authorization core
//! needs: a request ID for log correlation, the caller identity established
//! by the authentication layer, and the call's cancellation signal.

use crate::identity::CallerIdentity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// # Example
///
/// ```
/// use kargo_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique, time-ordered request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call-scoped context handed to every authorization decision.
///
/// A context without an identity represents an unauthenticated call; every
/// authorization check made with it is denied. Cloning a context is cheap and
/// clones share the same identity and cancellation token.
///
/// # Example
///
/// ```
/// use kargo_core::{CallerIdentity, RequestContext};
///
/// let ctx = RequestContext::new()
///     .with_identity(CallerIdentity::admin())
///     .with_procedure("/akuity.io.kargo.service.v1alpha1.KargoService/GetStage");
///
/// assert!(ctx.identity().is_some_and(|id| id.is_admin));
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique identifier for this request.
    request_id: RequestId,

    /// The authenticated identity of the caller, if any.
    identity: Option<Arc<CallerIdentity>>,

    /// The RPC procedure being served.
    procedure: Option<String>,

    /// Fires when the inbound call is cancelled.
    cancellation: CancellationToken,

    /// When the request started processing.
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context with a fresh request ID and no identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            identity: None,
            procedure: None,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the caller identity, if the call was authenticated.
    #[must_use]
    pub fn identity(&self) -> Option<&CallerIdentity> {
        self.identity.as_deref()
    }

    /// Returns a new context carrying the given identity.
    #[must_use]
    pub fn with_identity(mut self, identity: CallerIdentity) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    /// Returns the procedure name if set.
    #[must_use]
    pub fn procedure(&self) -> Option<&str> {
        self.procedure.as_deref()
    }

    /// Returns a new context with the specified procedure name.
    #[must_use]
    pub fn with_procedure(mut self, procedure: impl Into<String>) -> Self {
        self.procedure = Some(procedure.into());
        self
    }

    /// Returns a new context bound to an existing cancellation token, e.g.
    /// one owned by the transport layer.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Returns the cancellation token of this call.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels the call.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Whether the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the call is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    /// Returns the elapsed time since the request started.
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
