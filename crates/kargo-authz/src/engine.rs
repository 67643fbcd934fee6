//! The per-call authorization decision.
//!
//! ```text
//!   no identity ─────────────────────────────► NotAllowed
//!   is_admin ────────────────────────────────► Grant::Admin
//!   "sub" claim ─► for ns in [key ns] ++ global:
//!                    for sa of caller in ns:
//!                      review as sa ── ok ───► Grant::ServiceAccount
//!                                  ── denied ► next
//!                                  ── error ─► Internal
//!   self review with bearer token ── ok ─────► Grant::Caller
//!                                 ── denied ─► Forbidden
//!                                 ── error ──► Internal
//! ```
//!
//! Nothing is cached: permissions may change between two calls of the same
//! session, so every operation gets a fresh decision.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexSet;
use kargo_core::{RequestContext, ServiceAccountRef};
use kargo_telemetry::metrics::{record_access_review, record_authz_decision};
use tracing::{debug, info, instrument, warn};

use crate::descriptor::{ObjectKey, ResourceDescriptor};
use crate::error::{AuthzError, AuthzResult};
use crate::review::{AccessReviewer, ResourceAttributes, ReviewError, ReviewSubject};
use crate::verb::Verb;

/// The basis on which an operation was allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// The caller is an administrator; no review was performed.
    Admin,
    /// An impersonated review as this service account succeeded.
    ServiceAccount(ServiceAccountRef),
    /// A self review with the caller's own token succeeded.
    Caller,
    /// Authorization is disabled for this client.
    Unchecked,
}

impl Grant {
    /// Label used for the `basis` metric dimension.
    pub const fn basis(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::ServiceAccount(_) => "service_account",
            Self::Caller => "caller",
            Self::Unchecked => "unchecked",
        }
    }
}

enum Verdict {
    Allowed,
    Denied(String),
}

/// Decides whether the caller attached to a request may perform an
/// operation.
pub struct DecisionEngine {
    reviewer: Arc<dyn AccessReviewer>,
    global_namespaces: IndexSet<String>,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("global_namespaces", &self.global_namespaces)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Creates an engine.
    ///
    /// `global_namespaces` are searched, in order, for service accounts
    /// after the target object's own namespace. Duplicates and empty names
    /// are ignored.
    pub fn new<I, S>(reviewer: Arc<dyn AccessReviewer>, global_namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reviewer,
            global_namespaces: global_namespaces
                .into_iter()
                .map(Into::into)
                .filter(|ns: &String| !ns.is_empty())
                .collect(),
        }
    }

    /// The global service account namespaces, in search order.
    pub fn global_namespaces(&self) -> impl Iterator<Item = &str> {
        self.global_namespaces.iter().map(String::as_str)
    }

    /// Decides whether the caller of `ctx` may perform `verb` on the object
    /// identified by `descriptor` and `key`.
    #[instrument(
        name = "authz.decide",
        skip_all,
        fields(
            request_id = %ctx.request_id(),
            verb = %verb,
            resource = %descriptor,
            namespace = %key.namespace,
            name = %key.name,
        )
    )]
    pub async fn decide(
        &self,
        ctx: &RequestContext,
        verb: &Verb,
        descriptor: &ResourceDescriptor,
        key: &ObjectKey,
    ) -> AuthzResult<Grant> {
        let result = self.evaluate(ctx, verb, descriptor, key).await;
        match &result {
            Ok(grant) => {
                debug!(basis = grant.basis(), grant = ?grant, "access allowed");
                record_authz_decision("allowed", grant.basis());
            }
            Err(err) if err.is_internal() => {
                warn!(error = %err, "access decision failed");
                record_authz_decision(err.outcome_label(), "none");
            }
            Err(err) => {
                info!(error = %err, "access denied");
                record_authz_decision(err.outcome_label(), "none");
            }
        }
        result
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        verb: &Verb,
        descriptor: &ResourceDescriptor,
        key: &ObjectKey,
    ) -> AuthzResult<Grant> {
        let Some(identity) = ctx.identity() else {
            return Err(AuthzError::NotAllowed);
        };
        if identity.is_admin {
            return Ok(Grant::Admin);
        }

        let attributes = ResourceAttributes::new(verb, descriptor, key);

        if identity.has_subject_claim() {
            for namespace in self.candidate_namespaces(&key.namespace) {
                for sa in identity.service_accounts_in(namespace) {
                    let subject = ReviewSubject::ServiceAccount(sa.clone());
                    match self.review(ctx, &attributes, &subject).await? {
                        Verdict::Allowed => return Ok(Grant::ServiceAccount(sa.clone())),
                        Verdict::Denied(reason) => {
                            debug!(service_account = %sa, %reason, "impersonated review denied");
                        }
                    }
                }
            }
        }

        let token = identity.bearer_token();
        if token.is_empty() {
            return Err(AuthzError::forbidden(
                verb.as_str(),
                descriptor.to_string(),
                &key.name,
                "no bearer token to review",
            ));
        }
        match self
            .review(ctx, &attributes, &ReviewSubject::BearerToken(token.to_string()))
            .await?
        {
            Verdict::Allowed => Ok(Grant::Caller),
            Verdict::Denied(reason) => Err(AuthzError::forbidden(
                verb.as_str(),
                descriptor.to_string(),
                &key.name,
                reason,
            )),
        }
    }

    /// The object's own namespace first, then the global namespaces.
    /// Cluster-scoped objects only search the global namespaces.
    fn candidate_namespaces<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a str> {
        let own = (!namespace.is_empty()).then_some(namespace);
        own.into_iter().chain(
            self.global_namespaces
                .iter()
                .map(String::as_str)
                .filter(move |global| *global != namespace),
        )
    }

    /// Runs one review, racing it against the call's cancellation.
    async fn review(
        &self,
        ctx: &RequestContext,
        attributes: &ResourceAttributes,
        subject: &ReviewSubject,
    ) -> AuthzResult<Verdict> {
        let label = subject.kind_label();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            () = ctx.cancelled() => {
                record_access_review(label, "cancelled", started.elapsed());
                return Err(AuthzError::Cancelled);
            }
            result = self.reviewer.review(attributes, subject) => result,
        };

        match result {
            Ok(()) => {
                record_access_review(label, "allowed", started.elapsed());
                Ok(Verdict::Allowed)
            }
            Err(ReviewError::Forbidden { reason }) => {
                record_access_review(label, "denied", started.elapsed());
                Ok(Verdict::Denied(reason))
            }
            Err(ReviewError::Backend { message }) => {
                record_access_review(label, "error", started.elapsed());
                Err(AuthzError::internal(format!(
                    "{label} access review failed: {message}"
                )))
            }
        }
    }
}
