//! Caller identity attached to every inbound call.
//!
//! A [`CallerIdentity`] is produced by the authentication layer in front of
//! the API server. It is immutable for the lifetime of one call and is never
//! persisted; the authorization core only ever reads it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Name of the claim whose presence marks a caller as authenticated through
/// token exchange (OIDC) rather than by presenting a cluster credential.
pub const SUBJECT_CLAIM: &str = "sub";

/// A Kubernetes service account a caller may be reviewed as.
///
/// # Example
///
/// ```
/// use kargo_core::ServiceAccountRef;
///
/// let sa = ServiceAccountRef::new("kargo-demo", "kargo-viewer");
/// assert_eq!(sa.username(), "system:serviceaccount:kargo-demo:kargo-viewer");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    /// Namespace of the service account.
    pub namespace: String,
    /// Name of the service account.
    pub name: String,
}

impl ServiceAccountRef {
    /// Creates a new service account reference.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the username the API server assigns to this service account.
    ///
    /// This is the identity string used when impersonating the account in a
    /// `SubjectAccessReview`.
    #[must_use]
    pub fn username(&self) -> String {
        format!("system:serviceaccount:{}:{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The authenticated context of one inbound call.
///
/// The bearer token is never included in `Debug` output or serialized.
///
/// # Example
///
/// ```
/// use kargo_core::{CallerIdentity, ServiceAccountRef};
///
/// let identity = CallerIdentity::new()
///     .with_claim("sub", "alice")
///     .with_service_account(ServiceAccountRef::new("kargo-demo", "kargo-admin"))
///     .with_bearer_token("opaque-token");
///
/// assert!(identity.has_subject_claim());
/// assert_eq!(identity.service_accounts_in("kargo-demo").count(), 1);
/// ```
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Whether the caller is a Kargo administrator.
    #[serde(default)]
    pub is_admin: bool,

    /// Claims extracted from the caller's identity token.
    #[serde(default)]
    pub claims: BTreeMap<String, String>,

    /// Service accounts the caller is entitled to be reviewed as, keyed by
    /// namespace.
    #[serde(default)]
    pub service_accounts_by_namespace: HashMap<String, HashSet<ServiceAccountRef>>,

    /// The raw bearer token presented by the caller.
    #[serde(skip)]
    bearer_token: String,
}

impl CallerIdentity {
    /// Creates an empty, non-admin identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an administrator identity.
    #[must_use]
    pub fn admin() -> Self {
        Self {
            is_admin: true,
            ..Self::default()
        }
    }

    /// Returns this identity with the given claim added.
    #[must_use]
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    /// Returns this identity with the given service account association.
    #[must_use]
    pub fn with_service_account(mut self, sa: ServiceAccountRef) -> Self {
        self.service_accounts_by_namespace
            .entry(sa.namespace.clone())
            .or_default()
            .insert(sa);
        self
    }

    /// Returns this identity with the given bearer token.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = token.into();
        self
    }

    /// Returns the bearer token presented by the caller.
    pub fn bearer_token(&self) -> &str {
        &self.bearer_token
    }

    /// Returns the value of a claim, if present.
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).map(String::as_str)
    }

    /// Whether the identity carries the `sub` claim.
    pub fn has_subject_claim(&self) -> bool {
        self.claims.contains_key(SUBJECT_CLAIM)
    }

    /// Iterates over the service accounts associated with the caller in the
    /// given namespace. Iteration order is unspecified.
    pub fn service_accounts_in<'a>(
        &'a self,
        namespace: &str,
    ) -> impl Iterator<Item = &'a ServiceAccountRef> + 'a {
        self.service_accounts_by_namespace
            .get(namespace)
            .into_iter()
            .flat_map(HashSet::iter)
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// Never contains the bearer token.
    #[must_use]
    pub fn log_id(&self) -> String {
        if self.is_admin {
            return "admin".to_string();
        }
        match self.claim(SUBJECT_CLAIM) {
            Some(sub) => format!("sub:{sub}"),
            None if !self.bearer_token.is_empty() => "bearer".to_string(),
            None => "anonymous".to_string(),
        }
    }
}

impl fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerIdentity")
            .field("is_admin", &self.is_admin)
            .field("claims", &self.claims)
            .field(
                "service_accounts_by_namespace",
                &self.service_accounts_by_namespace,
            )
            .field(
                "bearer_token",
                &if self.bearer_token.is_empty() {
                    ""
                } else {
                    "<redacted>"
                },
            )
            .finish()
    }
}
