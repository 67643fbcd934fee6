//! Authorizing client configuration.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Configuration consumed when an [`AuthorizingClient`] is built.
///
/// [`AuthorizingClient`]: crate::AuthorizingClient
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Bypass the decision engine and perform every operation with the
    /// privileged connection. Only for trusted local contexts.
    pub skip_authorization: bool,

    /// Namespaces searched, in order, for caller service accounts after the
    /// target object's own namespace.
    pub global_service_account_namespaces: IndexSet<String>,
}

impl ClientOptions {
    /// Creates options with authorization enabled and no global namespaces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables skip-authorization mode.
    pub fn with_skip_authorization(mut self, skip: bool) -> Self {
        self.skip_authorization = skip;
        self
    }

    /// Appends a global service account namespace.
    pub fn with_global_service_account_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.global_service_account_namespaces.insert(namespace.into());
        self
    }
}
