//! Access review verbs.

use std::borrow::Cow;
use std::fmt;

/// A verb as understood by the cluster's authorizer.
///
/// The standard verbs are available as constants; resource types may define
/// their own (e.g. `promote` on stages), which are checked through
/// [`AuthorizingClient::authorize`](crate::AuthorizingClient::authorize).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Verb(Cow<'static, str>);

impl Verb {
    /// Read a single object.
    pub const GET: Self = Self(Cow::Borrowed("get"));
    /// Read a collection.
    pub const LIST: Self = Self(Cow::Borrowed("list"));
    /// Subscribe to changes in a collection.
    pub const WATCH: Self = Self(Cow::Borrowed("watch"));
    /// Create an object.
    pub const CREATE: Self = Self(Cow::Borrowed("create"));
    /// Replace an object.
    pub const UPDATE: Self = Self(Cow::Borrowed("update"));
    /// Partially modify an object.
    pub const PATCH: Self = Self(Cow::Borrowed("patch"));
    /// Delete an object.
    pub const DELETE: Self = Self(Cow::Borrowed("delete"));
    /// Delete a collection.
    pub const DELETECOLLECTION: Self = Self(Cow::Borrowed("deletecollection"));

    /// A verb defined by a particular resource type.
    ///
    /// ```
    /// use kargo_authz::Verb;
    ///
    /// assert_eq!(Verb::custom("Promote").as_str(), "promote");
    /// assert_eq!(Verb::custom("get"), Verb::GET);
    /// ```
    pub fn custom(verb: impl AsRef<str>) -> Self {
        Self(Cow::Owned(verb.as_ref().trim().to_lowercase()))
    }

    /// Returns the verb string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Verb {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
