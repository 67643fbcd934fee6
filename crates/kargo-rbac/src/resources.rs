//! The resource types a Kargo project role may grant access to.
//!
//! Rules never get to choose their own API group: the group is looked up
//! here from the resource type name.

use crate::error::{RbacError, RbacResult};

/// The Kubernetes core API group.
pub const CORE_GROUP: &str = "";

/// The Kubernetes RBAC API group.
pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// The Argo Rollouts API group (analysis resources).
pub const ROLLOUTS_GROUP: &str = "argoproj.io";

/// The Kargo API group.
pub const KARGO_GROUP: &str = "kargo.akuity.io";

/// The verb granting every operation on a resource type.
pub const WILDCARD_VERB: &str = "*";

/// Verbs a wildcard expands to for every resource type.
pub const BASE_VERBS: &[&str] = &[
    "create",
    "delete",
    "deletecollection",
    "get",
    "list",
    "patch",
    "update",
    "watch",
];

/// A resource type known to the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceType {
    /// Plural, lowercase name as used in policy rules.
    pub plural: &'static str,
    /// Singular form, recognized only to produce a helpful error.
    pub singular: &'static str,
    /// API group the resource type belongs to.
    pub group: &'static str,
    /// Verbs beyond [`BASE_VERBS`] that only this resource type defines.
    pub custom_verbs: &'static [&'static str],
}

const fn resource(
    plural: &'static str,
    singular: &'static str,
    group: &'static str,
) -> ResourceType {
    ResourceType {
        plural,
        singular,
        group,
        custom_verbs: &[],
    }
}

/// Every resource type a project role may reference.
pub const RESOURCE_TYPES: &[ResourceType] = &[
    resource("configmaps", "configmap", CORE_GROUP),
    resource("events", "event", CORE_GROUP),
    resource("namespaces", "namespace", CORE_GROUP),
    resource("secrets", "secret", CORE_GROUP),
    resource("serviceaccounts", "serviceaccount", CORE_GROUP),
    resource("rolebindings", "rolebinding", RBAC_GROUP),
    resource("roles", "role", RBAC_GROUP),
    resource("analysisruns", "analysisrun", ROLLOUTS_GROUP),
    resource("analysistemplates", "analysistemplate", ROLLOUTS_GROUP),
    resource("freights", "freight", KARGO_GROUP),
    resource("projectconfigs", "projectconfig", KARGO_GROUP),
    resource("projects", "project", KARGO_GROUP),
    resource("promotions", "promotion", KARGO_GROUP),
    resource("promotiontasks", "promotiontask", KARGO_GROUP),
    ResourceType {
        plural: "stages",
        singular: "stage",
        group: KARGO_GROUP,
        custom_verbs: &["promote"],
    },
    resource("warehouses", "warehouse", KARGO_GROUP),
];

/// Looks up a resource type by its plural name.
///
/// # Errors
///
/// Returns [`RbacError::SingularResourceType`] if `name` is the singular form
/// of a known type, and [`RbacError::UnknownResourceType`] otherwise.
///
/// # Example
///
/// ```
/// use kargo_rbac::resources::{lookup, KARGO_GROUP};
///
/// assert_eq!(lookup("stages").unwrap().group, KARGO_GROUP);
/// assert!(lookup("stage").is_err());
/// ```
pub fn lookup(name: &str) -> RbacResult<&'static ResourceType> {
    if let Some(rt) = RESOURCE_TYPES.iter().find(|rt| rt.plural == name) {
        return Ok(rt);
    }
    match RESOURCE_TYPES.iter().find(|rt| rt.singular == name) {
        Some(rt) => Err(RbacError::singular(name, rt.plural)),
        None => Err(RbacError::unknown(name)),
    }
}

impl ResourceType {
    /// Returns the sorted list of verbs a wildcard expands to.
    #[must_use]
    pub fn expand_wildcard(&self, include_custom_verbs: bool) -> Vec<String> {
        let mut verbs: Vec<String> = BASE_VERBS.iter().map(ToString::to_string).collect();
        if include_custom_verbs {
            verbs.extend(self.custom_verbs.iter().map(ToString::to_string));
        }
        verbs.sort_unstable();
        verbs.dedup();
        verbs
    }
}
