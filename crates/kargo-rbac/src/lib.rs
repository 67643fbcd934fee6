//! # Kargo RBAC
//!
//! Canonicalization of Kubernetes RBAC policy rules for Kargo project roles.
//!
//! Project roles are edited through the API by people who write rules the
//! way they think about them: several resource types per rule, repeated
//! verbs, `*` for everything. Before such rules are stored or compared they
//! are normalized so that:
//!
//! - every rule covers exactly one API group, one resource type and at most
//!   one resource name
//! - the API group is derived from the resource type, never taken from input
//! - verbs are deduplicated, sorted, and `*` is expanded
//! - rules are ordered by `<group or "core">/<resource>[/<name>]`
//!
//! ## Example
//!
//! ```
//! use k8s_openapi::api::rbac::v1::PolicyRule;
//! use kargo_rbac::{normalize_policy_rules, NormalizationOptions};
//!
//! let rules = vec![
//!     PolicyRule {
//!         resources: Some(vec!["stages".into()]),
//!         verbs: vec!["get".into(), "get".into()],
//!         ..Default::default()
//!     },
//!     PolicyRule {
//!         resources: Some(vec!["stages".into()]),
//!         resource_names: Some(vec!["prod".into()]),
//!         verbs: vec!["promote".into()],
//!         ..Default::default()
//!     },
//! ];
//!
//! let normalized = normalize_policy_rules(&rules, &NormalizationOptions::default()).unwrap();
//! assert_eq!(normalized.len(), 2);
//! assert_eq!(normalized[1].resource_names, Some(vec!["prod".to_string()]));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
mod normalize;
pub mod resources;

pub use error::{RbacError, RbacResult};
pub use normalize::{
    build_normalized_policy_rules_map, merge_normalized_policy_rules, normalize_policy_rules,
    rule_key, NormalizationOptions,
};
pub use resources::ResourceType;
