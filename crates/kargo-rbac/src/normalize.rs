//! Policy rule normalization.
//!
//! Administrators may write rules that list several resource types, repeat
//! verbs, use the wildcard verb or carry arbitrary `apiGroups`. Normalization
//! turns any such rule set into a canonical one where every rule covers
//! exactly one group, one resource type and at most one resource name, and
//! where rules are ordered deterministically so the result can be compared
//! against, or written as, stored `Role` objects without spurious diffs.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::rbac::v1::PolicyRule;
use tracing::debug;

use crate::error::{RbacError, RbacResult};
use crate::resources::{self, ResourceType, WILDCARD_VERB};

/// Options controlling normalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationOptions {
    /// Whether the wildcard verb also expands to verbs defined only for a
    /// particular resource type (e.g. `promote` on stages).
    pub include_custom_verbs_in_expansion: bool,
}

impl NormalizationOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable custom verbs in wildcard expansion.
    pub fn with_custom_verbs_in_expansion(mut self, include: bool) -> Self {
        self.include_custom_verbs_in_expansion = include;
        self
    }
}

/// Verbs collected so far for one `(group, resource, name)` key.
#[derive(Debug)]
struct Accumulated {
    resource_type: &'static ResourceType,
    resource_name: String,
    verbs: BTreeSet<String>,
}

/// Returns the map key for a normalized rule.
///
/// The empty core group is spelled `core` so that keys sort sensibly.
///
/// # Example
///
/// ```
/// use kargo_rbac::rule_key;
///
/// assert_eq!(rule_key("", "secrets", ""), "core/secrets");
/// assert_eq!(rule_key("kargo.akuity.io", "stages", "prod"), "kargo.akuity.io/stages/prod");
/// ```
pub fn rule_key(group: &str, resource: &str, resource_name: &str) -> String {
    let group = if group.is_empty() { "core" } else { group };
    if resource_name.is_empty() {
        format!("{group}/{resource}")
    } else {
        format!("{group}/{resource}/{resource_name}")
    }
}

/// Normalizes policy rules into a canonical, deduplicated, sorted list.
///
/// # Errors
///
/// Fails if any rule references a resource type that is unknown or written
/// in its singular form, or lists an empty or blank resource name.
///
/// # Example
///
/// ```
/// use k8s_openapi::api::rbac::v1::PolicyRule;
/// use kargo_rbac::{normalize_policy_rules, NormalizationOptions};
///
/// let rules = vec![PolicyRule {
///     resources: Some(vec!["stages".into(), "warehouses".into()]),
///     verbs: vec!["get".into(), "get".into()],
///     ..Default::default()
/// }];
///
/// let normalized = normalize_policy_rules(&rules, &NormalizationOptions::default()).unwrap();
/// assert_eq!(normalized.len(), 2);
/// assert_eq!(normalized[0].verbs, vec!["get".to_string()]);
/// ```
pub fn normalize_policy_rules(
    rules: &[PolicyRule],
    opts: &NormalizationOptions,
) -> RbacResult<Vec<PolicyRule>> {
    Ok(build_normalized_policy_rules_map(rules, opts)?
        .into_values()
        .collect())
}

/// Normalizes policy rules into a map keyed by [`rule_key`].
///
/// Iterating the returned map yields rules in the same order as
/// [`normalize_policy_rules`].
pub fn build_normalized_policy_rules_map(
    rules: &[PolicyRule],
    opts: &NormalizationOptions,
) -> RbacResult<BTreeMap<String, PolicyRule>> {
    let mut map = BTreeMap::new();
    merge_normalized_policy_rules(&mut map, rules, opts)?;
    Ok(map)
}

/// Merges `rules` into an already normalized map.
///
/// Verbs of rules sharing a key are unioned and the affected entries are
/// finalized again. On error the map is left untouched.
pub fn merge_normalized_policy_rules(
    map: &mut BTreeMap<String, PolicyRule>,
    rules: &[PolicyRule],
    opts: &NormalizationOptions,
) -> RbacResult<()> {
    let mut accumulated = BTreeMap::new();
    accumulate(&mut accumulated, map.values())?;
    accumulate(&mut accumulated, rules)?;

    let merged = finalize(accumulated, opts);
    debug!(
        input_rules = rules.len(),
        existing_rules = map.len(),
        normalized_rules = merged.len(),
        "normalized policy rules"
    );
    *map = merged;
    Ok(())
}

fn accumulate<'a>(
    accumulated: &mut BTreeMap<String, Accumulated>,
    rules: impl IntoIterator<Item = &'a PolicyRule>,
) -> RbacResult<()> {
    for rule in rules {
        let verbs: Vec<String> = rule
            .verbs
            .iter()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();

        let mut names: Vec<String> = rule
            .resource_names
            .iter()
            .flatten()
            .map(|n| n.trim().to_string())
            .collect();
        // An empty name is the key for every instance, so an explicit name
        // must never collapse to it.
        let blank_name = names.iter().any(String::is_empty);
        if names.is_empty() {
            names.push(String::new());
        }

        for resource in rule.resources.iter().flatten() {
            // The rule's own apiGroups are ignored.
            let resource_type = resources::lookup(&resource.trim().to_lowercase())?;
            if blank_name {
                return Err(RbacError::blank_name(resource_type.plural));
            }
            for name in &names {
                let key = rule_key(resource_type.group, resource_type.plural, name);
                accumulated
                    .entry(key)
                    .or_insert_with(|| Accumulated {
                        resource_type,
                        resource_name: name.clone(),
                        verbs: BTreeSet::new(),
                    })
                    .verbs
                    .extend(verbs.iter().cloned());
            }
        }
    }
    Ok(())
}

fn finalize(
    accumulated: BTreeMap<String, Accumulated>,
    opts: &NormalizationOptions,
) -> BTreeMap<String, PolicyRule> {
    accumulated
        .into_iter()
        .filter_map(|(key, acc)| {
            let verbs: Vec<String> = if acc.verbs.contains(WILDCARD_VERB) {
                acc.resource_type
                    .expand_wildcard(opts.include_custom_verbs_in_expansion)
            } else {
                acc.verbs.into_iter().collect()
            };
            if verbs.is_empty() {
                return None;
            }
            let rule = PolicyRule {
                api_groups: Some(vec![acc.resource_type.group.to_string()]),
                resources: Some(vec![acc.resource_type.plural.to_string()]),
                resource_names: (!acc.resource_name.is_empty())
                    .then(|| vec![acc.resource_name]),
                verbs,
                ..Default::default()
            };
            Some((key, rule))
        })
        .collect()
}
