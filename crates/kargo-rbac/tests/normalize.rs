//! Property tests for policy rule normalization.

use k8s_openapi::api::rbac::v1::PolicyRule;
use kargo_rbac::resources::RESOURCE_TYPES;
use kargo_rbac::{
    build_normalized_policy_rules_map, merge_normalized_policy_rules, normalize_policy_rules,
    NormalizationOptions, RbacError,
};
use proptest::prelude::*;

fn arb_resource() -> impl Strategy<Value = String> {
    prop::sample::select(RESOURCE_TYPES.iter().map(|rt| rt.plural).collect::<Vec<_>>())
        .prop_map(ToString::to_string)
}

fn arb_verb() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "get", "list", "watch", "create", "update", "patch", "delete", "promote", "*", "", " GET ",
    ])
    .prop_map(ToString::to_string)
}

fn arb_rule() -> impl Strategy<Value = PolicyRule> {
    (
        prop::collection::vec(arb_resource(), 1..3),
        prop::collection::vec(prop::sample::select(vec!["prod", "uat", "dev"]), 0..3),
        prop::collection::vec(arb_verb(), 0..5),
    )
        .prop_map(|(resources, names, verbs)| PolicyRule {
            resources: Some(resources),
            resource_names: if names.is_empty() {
                None
            } else {
                Some(names.into_iter().map(ToString::to_string).collect())
            },
            verbs,
            ..Default::default()
        })
}

fn arb_options() -> impl Strategy<Value = NormalizationOptions> {
    any::<bool>().prop_map(|include| NormalizationOptions::new().with_custom_verbs_in_expansion(include))
}

proptest! {
    #[test]
    fn normalization_is_idempotent(
        rules in prop::collection::vec(arb_rule(), 0..6),
        opts in arb_options(),
    ) {
        let once = normalize_policy_rules(&rules, &opts).unwrap();
        let twice = normalize_policy_rules(&once, &opts).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalization_ignores_input_order(
        rules in prop::collection::vec(arb_rule(), 0..6),
        opts in arb_options(),
    ) {
        let mut reversed = rules.clone();
        reversed.reverse();
        prop_assert_eq!(
            normalize_policy_rules(&rules, &opts).unwrap(),
            normalize_policy_rules(&reversed, &opts).unwrap()
        );
    }

    #[test]
    fn normalized_rules_are_canonical(
        rules in prop::collection::vec(arb_rule(), 0..6),
        opts in arb_options(),
    ) {
        for rule in normalize_policy_rules(&rules, &opts).unwrap() {
            prop_assert_eq!(rule.api_groups.as_ref().map(Vec::len), Some(1));
            prop_assert_eq!(rule.resources.as_ref().map(Vec::len), Some(1));
            prop_assert!(rule.resource_names.as_ref().map_or(true, |n| n.len() == 1));
            prop_assert!(!rule.verbs.is_empty());
            prop_assert!(rule.verbs.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(!rule.verbs.iter().any(|v| v == "*"));
        }
    }

    #[test]
    fn merging_matches_normalizing_everything(
        first in prop::collection::vec(arb_rule(), 0..4),
        second in prop::collection::vec(arb_rule(), 0..4),
        opts in arb_options(),
    ) {
        let mut merged = build_normalized_policy_rules_map(&first, &opts).unwrap();
        merge_normalized_policy_rules(&mut merged, &second, &opts).unwrap();

        let all: Vec<PolicyRule> = first.iter().chain(second.iter()).cloned().collect();
        prop_assert_eq!(merged, build_normalized_policy_rules_map(&all, &opts).unwrap());
    }
}

#[test]
fn rules_from_stored_role_json() {
    let rules: Vec<PolicyRule> = serde_json::from_str(
        r#"[
            {"apiGroups": ["*"], "resources": ["stages", "promotions"], "verbs": ["get", "list"]},
            {"apiGroups": [""], "resources": ["secrets"], "resourceNames": ["creds"], "verbs": ["get"]},
            {"apiGroups": ["kargo.akuity.io"], "resources": ["stages"], "verbs": ["watch"]}
        ]"#,
    )
    .unwrap();

    let map = build_normalized_policy_rules_map(&rules, &NormalizationOptions::default()).unwrap();
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec![
            "core/secrets/creds",
            "kargo.akuity.io/promotions",
            "kargo.akuity.io/stages"
        ]
    );
    assert_eq!(map["kargo.akuity.io/stages"].verbs, vec!["get", "list", "watch"]);

    let json = serde_json::to_value(&map["core/secrets/creds"]).unwrap();
    assert_eq!(json["apiGroups"], serde_json::json!([""]));
    assert_eq!(json["resourceNames"], serde_json::json!(["creds"]));
}

#[test]
fn singular_resource_error_suggests_plural() {
    let rules = vec![PolicyRule {
        resources: Some(vec!["warehouses".into(), "stage".into()]),
        verbs: vec!["get".into()],
        ..Default::default()
    }];
    let err = normalize_policy_rules(&rules, &NormalizationOptions::default()).unwrap_err();
    assert!(matches!(err, RbacError::SingularResourceType { .. }));
    assert_eq!(err.suggestion(), Some("stages"));
}
