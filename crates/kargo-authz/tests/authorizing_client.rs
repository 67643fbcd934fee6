//! End-to-end tests of the authorizing client over the in-memory cluster.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kargo_authz::fixtures::{ScriptedResponse, ScriptedReviewer};
use kargo_authz::{
    AuthorizingClient, AuthzError, ClientOptions, DeleteAllOfOptions, DescriptorResolver, Grant,
    InMemoryCluster, ListOptions, ObjectKey, Scheme, Verb, WatchOptions,
};
use kargo_core::{CallerIdentity, RequestContext, ServiceAccountRef};
use kube::api::{DeleteParams, Patch, PatchParams, PostParams, WatchEvent};
use kube::Resource;
use serde::{Deserialize, Serialize};
use serde_json::json;

// =============================================================================
// Test resource
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StageSpec {
    #[serde(default)]
    shard: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StageStatus {
    #[serde(default)]
    phase: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Stage {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: StageSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<StageStatus>,
}

impl Resource for Stage {
    type DynamicType = ();
    type Scope = NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("Stage")
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("kargo.akuity.io")
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("v1alpha1")
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("stages")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

fn stage(namespace: &str, name: &str, shard: &str) -> Stage {
    Stage {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([("shard".to_string(), shard.to_string())])),
            ..Default::default()
        },
        spec: StageSpec {
            shard: shard.to_string(),
        },
        status: None,
    }
}

// =============================================================================
// Helpers
// =============================================================================

const PROJECT: &str = "project-a";
const GLOBAL: &str = "kargo";

fn resolver() -> DescriptorResolver {
    let mut scheme = Scheme::with_kubernetes_defaults();
    scheme.register::<Stage>();
    DescriptorResolver::new(scheme)
}

fn client_with(
    cluster: &Arc<InMemoryCluster>,
    reviewer: &Arc<ScriptedReviewer>,
    options: &ClientOptions,
) -> AuthorizingClient {
    AuthorizingClient::new(cluster.clone(), resolver(), reviewer.clone(), options)
}

fn client(cluster: &Arc<InMemoryCluster>, reviewer: &Arc<ScriptedReviewer>) -> AuthorizingClient {
    client_with(
        cluster,
        reviewer,
        &ClientOptions::new()
            .with_global_service_account_namespace(GLOBAL)
            .with_global_service_account_namespace("shared"),
    )
}

fn admin() -> RequestContext {
    RequestContext::new().with_identity(CallerIdentity::admin())
}

fn sso_caller() -> CallerIdentity {
    CallerIdentity::new()
        .with_claim("sub", "alice")
        .with_bearer_token("alice-token")
}

/// Seeds stages through an administrator and returns the operation count
/// afterwards.
async fn seed(cluster: &Arc<InMemoryCluster>, stages: &[Stage]) -> usize {
    let reviewer = Arc::new(ScriptedReviewer::new());
    let admin_client = client(cluster, &reviewer);
    for s in stages {
        admin_client
            .create(&admin(), s, &PostParams::default())
            .await
            .unwrap();
    }
    cluster.operations().len()
}

// =============================================================================
// Decision flow
// =============================================================================

#[tokio::test]
async fn test_unauthenticated_call_never_reaches_cluster() {
    let cluster = Arc::new(InMemoryCluster::new());
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);

    let err = client
        .create(&RequestContext::new(), &stage(PROJECT, "dev", "a"), &PostParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AuthzError::NotAllowed));
    assert_eq!(reviewer.call_count(), 0);
    assert!(cluster.operations().is_empty());
    assert!(cluster.is_empty());
}

#[tokio::test]
async fn test_admin_bypasses_reviews() {
    let cluster = Arc::new(InMemoryCluster::new());
    let reviewer = Arc::new(
        ScriptedReviewer::new().with_default(ScriptedResponse::Fail("unexpected review".into())),
    );
    let client = client(&cluster, &reviewer);

    let created = client
        .create(&admin(), &stage(PROJECT, "dev", "a"), &PostParams::default())
        .await
        .unwrap();
    assert!(created.metadata.uid.is_some());

    let fetched: Stage = client
        .get(&admin(), &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap();
    assert_eq!(fetched.spec.shard, "a");
    assert_eq!(reviewer.call_count(), 0);
}

#[tokio::test]
async fn test_service_accounts_tried_in_namespace_priority_order() {
    let project_sa = ServiceAccountRef::new(PROJECT, "viewer");
    let global_sa = ServiceAccountRef::new(GLOBAL, "global-viewer");
    let shared_sa = ServiceAccountRef::new("shared", "shared-viewer");
    let reviewer = Arc::new(
        ScriptedReviewer::new()
            .respond_to_service_account(&project_sa, ScriptedResponse::Forbid)
            .respond_to_service_account(&global_sa, ScriptedResponse::Allow)
            .respond_to_service_account(&shared_sa, ScriptedResponse::Allow),
    );
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(
        sso_caller()
            .with_service_account(shared_sa)
            .with_service_account(global_sa.clone())
            .with_service_account(project_sa.clone()),
    );

    let descriptor = client.resolver().descriptor_for::<Stage>().unwrap();
    let grant = client
        .authorize(&ctx, &Verb::GET, &descriptor, "", &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap();

    assert_eq!(grant, Grant::ServiceAccount(global_sa.clone()));
    assert_eq!(
        reviewer.subjects(),
        vec![project_sa.username(), global_sa.username()]
    );
    assert!(cluster.operations().is_empty());
}

#[tokio::test]
async fn test_review_error_aborts_search() {
    let project_sa = ServiceAccountRef::new(PROJECT, "viewer");
    let global_sa = ServiceAccountRef::new(GLOBAL, "global-viewer");
    let reviewer = Arc::new(
        ScriptedReviewer::new()
            .respond_to_service_account(&project_sa, ScriptedResponse::Fail("timeout".into()))
            .respond_to_service_account(&global_sa, ScriptedResponse::Allow)
            .with_default(ScriptedResponse::Allow),
    );
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(
        sso_caller()
            .with_service_account(project_sa.clone())
            .with_service_account(global_sa),
    );

    let err = client
        .get::<Stage>(&ctx, &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap_err();

    assert!(err.is_internal());
    assert!(err.to_string().contains("timeout"));
    assert_eq!(reviewer.subjects(), vec![project_sa.username()]);
    assert!(cluster.operations().is_empty());
}

#[tokio::test]
async fn test_falls_back_to_self_review() {
    let project_sa = ServiceAccountRef::new(PROJECT, "viewer");
    let reviewer = Arc::new(
        ScriptedReviewer::new()
            .respond_to_service_account(&project_sa, ScriptedResponse::Forbid)
            .respond_to_token("alice-token", ScriptedResponse::Allow),
    );
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller().with_service_account(project_sa.clone()));

    let descriptor = client.resolver().descriptor_for::<Stage>().unwrap();
    let grant = client
        .authorize(&ctx, &Verb::UPDATE, &descriptor, "", &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap();

    assert_eq!(grant, Grant::Caller);
    assert_eq!(
        reviewer.subjects(),
        vec![project_sa.username(), "token:alice-token".to_string()]
    );
}

#[tokio::test]
async fn test_without_subject_claim_only_self_review_runs() {
    let project_sa = ServiceAccountRef::new(PROJECT, "viewer");
    let reviewer = Arc::new(
        ScriptedReviewer::new()
            .respond_to_service_account(&project_sa, ScriptedResponse::Allow)
            .respond_to_token("bob-token", ScriptedResponse::Forbid),
    );
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(
        CallerIdentity::new()
            .with_bearer_token("bob-token")
            .with_service_account(project_sa),
    );

    let err = client
        .delete::<Stage>(&ctx, &ObjectKey::new(PROJECT, "dev"), &DeleteParams::default())
        .await
        .unwrap_err();

    assert!(err.is_forbidden());
    assert!(err.to_string().contains("delete stages.kargo.akuity.io"));
    assert_eq!(reviewer.subjects(), vec!["token:bob-token".to_string()]);
    assert!(cluster.operations().is_empty());
}

#[tokio::test]
async fn test_unregistered_type_is_rejected_before_review() {
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let err = client
        .get::<Pod>(&ctx, &ObjectKey::new(PROJECT, "web"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthzError::UnregisteredType { .. }));
    assert_eq!(reviewer.call_count(), 0);
    assert!(cluster.operations().is_empty());
}

// =============================================================================
// Operations
// =============================================================================

#[tokio::test]
async fn test_list_is_reviewed_against_item_resource() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed(
        &cluster,
        &[
            stage(PROJECT, "dev", "a"),
            stage(PROJECT, "prod", "b"),
            stage("project-b", "dev", "a"),
        ],
    )
    .await;
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let list = client
        .list::<Stage>(&ctx, &ListOptions::in_namespace(PROJECT))
        .await
        .unwrap();
    let names: Vec<_> = list
        .items
        .iter()
        .filter_map(|s| s.metadata.name.as_deref())
        .collect();
    assert_eq!(names, ["dev", "prod"]);
    assert!(list.resource_version.is_some());

    let calls = reviewer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].attributes.verb, "list");
    assert_eq!(calls[0].attributes.group, "kargo.akuity.io");
    assert_eq!(calls[0].attributes.resource, "stages");
    assert_eq!(calls[0].attributes.namespace, PROJECT);
    assert_eq!(calls[0].attributes.name, "");
}

#[tokio::test]
async fn test_list_with_label_selector() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed(&cluster, &[stage(PROJECT, "dev", "a"), stage(PROJECT, "prod", "b")]).await;
    let reviewer = Arc::new(ScriptedReviewer::new());
    let client = client(&cluster, &reviewer);

    let list = client
        .list::<Stage>(&admin(), &ListOptions::in_namespace(PROJECT).with_labels("shard=b"))
        .await
        .unwrap();
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].metadata.name.as_deref(), Some("prod"));
}

#[tokio::test]
async fn test_denied_write_leaves_cluster_untouched() {
    let cluster = Arc::new(InMemoryCluster::new());
    let seeded = seed(&cluster, &[stage(PROJECT, "dev", "a")]).await;
    let reviewer = Arc::new(ScriptedReviewer::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let err = client
        .update(&ctx, &stage(PROJECT, "dev", "z"), &PostParams::default())
        .await
        .unwrap_err();
    assert!(err.is_forbidden());

    let err = client
        .patch::<Stage>(
            &ctx,
            &ObjectKey::new(PROJECT, "dev"),
            &Patch::Merge(json!({"spec": {"shard": "z"}})),
            &PatchParams::default(),
        )
        .await
        .unwrap_err();
    assert!(err.is_forbidden());

    assert_eq!(cluster.operations().len(), seeded);
    let stored: Stage = client
        .get(&admin(), &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap();
    assert_eq!(stored.spec.shard, "a");
}

#[tokio::test]
async fn test_update_and_patch() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed(&cluster, &[stage(PROJECT, "dev", "a")]).await;
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let updated = client
        .update(&ctx, &stage(PROJECT, "dev", "b"), &PostParams::default())
        .await
        .unwrap();
    assert_eq!(updated.spec.shard, "b");

    let patched: Stage = client
        .patch(
            &ctx,
            &ObjectKey::new(PROJECT, "dev"),
            &Patch::Merge(json!({"spec": {"shard": "c"}})),
            &PatchParams::default(),
        )
        .await
        .unwrap();
    assert_eq!(patched.spec.shard, "c");
    assert_ne!(
        patched.metadata.resource_version,
        updated.metadata.resource_version
    );

    let verbs: Vec<_> = reviewer
        .calls()
        .into_iter()
        .map(|c| c.attributes.verb)
        .collect();
    assert_eq!(verbs, ["update", "patch"]);
}

#[tokio::test]
async fn test_delete_all_of() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed(
        &cluster,
        &[
            stage(PROJECT, "dev", "a"),
            stage(PROJECT, "qa", "a"),
            stage(PROJECT, "prod", "b"),
        ],
    )
    .await;
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    client
        .delete_all_of::<Stage>(&ctx, &DeleteAllOfOptions::in_namespace(PROJECT).with_labels("shard=a"))
        .await
        .unwrap();

    assert_eq!(cluster.len(), 1);
    let calls = reviewer.calls();
    assert_eq!(calls[0].attributes.verb, "deletecollection");
    assert_eq!(calls[0].attributes.name, "");
}

#[tokio::test]
async fn test_core_types_use_core_group() {
    let cluster = Arc::new(InMemoryCluster::new());
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let cm = ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(PROJECT.into()),
            name: Some("settings".into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("k".to_string(), "v".to_string())])),
        ..Default::default()
    };
    client.create(&ctx, &cm, &PostParams::default()).await.unwrap();

    let fetched: ConfigMap = client
        .get(&ctx, &ObjectKey::new(PROJECT, "settings"))
        .await
        .unwrap();
    assert_eq!(fetched.data, cm.data);

    let calls = reviewer.calls();
    assert_eq!(calls[0].attributes.group, "");
    assert_eq!(calls[0].attributes.resource, "configmaps");
}

// =============================================================================
// Sub-resources
// =============================================================================

#[tokio::test]
async fn test_status_subresource() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed(&cluster, &[stage(PROJECT, "dev", "a")]).await;
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let mut desired = stage(PROJECT, "dev", "ignored");
    desired.status = Some(StageStatus {
        phase: "Healthy".into(),
    });
    let updated = client
        .status()
        .update(&ctx, &desired, &PostParams::default())
        .await
        .unwrap();
    assert_eq!(updated.spec.shard, "a");
    assert_eq!(updated.status.as_ref().map(|s| s.phase.as_str()), Some("Healthy"));

    // A main-resource write cannot change status.
    let mut main = stage(PROJECT, "dev", "b");
    main.status = Some(StageStatus {
        phase: "Broken".into(),
    });
    let updated = client
        .update(&ctx, &main, &PostParams::default())
        .await
        .unwrap();
    assert_eq!(updated.status.as_ref().map(|s| s.phase.as_str()), Some("Healthy"));

    let patched: Stage = client
        .status()
        .patch(
            &ctx,
            &ObjectKey::new(PROJECT, "dev"),
            &Patch::Merge(json!({"status": {"phase": "Degraded"}})),
            &PatchParams::default(),
        )
        .await
        .unwrap();
    assert_eq!(patched.status.as_ref().map(|s| s.phase.as_str()), Some("Degraded"));

    let fetched: Stage = client
        .status()
        .get(&ctx, &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap();
    assert_eq!(fetched, patched);

    let subresources: Vec<_> = reviewer
        .calls()
        .into_iter()
        .map(|c| (c.attributes.verb, c.attributes.subresource))
        .collect();
    assert_eq!(
        subresources,
        [
            ("update".to_string(), "status".to_string()),
            ("update".to_string(), String::new()),
            ("patch".to_string(), "status".to_string()),
            ("get".to_string(), "status".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_denied_subresource_write() {
    let cluster = Arc::new(InMemoryCluster::new());
    let seeded = seed(&cluster, &[stage(PROJECT, "dev", "a")]).await;
    let reviewer = Arc::new(ScriptedReviewer::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let err = client
        .sub_resource("status")
        .update(&ctx, &stage(PROJECT, "dev", "a"), &PostParams::default())
        .await
        .unwrap_err();

    assert!(err.is_forbidden());
    assert!(err.to_string().contains("stages/status"));
    assert_eq!(cluster.operations().len(), seeded);
}

// =============================================================================
// Skip mode
// =============================================================================

#[tokio::test]
async fn test_skip_authorization() {
    let cluster = Arc::new(InMemoryCluster::new());
    let reviewer = Arc::new(
        ScriptedReviewer::new().with_default(ScriptedResponse::Fail("unexpected review".into())),
    );
    let client = client_with(
        &cluster,
        &reviewer,
        &ClientOptions::new().with_skip_authorization(true),
    );
    assert!(client.skips_authorization());

    // Even an unauthenticated context is let through.
    client
        .create(&RequestContext::new(), &stage(PROJECT, "dev", "a"), &PostParams::default())
        .await
        .unwrap();
    let descriptor = client.resolver().descriptor_for::<Stage>().unwrap();
    let grant = client
        .authorize(&RequestContext::new(), &Verb::DELETE, &descriptor, "", &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap();

    assert_eq!(grant, Grant::Unchecked);
    assert_eq!(reviewer.call_count(), 0);
    assert_eq!(cluster.len(), 1);
}

// =============================================================================
// Watch and cancellation
// =============================================================================

#[tokio::test]
async fn test_watch_authorized_once_and_ends_on_cancel() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed(&cluster, &[stage(PROJECT, "dev", "a")]).await;
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let mut events = client
        .watch::<Stage>(&ctx, &WatchOptions::in_namespace(PROJECT))
        .await
        .unwrap();
    assert_eq!(reviewer.call_count(), 1);
    assert_eq!(reviewer.calls()[0].attributes.verb, "watch");

    match events.next().await {
        Some(Ok(WatchEvent::Added(s))) => assert_eq!(s.metadata.name.as_deref(), Some("dev")),
        _ => panic!("expected replayed stage"),
    }

    client
        .create(&admin(), &stage(PROJECT, "prod", "b"), &PostParams::default())
        .await
        .unwrap();
    match events.next().await {
        Some(Ok(WatchEvent::Added(s))) => assert_eq!(s.spec.shard, "b"),
        _ => panic!("expected created stage"),
    }
    assert_eq!(reviewer.call_count(), 1);

    ctx.cancel();
    assert!(events.next().await.is_none());
}

#[tokio::test]
async fn test_denied_watch_opens_nothing() {
    let cluster = Arc::new(InMemoryCluster::new());
    let reviewer = Arc::new(ScriptedReviewer::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());

    let result = client
        .watch::<Stage>(&ctx, &WatchOptions::in_namespace(PROJECT))
        .await;
    assert!(matches!(result, Err(ref e) if e.is_forbidden()));
    assert!(cluster.operations().is_empty());
}

#[tokio::test]
async fn test_cancelled_call_stops_pending_review() {
    let project_sa = ServiceAccountRef::new(PROJECT, "viewer");
    let reviewer = Arc::new(
        ScriptedReviewer::new()
            .respond_to_service_account(&project_sa, ScriptedResponse::Hang)
            .with_default(ScriptedResponse::Allow),
    );
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller().with_service_account(project_sa));

    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = client
        .get::<Stage>(&ctx, &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(reviewer.call_count(), 1);
    assert!(cluster.operations().is_empty());
}

#[tokio::test]
async fn test_already_cancelled_call_is_not_reviewed() {
    let reviewer = Arc::new(ScriptedReviewer::new().with_default(ScriptedResponse::Allow));
    let cluster = Arc::new(InMemoryCluster::new());
    let client = client(&cluster, &reviewer);
    let ctx = RequestContext::new().with_identity(sso_caller());
    ctx.cancel();

    let err = client
        .get::<Stage>(&ctx, &ObjectKey::new(PROJECT, "dev"))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(reviewer.call_count(), 0);
    assert!(cluster.operations().is_empty());
}
