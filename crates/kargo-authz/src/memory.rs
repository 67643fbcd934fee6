//! A process-local [`ClusterClient`].
//!
//! `InMemoryCluster` keeps objects in memory and behaves enough like an API
//! server for handlers and tests: resource versions increase on every write,
//! `generateName` is honoured, merge patches are applied, `status` is a
//! sub-resource that main-resource writes cannot change, and watches
//! receive every subsequent write.
//!
//! Label selectors support `k=v`, `k==v`, `k!=v`, `k` and `!k` terms.
//! Pagination is not supported; lists always return every match. The
//! operation log keeps only the most recent entries.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use kube::api::{
    ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    WatchEvent, WatchParams,
};
use kube::core::ErrorResponse;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::cluster::{ClusterClient, DynamicWatchStream, Target};
use crate::descriptor::ResourceList;
use crate::error::{ClusterError, ClusterResult};

const STATUS: &str = "status";
const EVENT_BUFFER: usize = 256;
const OPERATION_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StoreKey {
    group: String,
    plural: String,
    namespace: String,
    name: String,
}

impl StoreKey {
    fn new(target: Target<'_>, name: &str) -> Self {
        Self {
            group: target.api_resource.group.clone(),
            plural: target.api_resource.plural.clone(),
            namespace: target.namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    fn in_scope(&self, scope: &Scope) -> bool {
        self.group == scope.group
            && self.plural == scope.plural
            && scope.namespace.as_ref().map_or(true, |ns| *ns == self.namespace)
    }
}

/// A resource type plus an optional namespace restriction.
#[derive(Debug, Clone)]
struct Scope {
    group: String,
    plural: String,
    namespace: Option<String>,
}

impl From<Target<'_>> for Scope {
    fn from(target: Target<'_>) -> Self {
        Self {
            group: target.api_resource.group.clone(),
            plural: target.api_resource.plural.clone(),
            namespace: target.namespace.map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Modified,
    Deleted,
}

#[derive(Debug, Clone)]
struct StoredEvent {
    change: Change,
    key: StoreKey,
    object: DynamicObject,
}

impl StoredEvent {
    fn into_watch_event(self) -> WatchEvent<DynamicObject> {
        match self.change {
            Change::Added => WatchEvent::Added(self.object),
            Change::Modified => WatchEvent::Modified(self.object),
            Change::Deleted => WatchEvent::Deleted(self.object),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

#[derive(Debug, Clone, Default)]
struct Selector(Vec<Requirement>);

impl Selector {
    fn parse(selector: Option<&str>) -> ClusterResult<Self> {
        let mut requirements = Vec::new();
        for term in selector
            .into_iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            if term.contains(" in ") || term.contains(" notin ") || term.contains('(') {
                return Err(ClusterError::Unsupported(format!(
                    "set-based label selector {term:?}"
                )));
            }
            let requirement = if let Some((k, v)) = term.split_once("!=") {
                Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = term.split_once("==") {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = term.split_once('=') {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = term.strip_prefix('!') {
                Requirement::NotExists(k.trim().to_string())
            } else {
                Requirement::Exists(term.to_string())
            };
            requirements.push(requirement);
        }
        Ok(Self(requirements))
    }

    fn matches(&self, obj: &DynamicObject) -> bool {
        let empty = BTreeMap::new();
        let labels = obj.metadata.labels.as_ref().unwrap_or(&empty);
        self.0.iter().all(|r| match r {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }
}

fn reject_field_selector(field_selector: Option<&String>) -> ClusterResult<()> {
    match field_selector {
        Some(fs) if !fs.is_empty() => Err(ClusterError::Unsupported(format!(
            "field selector {fs:?}"
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<StoreKey, DynamicObject>,
    resource_version: u64,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// An in-memory [`ClusterClient`].
#[derive(Debug)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    events: broadcast::Sender<StoredEvent>,
    operations: Mutex<VecDeque<String>>,
    operation_log_capacity: usize,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(State::default()),
            events,
            operations: Mutex::new(VecDeque::new()),
            operation_log_capacity: OPERATION_LOG_CAPACITY,
        }
    }

    /// Sets how many recent operations [`operations`](Self::operations)
    /// keeps. Older entries are discarded; zero disables the log.
    pub fn with_operation_log_capacity(mut self, capacity: usize) -> Self {
        self.operation_log_capacity = capacity;
        self
    }

    /// Stores an object directly, bypassing the operation log.
    pub fn seed(
        &self,
        api_resource: &ApiResource,
        obj: DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        let namespace = obj.metadata.namespace.clone();
        self.insert_new(Target::new(api_resource, namespace.as_deref()), obj)
    }

    /// The most recent operations performed through [`ClusterClient`],
    /// oldest first, as `"<verb> <resource>"` strings.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().iter().cloned().collect()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Whether the cluster holds no objects.
    pub fn is_empty(&self) -> bool {
        self.state.lock().objects.is_empty()
    }

    fn record(&self, verb: &str, target: Target<'_>, subresource: Option<&str>) {
        let resource = match subresource {
            Some(sub) => format!("{}/{sub}", target.api_resource.plural),
            None => target.api_resource.plural.clone(),
        };
        if self.operation_log_capacity == 0 {
            return;
        }
        let mut operations = self.operations.lock();
        while operations.len() >= self.operation_log_capacity {
            operations.pop_front();
        }
        operations.push_back(format!("{verb} {resource}"));
    }

    fn publish(&self, change: Change, key: StoreKey, object: DynamicObject) {
        // No receivers is fine.
        let _ = self.events.send(StoredEvent {
            change,
            key,
            object,
        });
    }

    fn insert_new(&self, target: Target<'_>, mut obj: DynamicObject) -> ClusterResult<DynamicObject> {
        let name = match obj.metadata.name.clone().filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => match obj.metadata.generate_name.as_deref() {
                Some(prefix) if !prefix.is_empty() => format!("{prefix}{}", random_suffix()),
                _ => {
                    return Err(ClusterError::Invalid(
                        "metadata.name or metadata.generateName is required".to_string(),
                    ))
                }
            },
        };
        if let (Some(obj_ns), Some(target_ns)) = (obj.metadata.namespace.as_deref(), target.namespace)
        {
            if obj_ns != target_ns {
                return Err(ClusterError::Invalid(format!(
                    "object namespace {obj_ns:?} does not match request namespace {target_ns:?}"
                )));
            }
        }

        let key = StoreKey::new(target, &name);
        let stored = {
            let mut state = self.state.lock();
            if state.objects.contains_key(&key) {
                return Err(ClusterError::already_exists(&key.plural, &key.name));
            }
            obj.metadata.name = Some(name);
            obj.metadata.namespace = target.namespace.map(ToString::to_string);
            obj.metadata.uid = Some(Uuid::now_v7().to_string());
            obj.metadata.resource_version = Some(state.next_resource_version());
            state.objects.insert(key.clone(), obj.clone());
            obj
        };
        debug!(resource = %key.plural, namespace = %key.namespace, name = %key.name, "object created");
        self.publish(Change::Added, key, stored.clone());
        Ok(stored)
    }

    /// Applies `update` to a stored object and stores the result under a new
    /// resource version. Identity fields are restored after the update.
    fn modify<F>(&self, target: Target<'_>, name: &str, update: F) -> ClusterResult<DynamicObject>
    where
        F: FnOnce(&DynamicObject) -> ClusterResult<DynamicObject>,
    {
        let key = StoreKey::new(target, name);
        let stored = {
            let mut state = self.state.lock();
            let existing = state
                .objects
                .get(&key)
                .ok_or_else(|| ClusterError::not_found(&key.plural, name))?;
            let mut updated = update(existing)?;
            updated.types = existing.types.clone().or(updated.types);
            updated.metadata.name = existing.metadata.name.clone();
            updated.metadata.namespace = existing.metadata.namespace.clone();
            updated.metadata.uid = existing.metadata.uid.clone();
            updated.metadata.resource_version = Some(state.next_resource_version());
            state.objects.insert(key.clone(), updated.clone());
            updated
        };
        self.publish(Change::Modified, key, stored.clone());
        Ok(stored)
    }

    fn check_status(subresource: &str) -> ClusterResult<()> {
        if subresource == STATUS {
            Ok(())
        } else {
            Err(ClusterError::Unsupported(format!(
                "sub-resource {subresource:?}"
            )))
        }
    }
}

fn random_suffix() -> String {
    // The trailing bits of a v7 UUID are random.
    let id = Uuid::now_v7().simple().to_string();
    id[id.len() - 5..].to_string()
}

fn merge_patch_value(patch: &Patch<Value>) -> ClusterResult<&Value> {
    match patch {
        Patch::Merge(value) | Patch::Strategic(value) => Ok(value),
        _ => Err(ClusterError::Unsupported(
            "only merge and strategic merge patches are supported".to_string(),
        )),
    }
}

/// RFC 7386 JSON merge patch.
fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn status_of(obj: &DynamicObject) -> Option<Value> {
    obj.data.get(STATUS).cloned()
}

fn with_status(mut obj: DynamicObject, status: Option<Value>) -> DynamicObject {
    if let Value::Object(data) = &mut obj.data {
        match status {
            Some(status) => {
                data.insert(STATUS.to_string(), status);
            }
            None => {
                data.remove(STATUS);
            }
        }
    }
    obj
}

fn apply_merge(existing: &DynamicObject, patch: &Value) -> ClusterResult<DynamicObject> {
    let mut doc = serde_json::to_value(existing)?;
    merge(&mut doc, patch);
    Ok(serde_json::from_value(doc)?)
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn get(&self, target: Target<'_>, name: &str) -> ClusterResult<DynamicObject> {
        self.record("get", target, None);
        let key = StoreKey::new(target, name);
        self.state
            .lock()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(&key.plural, name))
    }

    async fn list(
        &self,
        target: Target<'_>,
        params: &ListParams,
    ) -> ClusterResult<ResourceList<DynamicObject>> {
        self.record("list", target, None);
        reject_field_selector(params.field_selector.as_ref())?;
        let selector = Selector::parse(params.label_selector.as_deref())?;
        let scope = Scope::from(target);

        let state = self.state.lock();
        let items = state
            .objects
            .iter()
            .filter(|(key, obj)| key.in_scope(&scope) && selector.matches(obj))
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(ResourceList {
            resource_version: Some(state.resource_version.to_string()),
            continue_token: None,
            items,
        })
    }

    async fn create(
        &self,
        target: Target<'_>,
        _params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        self.record("create", target, None);
        self.insert_new(target, obj.clone())
    }

    async fn replace(
        &self,
        target: Target<'_>,
        name: &str,
        _params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        self.record("update", target, None);
        if obj.metadata.name.as_deref().is_some_and(|n| n != name) {
            return Err(ClusterError::Invalid(format!(
                "object name does not match request name {name:?}"
            )));
        }
        self.modify(target, name, |existing| {
            Ok(with_status(obj.clone(), status_of(existing)))
        })
    }

    async fn patch(
        &self,
        target: Target<'_>,
        name: &str,
        _params: &PatchParams,
        patch: &Patch<Value>,
    ) -> ClusterResult<DynamicObject> {
        self.record("patch", target, None);
        let mut value = merge_patch_value(patch)?.clone();
        if let Value::Object(fields) = &mut value {
            fields.remove(STATUS);
        }
        self.modify(target, name, |existing| apply_merge(existing, &value))
    }

    async fn delete(
        &self,
        target: Target<'_>,
        name: &str,
        _params: &DeleteParams,
    ) -> ClusterResult<()> {
        self.record("delete", target, None);
        let key = StoreKey::new(target, name);
        let removed = self
            .state
            .lock()
            .objects
            .remove(&key)
            .ok_or_else(|| ClusterError::not_found(&key.plural, name))?;
        self.publish(Change::Deleted, key, removed);
        Ok(())
    }

    async fn delete_collection(
        &self,
        target: Target<'_>,
        _params: &DeleteParams,
        list_params: &ListParams,
    ) -> ClusterResult<()> {
        self.record("deletecollection", target, None);
        reject_field_selector(list_params.field_selector.as_ref())?;
        let selector = Selector::parse(list_params.label_selector.as_deref())?;
        let scope = Scope::from(target);

        let removed: Vec<(StoreKey, DynamicObject)> = {
            let mut state = self.state.lock();
            let keys: Vec<StoreKey> = state
                .objects
                .iter()
                .filter(|(key, obj)| key.in_scope(&scope) && selector.matches(obj))
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| state.objects.remove(&key).map(|obj| (key, obj)))
                .collect()
        };
        for (key, obj) in removed {
            self.publish(Change::Deleted, key, obj);
        }
        Ok(())
    }

    async fn watch(
        &self,
        target: Target<'_>,
        params: &WatchParams,
        resource_version: &str,
    ) -> ClusterResult<DynamicWatchStream> {
        self.record("watch", target, None);
        reject_field_selector(params.field_selector.as_ref())?;
        let selector = Selector::parse(params.label_selector.as_deref())?;
        let scope = Scope::from(target);

        // Subscribe before taking the snapshot so no write falls in between.
        let receiver = self.events.subscribe();
        let initial: Vec<ClusterResult<WatchEvent<DynamicObject>>> =
            if resource_version.is_empty() || resource_version == "0" {
                self.state
                    .lock()
                    .objects
                    .iter()
                    .filter(|(key, obj)| key.in_scope(&scope) && selector.matches(obj))
                    .map(|(_, obj)| Ok(WatchEvent::Added(obj.clone())))
                    .collect()
            } else {
                Vec::new()
            };

        let live = stream::unfold(
            (receiver, scope, selector),
            |(mut receiver, scope, selector)| async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            if event.key.in_scope(&scope) && selector.matches(&event.object) {
                                return Some((
                                    Ok(event.into_watch_event()),
                                    (receiver, scope, selector),
                                ));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            return Some((
                                Ok(WatchEvent::Error(ErrorResponse {
                                    status: "Failure".to_string(),
                                    message: format!("watch fell behind by {missed} events"),
                                    reason: "Expired".to_string(),
                                    code: 410,
                                })),
                                (receiver, scope, selector),
                            ));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            },
        );

        Ok(stream::iter(initial).chain(live).boxed())
    }

    async fn get_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
    ) -> ClusterResult<DynamicObject> {
        self.record("get", target, Some(subresource));
        Self::check_status(subresource)?;
        let key = StoreKey::new(target, name);
        self.state
            .lock()
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::not_found(&key.plural, name))
    }

    async fn create_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        _name: &str,
        _params: &PostParams,
        _body: &Value,
    ) -> ClusterResult<Value> {
        self.record("create", target, Some(subresource));
        Err(ClusterError::Unsupported(format!(
            "creating sub-resource {subresource:?}"
        )))
    }

    async fn replace_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        _params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        self.record("update", target, Some(subresource));
        Self::check_status(subresource)?;
        self.modify(target, name, |existing| {
            Ok(with_status(existing.clone(), status_of(obj)))
        })
    }

    async fn patch_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        _params: &PatchParams,
        patch: &Patch<Value>,
    ) -> ClusterResult<DynamicObject> {
        self.record("patch", target, Some(subresource));
        Self::check_status(subresource)?;
        let status_patch = merge_patch_value(patch)?
            .get(STATUS)
            .cloned()
            .map(|status| serde_json::json!({ STATUS: status }))
            .unwrap_or_else(|| Value::Object(Map::new()));
        self.modify(target, name, |existing| apply_merge(existing, &status_patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::GroupVersionKind;
    use serde_json::json;

    fn stages() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("kargo.akuity.io", "v1alpha1", "Stage"))
    }

    fn stage(namespace: &str, name: &str, labels: Value) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "kargo.akuity.io/v1alpha1",
            "kind": "Stage",
            "metadata": { "namespace": namespace, "name": name, "labels": labels },
            "spec": { "shard": "a" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_get_and_conflict() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        let target = Target::new(&ar, Some("proj"));

        let created = cluster
            .create(target, &PostParams::default(), &stage("proj", "test", json!({})))
            .await
            .unwrap();
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());

        let fetched = cluster.get(target, "test").await.unwrap();
        assert_eq!(fetched, created);

        let err = cluster
            .create(target, &PostParams::default(), &stage("proj", "test", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
        assert!(cluster.get(target, "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_generate_name() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        let mut obj = stage("proj", "", json!({}));
        obj.metadata.name = None;
        obj.metadata.generate_name = Some("test-".to_string());

        let created = cluster
            .create(Target::new(&ar, Some("proj")), &PostParams::default(), &obj)
            .await
            .unwrap();
        let name = created.metadata.name.unwrap();
        assert!(name.starts_with("test-"));
        assert_eq!(name.len(), "test-".len() + 5);
    }

    #[tokio::test]
    async fn test_list_by_namespace_and_labels() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        cluster.seed(&ar, stage("a", "one", json!({"tier": "prod"}))).unwrap();
        cluster.seed(&ar, stage("a", "two", json!({"tier": "dev"}))).unwrap();
        cluster.seed(&ar, stage("b", "three", json!({"tier": "prod"}))).unwrap();

        let all = cluster
            .list(Target::new(&ar, None), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(all.items.len(), 3);
        assert_eq!(all.resource_version.as_deref(), Some("3"));

        let prod_in_a = cluster
            .list(
                Target::new(&ar, Some("a")),
                &ListParams::default().labels("tier=prod"),
            )
            .await
            .unwrap();
        assert_eq!(prod_in_a.items.len(), 1);
        assert_eq!(prod_in_a.items[0].metadata.name.as_deref(), Some("one"));

        let err = cluster
            .list(Target::new(&ar, None), &ListParams::default().labels("tier in (prod)"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_main_resource_writes_keep_status() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        let target = Target::new(&ar, Some("proj"));
        let mut obj = stage("proj", "test", json!({}));
        obj.data["status"] = json!({"phase": "Steady"});
        cluster.seed(&ar, obj).unwrap();

        let patched = cluster
            .patch(
                target,
                "test",
                &PatchParams::default(),
                &Patch::Merge(json!({"spec": {"shard": "b"}, "status": {"phase": "Hacked"}})),
            )
            .await
            .unwrap();
        assert_eq!(patched.data["spec"]["shard"], "b");
        assert_eq!(patched.data["status"]["phase"], "Steady");

        let mut replacement = stage("proj", "test", json!({}));
        replacement.data["status"] = json!({"phase": "Hacked"});
        let replaced = cluster
            .replace(target, "test", &PostParams::default(), &replacement)
            .await
            .unwrap();
        assert_eq!(replaced.data["status"]["phase"], "Steady");
        assert_eq!(replaced.metadata.resource_version.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_status_subresource() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        let target = Target::new(&ar, Some("proj"));
        cluster.seed(&ar, stage("proj", "test", json!({}))).unwrap();

        let patched = cluster
            .patch_subresource(
                target,
                "status",
                "test",
                &PatchParams::default(),
                &Patch::Merge(json!({"status": {"phase": "Promoting"}, "spec": {"shard": "z"}})),
            )
            .await
            .unwrap();
        assert_eq!(patched.data["status"]["phase"], "Promoting");
        assert_eq!(patched.data["spec"]["shard"], "a");

        let err = cluster
            .get_subresource(target, "scale", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_delete_collection() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        cluster.seed(&ar, stage("a", "one", json!({"tier": "prod"}))).unwrap();
        cluster.seed(&ar, stage("a", "two", json!({"tier": "dev"}))).unwrap();
        cluster.seed(&ar, stage("b", "three", json!({"tier": "prod"}))).unwrap();

        cluster
            .delete_collection(
                Target::new(&ar, Some("a")),
                &DeleteParams::default(),
                &ListParams::default().labels("tier!=dev"),
            )
            .await
            .unwrap();
        assert_eq!(cluster.len(), 2);
        assert_eq!(
            cluster.operations(),
            vec!["deletecollection stages".to_string()]
        );
    }

    #[tokio::test]
    async fn test_watch_replays_then_follows() {
        let cluster = InMemoryCluster::new();
        let ar = stages();
        let target = Target::new(&ar, Some("a"));
        cluster.seed(&ar, stage("a", "one", json!({}))).unwrap();
        cluster.seed(&ar, stage("b", "other", json!({}))).unwrap();

        let mut events = cluster
            .watch(target, &WatchParams::default(), "0")
            .await
            .unwrap();
        match events.next().await.unwrap().unwrap() {
            WatchEvent::Added(obj) => assert_eq!(obj.metadata.name.as_deref(), Some("one")),
            _ => panic!("unexpected watch event"),
        }

        cluster.delete(target, "one", &DeleteParams::default()).await.unwrap();
        cluster
            .delete(Target::new(&ar, Some("b")), "other", &DeleteParams::default())
            .await
            .unwrap();
        match events.next().await.unwrap().unwrap() {
            WatchEvent::Deleted(obj) => assert_eq!(obj.metadata.name.as_deref(), Some("one")),
            _ => panic!("unexpected watch event"),
        }
    }

    #[tokio::test]
    async fn test_operation_log_is_bounded() {
        let cluster = InMemoryCluster::new().with_operation_log_capacity(2);
        let ar = stages();
        let target = Target::new(&ar, Some("a"));
        cluster.seed(&ar, stage("a", "one", json!({}))).unwrap();

        cluster.get(target, "one").await.unwrap();
        cluster.list(target, &ListParams::default()).await.unwrap();
        cluster.delete(target, "one", &DeleteParams::default()).await.unwrap();
        assert_eq!(
            cluster.operations(),
            vec!["list stages".to_string(), "delete stages".to_string()]
        );

        let silent = InMemoryCluster::new().with_operation_log_capacity(0);
        silent.seed(&ar, stage("a", "one", json!({}))).unwrap();
        silent.get(target, "one").await.unwrap();
        assert!(silent.operations().is_empty());
    }

    #[test]
    fn test_merge_patch() {
        let mut doc = json!({"a": {"b": 1, "c": 2}, "d": [1]});
        merge(&mut doc, &json!({"a": {"b": null, "e": 3}, "d": [2]}));
        assert_eq!(doc, json!({"a": {"c": 2, "e": 3}, "d": [2]}));
    }

    #[test]
    fn test_selector_parse() {
        let selector = Selector::parse(Some("a=b, c!=d ,e,!f, g==h")).unwrap();
        assert_eq!(
            selector.0,
            vec![
                Requirement::Equals("a".into(), "b".into()),
                Requirement::NotEquals("c".into(), "d".into()),
                Requirement::Exists("e".into()),
                Requirement::NotExists("f".into()),
                Requirement::Equals("g".into(), "h".into()),
            ]
        );
    }
}
