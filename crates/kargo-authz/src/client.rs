//! The authorizing client.
//!
//! Every operation is resolved to a resource descriptor and key, checked
//! with the [`DecisionEngine`], and only then delegated to the privileged
//! [`ClusterClient`]. A denied operation never reaches the cluster.

use std::fmt;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use kargo_core::RequestContext;
use kargo_telemetry::metrics::record_authz_decision;
use kube::api::{
    DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams, WatchEvent,
    WatchParams,
};
use kube::core::TypeMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{trace, warn};

use crate::cluster::{ClusterClient, Target};
use crate::config::ClientOptions;
use crate::descriptor::{DescriptorResolver, ObjectKey, ResourceDescriptor, ResourceList};
use crate::engine::{DecisionEngine, Grant};
use crate::error::AuthzResult;
use crate::review::AccessReviewer;
use crate::verb::Verb;

/// A typed cluster object the client can operate on.
pub trait ClusterObject:
    Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

/// Stream of typed watch events.
pub type WatchStream<K> = BoxStream<'static, AuthzResult<WatchEvent<K>>>;

/// Options for [`AuthorizingClient::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Namespace to list in; empty lists across all namespaces.
    pub namespace: String,
    /// Selectors and paging.
    pub params: ListParams,
}

impl ListOptions {
    /// Lists in `namespace`.
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            params: ListParams::default(),
        }
    }

    /// Restricts the list with a label selector.
    pub fn with_labels(mut self, selector: &str) -> Self {
        self.params = self.params.labels(selector);
        self
    }
}

/// Options for [`AuthorizingClient::delete_all_of`].
#[derive(Debug, Clone, Default)]
pub struct DeleteAllOfOptions {
    /// Namespace to delete in.
    pub namespace: String,
    /// Deletion behaviour.
    pub delete: DeleteParams,
    /// Which objects to delete.
    pub list: ListParams,
}

impl DeleteAllOfOptions {
    /// Deletes in `namespace`.
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Restricts the deletion with a label selector.
    pub fn with_labels(mut self, selector: &str) -> Self {
        self.list = self.list.labels(selector);
        self
    }
}

/// Options for [`AuthorizingClient::watch`].
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Namespace to watch; empty watches all namespaces.
    pub namespace: String,
    /// Selectors and timeouts.
    pub params: WatchParams,
    /// Resource version to start from; empty or `"0"` replays current
    /// objects first.
    pub resource_version: String,
}

impl WatchOptions {
    /// Watches `namespace`.
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }
}

/// Cluster client that authorizes every operation for the caller attached
/// to the request context.
///
/// # Example
///
/// ```rust,ignore
/// use kargo_authz::{AuthorizingClient, ClientOptions, DescriptorResolver, Scheme};
///
/// let client = AuthorizingClient::new(
///     Arc::new(kube_client),
///     DescriptorResolver::new(Scheme::with_kubernetes_defaults()),
///     Arc::new(KubeAccessReviewer::new(kube_client, kube_config)),
///     &ClientOptions::new().with_global_service_account_namespace("kargo"),
/// );
///
/// let secret: Secret = client.get(&ctx, &ObjectKey::new("kargo-demo", "creds")).await?;
/// ```
#[derive(Clone)]
pub struct AuthorizingClient {
    inner: Arc<dyn ClusterClient>,
    resolver: DescriptorResolver,
    engine: Arc<DecisionEngine>,
    skip_authorization: bool,
}

impl fmt::Debug for AuthorizingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizingClient")
            .field("resolver", &self.resolver)
            .field("engine", &self.engine)
            .field("skip_authorization", &self.skip_authorization)
            .finish_non_exhaustive()
    }
}

impl AuthorizingClient {
    /// Creates a client delegating allowed operations to `inner`.
    pub fn new(
        inner: Arc<dyn ClusterClient>,
        resolver: DescriptorResolver,
        reviewer: Arc<dyn AccessReviewer>,
        options: &ClientOptions,
    ) -> Self {
        if options.skip_authorization {
            warn!("authorization is disabled; all operations use the privileged connection");
        }
        Self {
            inner,
            resolver,
            engine: Arc::new(DecisionEngine::new(
                reviewer,
                options.global_service_account_namespaces.iter().cloned(),
            )),
            skip_authorization: options.skip_authorization,
        }
    }

    /// The privileged connection, for callers that have authorized by other
    /// means.
    pub fn internal_client(&self) -> &Arc<dyn ClusterClient> {
        &self.inner
    }

    /// The resolver used to derive descriptors.
    pub fn resolver(&self) -> &DescriptorResolver {
        &self.resolver
    }

    /// Whether authorization is bypassed.
    pub fn skips_authorization(&self) -> bool {
        self.skip_authorization
    }

    /// Checks whether the caller may perform `verb` on the given resource
    /// and sub-resource without performing any operation.
    pub async fn authorize(
        &self,
        ctx: &RequestContext,
        verb: &Verb,
        descriptor: &ResourceDescriptor,
        subresource: &str,
        key: &ObjectKey,
    ) -> AuthzResult<Grant> {
        if self.skip_authorization {
            record_authz_decision("allowed", Grant::Unchecked.basis());
            return Ok(Grant::Unchecked);
        }
        if subresource.is_empty() {
            self.engine.decide(ctx, verb, descriptor, key).await
        } else {
            let descriptor = descriptor.with_subresource(subresource);
            self.engine.decide(ctx, verb, &descriptor, key).await
        }
    }

    /// Reads an object.
    pub async fn get<K: ClusterObject>(&self, ctx: &RequestContext, key: &ObjectKey) -> AuthzResult<K> {
        let descriptor = self.resolver.descriptor_for::<K>()?;
        self.authorize(ctx, &Verb::GET, &descriptor, "", key).await?;

        let ar = descriptor.api_resource();
        let obj = self.inner.get(Target::new(&ar, key.namespace()), &key.name).await?;
        from_dynamic(obj)
    }

    /// Lists objects.
    pub async fn list<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        options: &ListOptions,
    ) -> AuthzResult<ResourceList<K>> {
        let descriptor = self.resolver.descriptor_for::<ResourceList<K>>()?;
        let key = ObjectKey::namespaced_only(&options.namespace);
        self.authorize(ctx, &Verb::LIST, &descriptor, "", &key).await?;

        let ar = descriptor.api_resource();
        let list = self
            .inner
            .list(Target::new(&ar, key.namespace()), &options.params)
            .await?;
        Ok(ResourceList {
            resource_version: list.resource_version,
            continue_token: list.continue_token,
            items: list
                .items
                .into_iter()
                .map(from_dynamic)
                .collect::<AuthzResult<_>>()?,
        })
    }

    /// Creates an object.
    pub async fn create<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        obj: &K,
        params: &PostParams,
    ) -> AuthzResult<K> {
        let (descriptor, key) = self.resolver.resolve_object(obj)?;
        self.authorize(ctx, &Verb::CREATE, &descriptor, "", &key).await?;

        let ar = descriptor.api_resource();
        let created = self
            .inner
            .create(Target::new(&ar, key.namespace()), params, &to_dynamic(obj)?)
            .await?;
        from_dynamic(created)
    }

    /// Replaces an object.
    pub async fn update<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        obj: &K,
        params: &PostParams,
    ) -> AuthzResult<K> {
        let (descriptor, key) = self.resolver.resolve_object(obj)?;
        self.authorize(ctx, &Verb::UPDATE, &descriptor, "", &key).await?;

        let ar = descriptor.api_resource();
        let updated = self
            .inner
            .replace(
                Target::new(&ar, key.namespace()),
                &key.name,
                params,
                &to_dynamic(obj)?,
            )
            .await?;
        from_dynamic(updated)
    }

    /// Patches an object.
    pub async fn patch<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        key: &ObjectKey,
        patch: &Patch<serde_json::Value>,
        params: &PatchParams,
    ) -> AuthzResult<K> {
        let descriptor = self.resolver.descriptor_for::<K>()?;
        self.authorize(ctx, &Verb::PATCH, &descriptor, "", key).await?;

        let ar = descriptor.api_resource();
        let patched = self
            .inner
            .patch(Target::new(&ar, key.namespace()), &key.name, params, patch)
            .await?;
        from_dynamic(patched)
    }

    /// Deletes an object.
    pub async fn delete<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        key: &ObjectKey,
        params: &DeleteParams,
    ) -> AuthzResult<()> {
        let descriptor = self.resolver.descriptor_for::<K>()?;
        self.authorize(ctx, &Verb::DELETE, &descriptor, "", key).await?;

        let ar = descriptor.api_resource();
        self.inner
            .delete(Target::new(&ar, key.namespace()), &key.name, params)
            .await?;
        Ok(())
    }

    /// Deletes every object matching the options.
    pub async fn delete_all_of<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        options: &DeleteAllOfOptions,
    ) -> AuthzResult<()> {
        let descriptor = self.resolver.descriptor_for::<K>()?;
        let key = ObjectKey::namespaced_only(&options.namespace);
        self.authorize(ctx, &Verb::DELETECOLLECTION, &descriptor, "", &key)
            .await?;

        let ar = descriptor.api_resource();
        self.inner
            .delete_collection(Target::new(&ar, key.namespace()), &options.delete, &options.list)
            .await?;
        Ok(())
    }

    /// Opens a watch.
    ///
    /// The caller is authorized once, before subscribing. The stream ends
    /// when the request context is cancelled.
    pub async fn watch<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        options: &WatchOptions,
    ) -> AuthzResult<WatchStream<K>> {
        let descriptor = self.resolver.descriptor_for::<K>()?;
        let key = ObjectKey::namespaced_only(&options.namespace);
        self.authorize(ctx, &Verb::WATCH, &descriptor, "", &key).await?;

        let ar = descriptor.api_resource();
        let events = self
            .inner
            .watch(
                Target::new(&ar, key.namespace()),
                &options.params,
                &options.resource_version,
            )
            .await?;
        trace!(resource = %descriptor, namespace = %key.namespace, "watch established");

        let cancelled = ctx.cancellation_token().clone().cancelled_owned();
        Ok(events
            .map(|event| event.map_err(Into::into).and_then(typed_event::<K>))
            .take_until(cancelled)
            .boxed())
    }

    /// Operations on the `status` sub-resource.
    pub fn status(&self) -> SubResourceClient<'_> {
        self.sub_resource("status")
    }

    /// Operations on a named sub-resource.
    pub fn sub_resource(&self, name: impl Into<String>) -> SubResourceClient<'_> {
        SubResourceClient {
            client: self,
            subresource: name.into(),
        }
    }
}

/// Authorized operations on one sub-resource of a resource type.
#[derive(Debug, Clone)]
pub struct SubResourceClient<'a> {
    client: &'a AuthorizingClient,
    subresource: String,
}

impl SubResourceClient<'_> {
    /// The sub-resource name.
    pub fn name(&self) -> &str {
        &self.subresource
    }

    /// Reads the sub-resource of an object.
    pub async fn get<K: ClusterObject>(&self, ctx: &RequestContext, key: &ObjectKey) -> AuthzResult<K> {
        let descriptor = self.client.resolver.descriptor_for::<K>()?;
        self.client
            .authorize(ctx, &Verb::GET, &descriptor, &self.subresource, key)
            .await?;

        let ar = descriptor.api_resource();
        let obj = self
            .client
            .inner
            .get_subresource(Target::new(&ar, key.namespace()), &self.subresource, &key.name)
            .await?;
        from_dynamic(obj)
    }

    /// Creates the sub-resource of `obj` from `body`.
    pub async fn create<K, B, R>(
        &self,
        ctx: &RequestContext,
        obj: &K,
        body: &B,
        params: &PostParams,
    ) -> AuthzResult<R>
    where
        K: ClusterObject,
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let (descriptor, key) = self.client.resolver.resolve_object(obj)?;
        self.client
            .authorize(ctx, &Verb::CREATE, &descriptor, &self.subresource, &key)
            .await?;

        let ar = descriptor.api_resource();
        let body = serde_json::to_value(body)?;
        let created = self
            .client
            .inner
            .create_subresource(
                Target::new(&ar, key.namespace()),
                &self.subresource,
                &key.name,
                params,
                &body,
            )
            .await?;
        Ok(serde_json::from_value(created)?)
    }

    /// Replaces the sub-resource of `obj`.
    pub async fn update<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        obj: &K,
        params: &PostParams,
    ) -> AuthzResult<K> {
        let (descriptor, key) = self.client.resolver.resolve_object(obj)?;
        self.client
            .authorize(ctx, &Verb::UPDATE, &descriptor, &self.subresource, &key)
            .await?;

        let ar = descriptor.api_resource();
        let updated = self
            .client
            .inner
            .replace_subresource(
                Target::new(&ar, key.namespace()),
                &self.subresource,
                &key.name,
                params,
                &to_dynamic(obj)?,
            )
            .await?;
        from_dynamic(updated)
    }

    /// Patches the sub-resource of an object.
    pub async fn patch<K: ClusterObject>(
        &self,
        ctx: &RequestContext,
        key: &ObjectKey,
        patch: &Patch<serde_json::Value>,
        params: &PatchParams,
    ) -> AuthzResult<K> {
        let descriptor = self.client.resolver.descriptor_for::<K>()?;
        self.client
            .authorize(ctx, &Verb::PATCH, &descriptor, &self.subresource, key)
            .await?;

        let ar = descriptor.api_resource();
        let patched = self
            .client
            .inner
            .patch_subresource(
                Target::new(&ar, key.namespace()),
                &self.subresource,
                &key.name,
                params,
                patch,
            )
            .await?;
        from_dynamic(patched)
    }
}

fn to_dynamic<K: Serialize>(obj: &K) -> AuthzResult<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn from_dynamic<K: ClusterObject>(mut obj: DynamicObject) -> AuthzResult<K> {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: K::api_version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
        });
    }
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn typed_event<K: ClusterObject>(event: WatchEvent<DynamicObject>) -> AuthzResult<WatchEvent<K>> {
    Ok(match event {
        WatchEvent::Added(obj) => WatchEvent::Added(from_dynamic(obj)?),
        WatchEvent::Modified(obj) => WatchEvent::Modified(from_dynamic(obj)?),
        WatchEvent::Deleted(obj) => WatchEvent::Deleted(from_dynamic(obj)?),
        WatchEvent::Bookmark(bookmark) => WatchEvent::Bookmark(bookmark),
        WatchEvent::Error(err) => WatchEvent::Error(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                namespace: Some("kargo-demo".into()),
                name: Some("settings".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
            ..Default::default()
        }
    }

    #[test]
    fn test_dynamic_conversion() {
        let dynamic = to_dynamic(&config_map()).unwrap();
        assert_eq!(dynamic.types.as_ref().map(|t| t.kind.as_str()), Some("ConfigMap"));
        assert_eq!(dynamic.data["data"]["key"], "value");

        let back: ConfigMap = from_dynamic(dynamic).unwrap();
        assert_eq!(back, config_map());
    }

    #[test]
    fn test_from_dynamic_fills_missing_types() {
        let mut dynamic = to_dynamic(&config_map()).unwrap();
        dynamic.types = None;
        let back: ConfigMap = from_dynamic(dynamic).unwrap();
        assert_eq!(back.metadata.name.as_deref(), Some("settings"));
    }

    #[test]
    fn test_option_builders() {
        let list = ListOptions::in_namespace("ns").with_labels("a=b");
        assert_eq!(list.namespace, "ns");
        assert_eq!(list.params.label_selector.as_deref(), Some("a=b"));

        let delete = DeleteAllOfOptions::in_namespace("ns").with_labels("a!=b");
        assert_eq!(delete.list.label_selector.as_deref(), Some("a!=b"));

        assert!(WatchOptions::in_namespace("ns").resource_version.is_empty());
    }
}
