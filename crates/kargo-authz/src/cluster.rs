//! The privileged connection to the cluster.
//!
//! [`ClusterClient`] is the untyped surface the [`AuthorizingClient`]
//! delegates to once an operation has been allowed. It is implemented for
//! [`kube::Client`] and, for tests and local mode, by
//! [`InMemoryCluster`](crate::InMemoryCluster).
//!
//! [`AuthorizingClient`]: crate::AuthorizingClient

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
    WatchEvent, WatchParams,
};
use kube::Client;

use crate::descriptor::ResourceList;
use crate::error::{ClusterError, ClusterResult};

/// Stream of watch events for dynamic objects.
pub type DynamicWatchStream = BoxStream<'static, ClusterResult<WatchEvent<DynamicObject>>>;

/// The resource type and namespace an operation addresses.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// The resource type.
    pub api_resource: &'a ApiResource,
    /// The namespace, `None` for cluster-scoped resources or all namespaces.
    pub namespace: Option<&'a str>,
}

impl<'a> Target<'a> {
    /// Creates a target.
    pub fn new(api_resource: &'a ApiResource, namespace: Option<&'a str>) -> Self {
        Self {
            api_resource,
            namespace: namespace.filter(|ns| !ns.is_empty()),
        }
    }
}

/// Untyped cluster operations, performed with the platform's own credential.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Reads an object.
    async fn get(&self, target: Target<'_>, name: &str) -> ClusterResult<DynamicObject>;

    /// Lists objects.
    async fn list(
        &self,
        target: Target<'_>,
        params: &ListParams,
    ) -> ClusterResult<ResourceList<DynamicObject>>;

    /// Creates an object.
    async fn create(
        &self,
        target: Target<'_>,
        params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject>;

    /// Replaces an object.
    async fn replace(
        &self,
        target: Target<'_>,
        name: &str,
        params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject>;

    /// Patches an object.
    async fn patch(
        &self,
        target: Target<'_>,
        name: &str,
        params: &PatchParams,
        patch: &Patch<serde_json::Value>,
    ) -> ClusterResult<DynamicObject>;

    /// Deletes an object.
    async fn delete(&self, target: Target<'_>, name: &str, params: &DeleteParams)
        -> ClusterResult<()>;

    /// Deletes every object matching `list_params`.
    async fn delete_collection(
        &self,
        target: Target<'_>,
        params: &DeleteParams,
        list_params: &ListParams,
    ) -> ClusterResult<()>;

    /// Opens a watch.
    async fn watch(
        &self,
        target: Target<'_>,
        params: &WatchParams,
        resource_version: &str,
    ) -> ClusterResult<DynamicWatchStream>;

    /// Reads a sub-resource.
    async fn get_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
    ) -> ClusterResult<DynamicObject>;

    /// Creates a sub-resource, e.g. a token or an eviction.
    async fn create_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        params: &PostParams,
        body: &serde_json::Value,
    ) -> ClusterResult<serde_json::Value>;

    /// Replaces a sub-resource.
    async fn replace_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject>;

    /// Patches a sub-resource.
    async fn patch_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        params: &PatchParams,
        patch: &Patch<serde_json::Value>,
    ) -> ClusterResult<DynamicObject>;
}

fn dynamic_api(client: &Client, target: Target<'_>) -> Api<DynamicObject> {
    match target.namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, target.api_resource),
        None => Api::all_with(client.clone(), target.api_resource),
    }
}

#[async_trait]
impl ClusterClient for Client {
    async fn get(&self, target: Target<'_>, name: &str) -> ClusterResult<DynamicObject> {
        Ok(dynamic_api(self, target).get(name).await?)
    }

    async fn list(
        &self,
        target: Target<'_>,
        params: &ListParams,
    ) -> ClusterResult<ResourceList<DynamicObject>> {
        let list = dynamic_api(self, target).list(params).await?;
        Ok(ResourceList {
            resource_version: list.metadata.resource_version,
            continue_token: list.metadata.continue_,
            items: list.items,
        })
    }

    async fn create(
        &self,
        target: Target<'_>,
        params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        Ok(dynamic_api(self, target).create(params, obj).await?)
    }

    async fn replace(
        &self,
        target: Target<'_>,
        name: &str,
        params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        Ok(dynamic_api(self, target).replace(name, params, obj).await?)
    }

    async fn patch(
        &self,
        target: Target<'_>,
        name: &str,
        params: &PatchParams,
        patch: &Patch<serde_json::Value>,
    ) -> ClusterResult<DynamicObject> {
        Ok(dynamic_api(self, target).patch(name, params, patch).await?)
    }

    async fn delete(
        &self,
        target: Target<'_>,
        name: &str,
        params: &DeleteParams,
    ) -> ClusterResult<()> {
        dynamic_api(self, target).delete(name, params).await?;
        Ok(())
    }

    async fn delete_collection(
        &self,
        target: Target<'_>,
        params: &DeleteParams,
        list_params: &ListParams,
    ) -> ClusterResult<()> {
        dynamic_api(self, target)
            .delete_collection(params, list_params)
            .await?;
        Ok(())
    }

    async fn watch(
        &self,
        target: Target<'_>,
        params: &WatchParams,
        resource_version: &str,
    ) -> ClusterResult<DynamicWatchStream> {
        let stream = dynamic_api(self, target)
            .watch(params, resource_version)
            .await?;
        Ok(stream.map_err(ClusterError::from).boxed())
    }

    async fn get_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
    ) -> ClusterResult<DynamicObject> {
        Ok(dynamic_api(self, target)
            .get_subresource(subresource, name)
            .await?)
    }

    async fn create_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        params: &PostParams,
        body: &serde_json::Value,
    ) -> ClusterResult<serde_json::Value> {
        let data = serde_json::to_vec(body)?;
        Ok(dynamic_api(self, target)
            .create_subresource(subresource, name, params, data)
            .await?)
    }

    async fn replace_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        params: &PostParams,
        obj: &DynamicObject,
    ) -> ClusterResult<DynamicObject> {
        let data = serde_json::to_vec(obj)?;
        Ok(dynamic_api(self, target)
            .replace_subresource(subresource, name, params, data)
            .await?)
    }

    async fn patch_subresource(
        &self,
        target: Target<'_>,
        subresource: &str,
        name: &str,
        params: &PatchParams,
        patch: &Patch<serde_json::Value>,
    ) -> ClusterResult<DynamicObject> {
        Ok(dynamic_api(self, target)
            .patch_subresource(subresource, name, params, patch)
            .await?)
    }
}
