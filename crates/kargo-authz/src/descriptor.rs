//! Resource descriptor resolution.
//!
//! Every operation is authorized against a [`ResourceDescriptor`]: the API
//! group, version and plural resource name of the type being accessed. The
//! descriptor is derived from the Rust type through a [`Scheme`], never
//! written by hand, and list types resolve to the descriptor of their item
//! type so that list and item operations are checked against the same
//! resource.
//!
//! ```
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kargo_authz::{DescriptorResolver, ResourceList, Scheme};
//!
//! let mut scheme = Scheme::new();
//! scheme.register::<ConfigMap>();
//!
//! let resolver = DescriptorResolver::new(scheme);
//! let item = resolver.descriptor_for::<ConfigMap>().unwrap();
//! let list = resolver.descriptor_for::<ResourceList<ConfigMap>>().unwrap();
//! assert_eq!(item, list);
//! assert_eq!(item.resource(), "configmaps");
//! ```

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kube::core::{ApiResource, GroupVersionKind};
use kube::Resource;

use crate::error::{AuthzError, AuthzResult};

const LIST_SUFFIX: &str = "List";

/// Identifies the resource type (and optional sub-resource) an operation
/// touches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceDescriptor {
    group: String,
    version: String,
    kind: String,
    resource: String,
    subresource: String,
}

impl ResourceDescriptor {
    /// API group, empty for the core group.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// API version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Singular kind the descriptor was resolved from.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Plural, lowercase resource name.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Sub-resource name, empty for the main resource.
    pub fn subresource(&self) -> &str {
        &self.subresource
    }

    /// Returns a copy of this descriptor addressing a sub-resource.
    #[must_use]
    pub fn with_subresource(&self, subresource: impl Into<String>) -> Self {
        Self {
            subresource: subresource.into(),
            ..self.clone()
        }
    }

    /// The dynamic API type used to address the resource on the cluster.
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.resource)
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        if !self.subresource.is_empty() {
            write!(f, "/{}", self.subresource)?;
        }
        if !self.group.is_empty() {
            write!(f, ".{}", self.group)?;
        }
        Ok(())
    }
}

/// Namespace and name of the object an operation targets.
///
/// `name` is empty for list, watch and delete-all operations; `namespace`
/// is empty for cluster-scoped resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Object namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

impl ObjectKey {
    /// A key for a namespaced object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// A key naming only a namespace, used by collection operations.
    pub fn namespaced_only(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: String::new(),
        }
    }

    /// A key for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// The namespace, or `None` when empty.
    pub fn namespace(&self) -> Option<&str> {
        (!self.namespace.is_empty()).then_some(self.namespace.as_str())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.namespace.is_empty(), self.name.is_empty()) {
            (true, _) => f.write_str(&self.name),
            (false, true) => f.write_str(&self.namespace),
            (false, false) => write!(f, "{}/{}", self.namespace, self.name),
        }
    }
}

/// A typed page of objects returned by list operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceList<K> {
    /// Resource version of the collection at the time of listing.
    pub resource_version: Option<String>,
    /// Token for fetching the next page, if any.
    pub continue_token: Option<String>,
    /// The objects.
    pub items: Vec<K>,
}

impl<K> Default for ResourceList<K> {
    fn default() -> Self {
        Self {
            resource_version: None,
            continue_token: None,
            items: Vec::new(),
        }
    }
}

impl<K> IntoIterator for ResourceList<K> {
    type Item = K;
    type IntoIter = std::vec::IntoIter<K>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// A kind registered in a [`Scheme`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredKind {
    /// Group, version and kind of the type.
    pub gvk: GroupVersionKind,
    /// Whether the type is a collection of another kind.
    pub is_list: bool,
}

/// Registry mapping Rust types to their group, version and kind.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashMap<TypeId, RegisteredKind>,
}

impl Scheme {
    /// Creates an empty scheme.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scheme with the built-in Kubernetes types Kargo roles may
    /// reference.
    pub fn with_kubernetes_defaults() -> Self {
        use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Secret, ServiceAccount};
        use k8s_openapi::api::rbac::v1::{Role, RoleBinding};

        let mut scheme = Self::new();
        scheme
            .register::<ConfigMap>()
            .register::<Event>()
            .register::<Namespace>()
            .register::<Secret>()
            .register::<ServiceAccount>()
            .register::<Role>()
            .register::<RoleBinding>();
        scheme
    }

    /// Registers a resource type and its [`ResourceList`].
    pub fn register<K>(&mut self) -> &mut Self
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        let list_gvk = GroupVersionKind::gvk(
            &gvk.group,
            &gvk.version,
            &format!("{}{LIST_SUFFIX}", gvk.kind),
        );
        self.register_kind::<K>(gvk)
            .register_list_kind::<ResourceList<K>>(list_gvk)
    }

    /// Registers an arbitrary type under the given kind.
    pub fn register_kind<T: 'static>(&mut self, gvk: GroupVersionKind) -> &mut Self {
        self.kinds.insert(
            TypeId::of::<T>(),
            RegisteredKind {
                gvk,
                is_list: false,
            },
        );
        self
    }

    /// Registers an arbitrary type as a collection kind.
    ///
    /// The `List` suffix is stripped from `gvk.kind` when resolving.
    pub fn register_list_kind<T: 'static>(&mut self, gvk: GroupVersionKind) -> &mut Self {
        self.kinds.insert(
            TypeId::of::<T>(),
            RegisteredKind { gvk, is_list: true },
        );
        self
    }

    /// Looks up the registration for a type.
    pub fn kind_of<T: 'static>(&self) -> Option<&RegisteredKind> {
        self.kinds.get(&TypeId::of::<T>())
    }

    /// Number of registered types, lists included.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the scheme is empty.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

/// Maps a singular kind to the plural resource name the cluster uses for it.
///
/// The mapping must agree with the access review backend, otherwise
/// decisions are made for the wrong resource type.
pub trait KindMapper: Send + Sync + fmt::Debug {
    /// Returns the plural, lowercase resource name for `gvk`.
    fn plural(&self, gvk: &GroupVersionKind) -> String;
}

/// Pluralizes kinds the way the Kubernetes API server guesses resource
/// names, with optional per-kind overrides for names confirmed through
/// discovery.
#[derive(Debug, Clone, Default)]
pub struct ConventionalKindMapper {
    overrides: HashMap<(String, String), String>,
}

impl ConventionalKindMapper {
    /// Creates a mapper without overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the plural name for a kind.
    pub fn with_override(
        mut self,
        group: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        self.overrides
            .insert((group.into(), kind.into()), plural.into());
        self
    }
}

impl KindMapper for ConventionalKindMapper {
    fn plural(&self, gvk: &GroupVersionKind) -> String {
        if let Some(plural) = self.overrides.get(&(gvk.group.clone(), gvk.kind.clone())) {
            return plural.clone();
        }
        ApiResource::from_gvk(gvk).plural
    }
}

/// Derives resource descriptors and object keys from typed values.
#[derive(Debug, Clone)]
pub struct DescriptorResolver {
    scheme: Arc<Scheme>,
    mapper: Arc<dyn KindMapper>,
}

impl DescriptorResolver {
    /// Creates a resolver using [`ConventionalKindMapper`].
    pub fn new(scheme: Scheme) -> Self {
        Self {
            scheme: Arc::new(scheme),
            mapper: Arc::new(ConventionalKindMapper::new()),
        }
    }

    /// Replaces the kind mapper.
    pub fn with_mapper(mut self, mapper: Arc<dyn KindMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// The scheme types are resolved against.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Resolves the descriptor for a registered type.
    ///
    /// For list types the `List` suffix is stripped so the descriptor names
    /// the item resource.
    pub fn descriptor_for<T: 'static>(&self) -> AuthzResult<ResourceDescriptor> {
        let registered = self
            .scheme
            .kind_of::<T>()
            .ok_or(AuthzError::UnregisteredType {
                type_name: type_name::<T>(),
            })?;

        let gvk = &registered.gvk;
        let kind = if registered.is_list {
            gvk.kind.strip_suffix(LIST_SUFFIX).unwrap_or(&gvk.kind)
        } else {
            gvk.kind.as_str()
        };
        let singular = GroupVersionKind::gvk(&gvk.group, &gvk.version, kind);

        Ok(ResourceDescriptor {
            resource: self.mapper.plural(&singular),
            group: singular.group,
            version: singular.version,
            kind: singular.kind,
            subresource: String::new(),
        })
    }

    /// Resolves the descriptor and key for a concrete object.
    pub fn resolve_object<K>(&self, obj: &K) -> AuthzResult<(ResourceDescriptor, ObjectKey)>
    where
        K: Resource + 'static,
    {
        let descriptor = self.descriptor_for::<K>()?;
        let meta = obj.meta();
        let key = ObjectKey::new(
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        );
        Ok((descriptor, key))
    }

    /// Resolves the descriptor for a list. Lists carry no key.
    pub fn resolve_list<K: 'static>(&self, _list: &ResourceList<K>) -> AuthzResult<ResourceDescriptor> {
        self.descriptor_for::<ResourceList<K>>()
    }
}
