//! Kargo Authorization - per-call authorization of cluster operations
//!
//! The Kargo API performs every cluster operation with its own privileged
//! credential. This crate makes sure it only does so when the caller of the
//! current API request would have been allowed to perform the same
//! operation.
//!
//! # Overview
//!
//! - [`AuthorizingClient`] wraps a [`ClusterClient`] and checks every
//!   operation before delegating it
//! - [`DecisionEngine`] decides: administrators pass, callers are reviewed
//!   as their mapped service accounts, and finally with their own token
//! - [`AccessReviewer`] is the seam to the cluster's authorizer;
//!   [`KubeAccessReviewer`] implements it with `SubjectAccessReview` and
//!   `SelfSubjectAccessReview`
//! - [`DescriptorResolver`] maps Rust types to the resource names the
//!   authorizer understands
//! - [`InMemoryCluster`] and [`fixtures::ScriptedReviewer`] stand in for a
//!   real cluster in tests and local mode
//!
//! # Architecture
//!
//! ```text
//!     API handler
//!         │ ctx + typed op
//!    ┌────▼──────────────────┐
//!    │  AuthorizingClient    │── DescriptorResolver ─► (descriptor, key)
//!    └────┬──────────────────┘
//!         │ decide
//!    ┌────▼──────────────────┐     ┌─────────────────────┐
//!    │  DecisionEngine       │────►│  AccessReviewer     │
//!    └────┬──────────────────┘     └─────────────────────┘
//!         │ allowed
//!    ┌────▼──────────────────┐
//!    │  ClusterClient        │  (privileged connection)
//!    └───────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use k8s_openapi::api::core::v1::ConfigMap;
//! use kargo_authz::fixtures::ScriptedReviewer;
//! use kargo_authz::{
//!     AuthorizingClient, ClientOptions, DescriptorResolver, InMemoryCluster, ObjectKey, Scheme,
//! };
//! use kargo_core::{CallerIdentity, RequestContext};
//!
//! # tokio_test::block_on(async {
//! let client = AuthorizingClient::new(
//!     Arc::new(InMemoryCluster::new()),
//!     DescriptorResolver::new(Scheme::with_kubernetes_defaults()),
//!     Arc::new(ScriptedReviewer::new()),
//!     &ClientOptions::new(),
//! );
//!
//! // Nobody is calling: denied before the cluster is contacted.
//! let err = client
//!     .get::<ConfigMap>(&RequestContext::new(), &ObjectKey::new("ns", "cm"))
//!     .await
//!     .unwrap_err();
//! assert!(err.is_not_allowed());
//!
//! // Administrators bypass reviews.
//! let ctx = RequestContext::new().with_identity(CallerIdentity::admin());
//! let err = client
//!     .get::<ConfigMap>(&ctx, &ObjectKey::new("ns", "cm"))
//!     .await
//!     .unwrap_err();
//! assert!(matches!(err, kargo_authz::AuthzError::Cluster(ref e) if e.is_not_found()));
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod cluster;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fixtures;
mod kube_review;
pub mod memory;
pub mod review;
mod verb;

// Re-exports for convenience
pub use client::{
    AuthorizingClient, ClusterObject, DeleteAllOfOptions, ListOptions, SubResourceClient,
    WatchOptions, WatchStream,
};
pub use cluster::{ClusterClient, DynamicWatchStream, Target};
pub use config::ClientOptions;
pub use descriptor::{
    ConventionalKindMapper, DescriptorResolver, KindMapper, ObjectKey, RegisteredKind,
    ResourceDescriptor, ResourceList, Scheme,
};
pub use engine::{DecisionEngine, Grant};
pub use error::{AuthzError, AuthzResult, ClusterError, ClusterResult};
pub use kube_review::KubeAccessReviewer;
pub use memory::InMemoryCluster;
pub use review::{AccessReviewer, ResourceAttributes, ReviewError, ReviewSubject};
pub use verb::Verb;
