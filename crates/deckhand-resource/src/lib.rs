//! Target-native resource model for deckhand
//!
//! - [`k8s`]: orchestrator resources (Namespace, RBAC, ConfigMap, Deployment, ...)
//! - [`docker`]: container-runtime resources (network, image, volume, container)
//! - [`ResourceSpec`]: the closed union over both
//! - [`ResourceGroup`]: an ordered, immutable set of resources for one app

#![deny(missing_docs)]

pub mod docker;
pub mod group;
pub mod k8s;
pub mod meta;
pub mod spec;

pub use group::{DependencyEdge, ResourceGroup, ResourceGroupBuilder, Target, DEFAULT_WEIGHT};
pub use meta::{LabelSelector, ObjectMeta};
pub use spec::{ResourceKind, ResourceRef, ResourceSpec, Stage};
