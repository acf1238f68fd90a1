//! Lifecycle management for deckhand resource groups
//!
//! [`LifecycleManager`] takes compiled [`ResourceGroup`](deckhand_resource::ResourceGroup)s
//! and creates, deletes or patches them through an injected [`TargetClient`]:
//!
//! - create and patch walk groups in compiled order, delete in reverse
//! - each mutating call is followed by a read-back before the resource counts
//!   as succeeded
//! - a dry run only plans and never touches a target
//!
//! [`KubeTargetClient`] is the cluster-backed client; tests inject mocks.

#![deny(missing_docs)]

pub mod client;
pub mod kube_client;
pub mod manager;
pub mod manifest;
pub mod outcome;

pub use client::{ActiveQuery, ActiveResource, TargetClient};
pub use kube_client::KubeTargetClient;
pub use manager::{LifecycleManager, ManagerOptions};
pub use manifest::save_manifests;
pub use outcome::{Failure, FailureStage, Operation, OperationResult, PlannedAction, RunReport};
