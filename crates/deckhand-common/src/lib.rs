//! Common types for deckhand: errors, the filter grammar, and utilities

#![deny(missing_docs)]

pub mod error;
pub mod filter;
pub mod telemetry;
pub mod yaml;

pub use error::Error;
pub use filter::Filter;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Standard Kubernetes label for the application name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes label for the managing tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on every resource deckhand generates
pub const LABEL_MANAGED_BY_DECKHAND: &str = "deckhand";

/// Pod annotation selecting the container `kubectl exec/logs` use by default
pub const DEFAULT_CONTAINER_ANNOTATION: &str = "kubectl.kubernetes.io/default-container";

/// Field manager name used for server-side apply
pub const FIELD_MANAGER: &str = "deckhand";
