//! Target-client contract
//!
//! The lifecycle manager never talks to a container runtime or cluster
//! directly. Everything goes through [`TargetClient`], so tests can swap in a
//! mock while production wires [`KubeTargetClient`](crate::KubeTargetClient).

use async_trait::async_trait;
use deckhand_common::Result;
use deckhand_resource::ResourceSpec;

#[cfg(test)]
use mockall::automock;

/// A resource observed on the target
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ActiveResource {
    /// Native kind name
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Namespace, for namespaced resources
    pub namespace: Option<String>,
}

impl ActiveResource {
    /// The active counterpart of a compiled resource
    pub fn from_spec(resource: &ResourceSpec) -> Self {
        Self {
            kind: resource.kind_name().to_string(),
            name: resource.name().to_string(),
            namespace: resource.namespace().map(str::to_string),
        }
    }
}

/// Selects active resources for [`TargetClient::list_active`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveQuery {
    /// API version, for orchestrator kinds (e.g. `apps/v1`)
    pub api_version: Option<String>,
    /// Native kind name
    pub kind: String,
    /// Restrict to one namespace
    pub namespace: Option<String>,
    /// Case-insensitive substring of the resource name
    pub name: Option<String>,
}

impl ActiveQuery {
    /// Query every active resource of `kind`
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Restrict to `api_version`
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Restrict to `namespace`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to names containing `name`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// True if `resource` satisfies every set field
    pub fn matches(&self, resource: &ActiveResource) -> bool {
        if !self.kind.eq_ignore_ascii_case(&resource.kind) {
            return false;
        }
        if let Some(ns) = &self.namespace {
            if resource.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        match &self.name {
            Some(name) => resource
                .name
                .to_lowercase()
                .contains(&name.to_lowercase()),
            None => true,
        }
    }
}

/// Operations a backend must support for the lifecycle manager
///
/// `create`, `delete` and `patch` return `Ok(false)` when the backend refused
/// without raising; `Err` is for transport or API failures.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetClient: Send + Sync {
    /// Create `resource`
    async fn create(&self, resource: &ResourceSpec) -> Result<bool>;

    /// Look `resource` up; `None` when it is not active
    async fn read(&self, resource: &ResourceSpec) -> Result<Option<ActiveResource>>;

    /// Delete `resource`
    async fn delete(&self, resource: &ResourceSpec) -> Result<bool>;

    /// Bring an active `resource` in line with its spec
    async fn patch(&self, resource: &ResourceSpec) -> Result<bool>;

    /// Active resources matching `query`
    async fn list_active(&self, query: &ActiveQuery) -> Result<Vec<ActiveResource>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_resource::k8s::ConfigMap;

    fn active(kind: &str, name: &str, ns: Option<&str>) -> ActiveResource {
        ActiveResource {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: ns.map(str::to_string),
        }
    }

    #[test]
    fn from_spec_copies_identity() {
        let spec = ResourceSpec::from(ConfigMap::new("api-cm", "apps"));
        assert_eq!(
            ActiveResource::from_spec(&spec),
            active("ConfigMap", "api-cm", Some("apps"))
        );
    }

    #[test]
    fn query_matches_kind_namespace_and_name() {
        let query = ActiveQuery::kind("configmap")
            .with_namespace("apps")
            .with_name("API");

        assert!(query.matches(&active("ConfigMap", "api-cm", Some("apps"))));
        assert!(!query.matches(&active("ConfigMap", "api-cm", Some("other"))));
        assert!(!query.matches(&active("ConfigMap", "etl-cm", Some("apps"))));
        assert!(!query.matches(&active("Secret", "api-cm", Some("apps"))));
    }
}
