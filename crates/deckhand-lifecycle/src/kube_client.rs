//! Target client for a Kubernetes cluster
//!
//! Works on untyped [`DynamicObject`]s so any kind a group can hold, custom
//! objects included, goes through the same code path. Namespaced kinds use
//! the namespace from their metadata; everything else is cluster-scoped.

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::Client;
use tracing::{debug, info};

use deckhand_common::{
    Error, Result, FIELD_MANAGER, LABEL_MANAGED_BY, LABEL_MANAGED_BY_DECKHAND,
};
use deckhand_resource::ResourceSpec;

use crate::client::{ActiveQuery, ActiveResource, TargetClient};

/// Plurals the suffix rules get wrong
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("networkpolicy", "networkpolicies"),
    ("ingressclass", "ingressclasses"),
    ("storageclass", "storageclasses"),
];

/// Split `group/version` (or a bare core `version`)
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build an [`ApiResource`] from an explicit apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// [`TargetClient`] over the Kubernetes API
pub struct KubeTargetClient {
    client: Client,
}

impl KubeTargetClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn api(&self, api_version: &str, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = build_api_resource(api_version, kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn api_for(&self, resource: &ResourceSpec) -> Result<Api<DynamicObject>> {
        let api_version = resource.api_version().ok_or_else(|| {
            Error::execution(
                resource.kind_name(),
                resource.name(),
                "not an orchestrator resource",
            )
        })?;
        Ok(self.api(api_version, resource.kind_name(), resource.namespace()))
    }
}

fn to_object(resource: &ResourceSpec) -> Result<DynamicObject> {
    serde_json::from_value(resource.to_manifest()?)
        .map_err(|e| Error::serialization_for_kind(resource.kind_name(), e.to_string()))
}

fn to_active(kind: &str, obj: &DynamicObject) -> ActiveResource {
    ActiveResource {
        kind: kind.to_string(),
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone(),
    }
}

#[async_trait]
impl TargetClient for KubeTargetClient {
    async fn create(&self, resource: &ResourceSpec) -> Result<bool> {
        let api = self.api_for(resource)?;
        let obj = to_object(resource)?;
        match api.create(&PostParams::default(), &obj).await {
            Ok(_) => {
                info!(
                    kind = %resource.kind_name(),
                    name = %resource.name(),
                    namespace = ?resource.namespace(),
                    "created resource"
                );
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(
                    kind = %resource.kind_name(),
                    name = %resource.name(),
                    "resource already exists"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, resource: &ResourceSpec) -> Result<Option<ActiveResource>> {
        let api = self.api_for(resource)?;
        let found = api.get_opt(resource.name()).await?;
        // terminating objects are already on their way out
        Ok(found
            .filter(|obj| obj.metadata.deletion_timestamp.is_none())
            .map(|obj| to_active(resource.kind_name(), &obj)))
    }

    async fn delete(&self, resource: &ResourceSpec) -> Result<bool> {
        let api = self.api_for(resource)?;
        match api
            .delete(resource.name(), &DeleteParams::background())
            .await
        {
            Ok(_) => {
                info!(
                    kind = %resource.kind_name(),
                    name = %resource.name(),
                    namespace = ?resource.namespace(),
                    "deleted resource"
                );
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch(&self, resource: &ResourceSpec) -> Result<bool> {
        let api = self.api_for(resource)?;
        let obj = to_object(resource)?;
        api.patch(
            resource.name(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&obj),
        )
        .await?;

        info!(
            kind = %resource.kind_name(),
            name = %resource.name(),
            namespace = ?resource.namespace(),
            "applied resource"
        );
        Ok(true)
    }

    async fn list_active(&self, query: &ActiveQuery) -> Result<Vec<ActiveResource>> {
        let api_version = query.api_version.as_deref().ok_or_else(|| {
            Error::execution(&query.kind, "*", "listing needs an api version")
        })?;
        let api = self.api(api_version, &query.kind, query.namespace.as_deref());
        let selector = format!("{LABEL_MANAGED_BY}={LABEL_MANAGED_BY_DECKHAND}");
        let params = ListParams::default().labels(&selector);

        let list = api.list(&params).await?;
        Ok(list
            .items
            .iter()
            .map(|obj| to_active(&query.kind, obj))
            .filter(|active| query.matches(active))
            .collect())
    }
}
