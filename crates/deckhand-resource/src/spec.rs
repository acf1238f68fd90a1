//! The closed set of resources a group can contain

use std::collections::BTreeMap;
use std::fmt;

use deckhand_common::{Error, Result};
use serde::Serialize;

use crate::docker::{DockerContainer, DockerImage, DockerNetwork, DockerVolume};
use crate::k8s::{
    ClusterRole, ClusterRoleBinding, ConfigMap, CustomObject, Deployment, Namespace,
    PersistentVolumeClaim, Secret, Service, ServiceAccount,
};

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();

/// Resource kinds, across both targets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    /// Kubernetes Namespace
    Namespace,
    /// Kubernetes ServiceAccount
    ServiceAccount,
    /// Kubernetes ClusterRole
    ClusterRole,
    /// Kubernetes ClusterRoleBinding
    ClusterRoleBinding,
    /// Kubernetes ConfigMap
    ConfigMap,
    /// Kubernetes Secret
    Secret,
    /// Kubernetes PersistentVolumeClaim
    PersistentVolumeClaim,
    /// Kubernetes Deployment
    Deployment,
    /// Kubernetes Service
    Service,
    /// Kubernetes CustomResourceDefinition
    CustomResourceDefinition,
    /// Any other Kubernetes object
    CustomObject,
    /// Container-runtime network
    Network,
    /// Container image
    Image,
    /// Container-runtime named volume
    Volume,
    /// Container
    Container,
}

impl ResourceKind {
    /// Position of this kind in the creation order
    pub fn stage(self) -> Stage {
        match self {
            ResourceKind::Namespace => Stage::Namespace,
            ResourceKind::Network => Stage::Network,
            ResourceKind::CustomResourceDefinition => Stage::Definitions,
            ResourceKind::ServiceAccount => Stage::ServiceAccount,
            ResourceKind::ClusterRole => Stage::ClusterRole,
            ResourceKind::ClusterRoleBinding => Stage::ClusterRoleBinding,
            ResourceKind::ConfigMap | ResourceKind::Secret => Stage::Config,
            ResourceKind::Image => Stage::Image,
            ResourceKind::Volume | ResourceKind::PersistentVolumeClaim => Stage::Volume,
            ResourceKind::Container => Stage::Container,
            ResourceKind::Deployment => Stage::Deployment,
            ResourceKind::Service => Stage::Service,
            ResourceKind::CustomObject => Stage::CustomObject,
        }
    }

    /// Kinds whose failure makes later resources that reference them pointless
    pub fn is_hard_prerequisite(self) -> bool {
        matches!(
            self,
            ResourceKind::Namespace | ResourceKind::ServiceAccount | ResourceKind::Network
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Creation stages, in order
///
/// A group lists every resource of an earlier stage before any resource of a
/// later one; deletion walks the same list backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Namespaces
    Namespace,
    /// Runtime networks
    Network,
    /// CustomResourceDefinitions
    Definitions,
    /// ServiceAccounts
    ServiceAccount,
    /// ClusterRoles
    ClusterRole,
    /// ClusterRoleBindings
    ClusterRoleBinding,
    /// ConfigMaps and Secrets
    Config,
    /// Images
    Image,
    /// Named volumes and claims
    Volume,
    /// Containers
    Container,
    /// Deployments
    Deployment,
    /// Services
    Service,
    /// Other objects
    CustomObject,
}

/// Identifies one resource within a group
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceRef {
    /// Native kind name (e.g. `Deployment`, or the kind of a custom object)
    pub kind: String,
    /// Resource name
    pub name: String,
}

impl ResourceRef {
    /// Create a reference
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// One creatable resource
///
/// Serializes to the target's native schema.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ResourceSpec {
    /// Namespace
    Namespace(Namespace),
    /// ServiceAccount
    ServiceAccount(ServiceAccount),
    /// ClusterRole
    ClusterRole(ClusterRole),
    /// ClusterRoleBinding
    ClusterRoleBinding(ClusterRoleBinding),
    /// ConfigMap
    ConfigMap(ConfigMap),
    /// Secret
    Secret(Secret),
    /// PersistentVolumeClaim
    PersistentVolumeClaim(PersistentVolumeClaim),
    /// Deployment
    Deployment(Deployment),
    /// Service
    Service(Service),
    /// CustomResourceDefinition
    CustomResourceDefinition(CustomObject),
    /// Other Kubernetes object
    CustomObject(CustomObject),
    /// Runtime network
    Network(DockerNetwork),
    /// Image
    Image(DockerImage),
    /// Runtime named volume
    Volume(DockerVolume),
    /// Container
    Container(DockerContainer),
}

impl ResourceSpec {
    /// Resource kind
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::Namespace(_) => ResourceKind::Namespace,
            ResourceSpec::ServiceAccount(_) => ResourceKind::ServiceAccount,
            ResourceSpec::ClusterRole(_) => ResourceKind::ClusterRole,
            ResourceSpec::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
            ResourceSpec::ConfigMap(_) => ResourceKind::ConfigMap,
            ResourceSpec::Secret(_) => ResourceKind::Secret,
            ResourceSpec::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            ResourceSpec::Deployment(_) => ResourceKind::Deployment,
            ResourceSpec::Service(_) => ResourceKind::Service,
            ResourceSpec::CustomResourceDefinition(_) => ResourceKind::CustomResourceDefinition,
            ResourceSpec::CustomObject(_) => ResourceKind::CustomObject,
            ResourceSpec::Network(_) => ResourceKind::Network,
            ResourceSpec::Image(_) => ResourceKind::Image,
            ResourceSpec::Volume(_) => ResourceKind::Volume,
            ResourceSpec::Container(_) => ResourceKind::Container,
        }
    }

    /// Native kind name; custom objects report their own kind
    pub fn kind_name(&self) -> &str {
        match self {
            ResourceSpec::Namespace(r) => &r.kind,
            ResourceSpec::ServiceAccount(r) => &r.kind,
            ResourceSpec::ClusterRole(r) => &r.kind,
            ResourceSpec::ClusterRoleBinding(r) => &r.kind,
            ResourceSpec::ConfigMap(r) => &r.kind,
            ResourceSpec::Secret(r) => &r.kind,
            ResourceSpec::PersistentVolumeClaim(r) => &r.kind,
            ResourceSpec::Deployment(r) => &r.kind,
            ResourceSpec::Service(r) => &r.kind,
            ResourceSpec::CustomResourceDefinition(r) | ResourceSpec::CustomObject(r) => &r.kind,
            ResourceSpec::Network(_) => "Network",
            ResourceSpec::Image(_) => "Image",
            ResourceSpec::Volume(_) => "Volume",
            ResourceSpec::Container(_) => "Container",
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        match self {
            ResourceSpec::Namespace(r) => &r.metadata.name,
            ResourceSpec::ServiceAccount(r) => &r.metadata.name,
            ResourceSpec::ClusterRole(r) => &r.metadata.name,
            ResourceSpec::ClusterRoleBinding(r) => &r.metadata.name,
            ResourceSpec::ConfigMap(r) => &r.metadata.name,
            ResourceSpec::Secret(r) => &r.metadata.name,
            ResourceSpec::PersistentVolumeClaim(r) => &r.metadata.name,
            ResourceSpec::Deployment(r) => &r.metadata.name,
            ResourceSpec::Service(r) => &r.metadata.name,
            ResourceSpec::CustomResourceDefinition(r) | ResourceSpec::CustomObject(r) => {
                &r.metadata.name
            }
            ResourceSpec::Network(r) => &r.name,
            ResourceSpec::Image(r) => &r.name,
            ResourceSpec::Volume(r) => &r.name,
            ResourceSpec::Container(r) => &r.name,
        }
    }

    /// Namespace, for namespaced orchestrator resources
    pub fn namespace(&self) -> Option<&str> {
        match self {
            ResourceSpec::ServiceAccount(r) => r.metadata.namespace.as_deref(),
            ResourceSpec::ConfigMap(r) => r.metadata.namespace.as_deref(),
            ResourceSpec::Secret(r) => r.metadata.namespace.as_deref(),
            ResourceSpec::PersistentVolumeClaim(r) => r.metadata.namespace.as_deref(),
            ResourceSpec::Deployment(r) => r.metadata.namespace.as_deref(),
            ResourceSpec::Service(r) => r.metadata.namespace.as_deref(),
            ResourceSpec::CustomObject(r) => r.metadata.namespace.as_deref(),
            _ => None,
        }
    }

    /// API version, for orchestrator resources
    pub fn api_version(&self) -> Option<&str> {
        match self {
            ResourceSpec::Namespace(r) => Some(&r.api_version),
            ResourceSpec::ServiceAccount(r) => Some(&r.api_version),
            ResourceSpec::ClusterRole(r) => Some(&r.api_version),
            ResourceSpec::ClusterRoleBinding(r) => Some(&r.api_version),
            ResourceSpec::ConfigMap(r) => Some(&r.api_version),
            ResourceSpec::Secret(r) => Some(&r.api_version),
            ResourceSpec::PersistentVolumeClaim(r) => Some(&r.api_version),
            ResourceSpec::Deployment(r) => Some(&r.api_version),
            ResourceSpec::Service(r) => Some(&r.api_version),
            ResourceSpec::CustomResourceDefinition(r) | ResourceSpec::CustomObject(r) => {
                Some(&r.api_version)
            }
            ResourceSpec::Network(_)
            | ResourceSpec::Image(_)
            | ResourceSpec::Volume(_)
            | ResourceSpec::Container(_) => None,
        }
    }

    /// Labels
    pub fn labels(&self) -> &BTreeMap<String, String> {
        match self {
            ResourceSpec::Namespace(r) => &r.metadata.labels,
            ResourceSpec::ServiceAccount(r) => &r.metadata.labels,
            ResourceSpec::ClusterRole(r) => &r.metadata.labels,
            ResourceSpec::ClusterRoleBinding(r) => &r.metadata.labels,
            ResourceSpec::ConfigMap(r) => &r.metadata.labels,
            ResourceSpec::Secret(r) => &r.metadata.labels,
            ResourceSpec::PersistentVolumeClaim(r) => &r.metadata.labels,
            ResourceSpec::Deployment(r) => &r.metadata.labels,
            ResourceSpec::Service(r) => &r.metadata.labels,
            ResourceSpec::CustomResourceDefinition(r) | ResourceSpec::CustomObject(r) => {
                &r.metadata.labels
            }
            ResourceSpec::Network(r) => &r.labels,
            ResourceSpec::Volume(r) => &r.labels,
            ResourceSpec::Container(r) => &r.labels,
            ResourceSpec::Image(_) => &NO_LABELS,
        }
    }

    /// Reference to this resource
    pub fn resource_ref(&self) -> ResourceRef {
        ResourceRef::new(self.kind_name(), self.name())
    }

    /// Native manifest as JSON
    pub fn to_manifest(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::serialization_for_kind(self.kind_name(), e.to_string()))
    }

    /// Resources this one references by name
    ///
    /// References may point outside the group (a pre-existing namespace, say);
    /// the group keeps only edges whose both ends it contains.
    pub fn references(&self) -> Vec<ResourceRef> {
        let mut refs = Vec::new();
        if let Some(ns) = self.namespace() {
            refs.push(ResourceRef::new("Namespace", ns));
        }

        match self {
            ResourceSpec::ClusterRoleBinding(crb) => {
                refs.push(ResourceRef::new(&crb.role_ref.kind, &crb.role_ref.name));
                for subject in &crb.subjects {
                    if subject.kind == "ServiceAccount" {
                        if let Some(ns) = &subject.namespace {
                            refs.push(ResourceRef::new("Namespace", ns));
                        }
                        refs.push(ResourceRef::new("ServiceAccount", &subject.name));
                    }
                }
            }
            ResourceSpec::Deployment(d) => {
                let pod = &d.spec.template.spec;
                if let Some(sa) = &pod.service_account_name {
                    refs.push(ResourceRef::new("ServiceAccount", sa));
                }
                for c in pod.init_containers.iter().chain(&pod.containers) {
                    for src in &c.env_from {
                        if let Some(cm) = &src.config_map_ref {
                            refs.push(ResourceRef::new("ConfigMap", &cm.name));
                        }
                        if let Some(s) = &src.secret_ref {
                            refs.push(ResourceRef::new("Secret", &s.name));
                        }
                    }
                }
                for v in &pod.volumes {
                    if let Some(pvc) = &v.persistent_volume_claim {
                        refs.push(ResourceRef::new("PersistentVolumeClaim", &pvc.claim_name));
                    }
                    if let Some(cm) = &v.config_map {
                        refs.push(ResourceRef::new("ConfigMap", &cm.name));
                    }
                    if let Some(s) = &v.secret {
                        refs.push(ResourceRef::new("Secret", &s.secret_name));
                    }
                }
            }
            ResourceSpec::Container(c) => {
                if let Some(network) = &c.network {
                    refs.push(ResourceRef::new("Network", network));
                }
                refs.push(ResourceRef::new("Image", image_repository(&c.image)));
                for source in c.volumes.keys() {
                    if !source.starts_with('/') {
                        refs.push(ResourceRef::new("Volume", source));
                    }
                }
            }
            _ => {}
        }
        refs
    }
}

/// Strip the tag from an image reference, leaving registry ports alone
fn image_repository(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => image,
    }
}

macro_rules! impl_from_resource {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ResourceSpec {
                fn from(r: $ty) -> Self {
                    ResourceSpec::$variant(r)
                }
            }
        )*
    };
}

impl_from_resource! {
    Namespace => Namespace,
    ServiceAccount => ServiceAccount,
    ClusterRole => ClusterRole,
    ClusterRoleBinding => ClusterRoleBinding,
    ConfigMap => ConfigMap,
    Secret => Secret,
    PersistentVolumeClaim => PersistentVolumeClaim,
    Deployment => Deployment,
    Service => Service,
    DockerNetwork => Network,
    DockerImage => Image,
    DockerVolume => Volume,
    DockerContainer => Container,
}
