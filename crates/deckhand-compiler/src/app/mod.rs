//! Application specs
//!
//! An [`AppSpec`] describes one logical application independent of where it
//! runs. Settings are grouped by concern into small option structs; every
//! struct has serde defaults so a YAML config only spells out what differs.

mod connection;
mod image;
mod ports;
mod workspace;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use deckhand_resource::docker::{DockerImage, HealthCheck, RestartPolicy};
use deckhand_resource::k8s::{
    ConfigMap, Container, CustomObject, Deployment, PersistentVolumeClaim, Secret, Service, Volume,
};
use deckhand_resource::DEFAULT_WEIGHT;
use serde::{Deserialize, Serialize};

pub use connection::{ConnectedApp, ConnectionKind, ConnectionSource, ConnectionSpec, Endpoint};
pub use image::{CommandSpec, ImageBuildSpec, ImageSpec, DEFAULT_PULL_POLICY, DEFAULT_TAG};
pub use ports::{PortSpec, PortsSpec, DEFAULT_APP_PORT_ENV};
pub use workspace::{
    GitSyncSpec, WorkspaceMountSpec, WorkspaceVolumeType, DEFAULT_MOUNT_PARENT,
    GIT_SYNC_CONTAINER, GIT_SYNC_IMAGE,
};

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

/// One logical application
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppSpec {
    /// App name; also the resource group name and the prefix of default names
    pub name: String,
    /// Version label
    #[serde(default)]
    pub version: Option<String>,
    /// Disabled apps are not compiled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Group ordering weight
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Treat already-active resources as created
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Image
    pub image: ImageSpec,
    /// Environment sources
    #[serde(default)]
    pub env: EnvSpec,
    /// Ports
    #[serde(default)]
    pub ports: PortsSpec,
    /// Workspace mount
    #[serde(default)]
    pub workspace: WorkspaceMountSpec,
    /// Upstream database/cache
    #[serde(default)]
    pub connection: ConnectionSpec,
    /// Container-runtime settings
    #[serde(default)]
    pub docker: DockerOptions,
    /// Orchestrator settings
    #[serde(default)]
    pub k8s: K8sOptions,
}

impl AppSpec {
    /// App with defaults for everything but name and image
    pub fn new(name: impl Into<String>, image: ImageSpec) -> Self {
        Self {
            name: name.into(),
            version: None,
            enabled: true,
            weight: DEFAULT_WEIGHT,
            use_cache: true,
            image,
            env: EnvSpec::default(),
            ports: PortsSpec::default(),
            workspace: WorkspaceMountSpec::default(),
            connection: ConnectionSpec::default(),
            docker: DockerOptions::default(),
            k8s: K8sOptions::default(),
        }
    }

    /// `{app}-{suffix}`
    pub fn default_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Where a container's environment comes from
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvSpec {
    /// Explicit values; highest precedence
    pub vars: BTreeMap<String, String>,
    /// Plain YAML env file, relative to the workspace root
    pub env_file: Option<PathBuf>,
    /// Inline secret values
    pub secrets: BTreeMap<String, String>,
    /// YAML secrets file, relative to the workspace root
    pub secrets_file: Option<PathBuf>,
    /// Secret id looked up through the injected secret provider
    pub secret_id: Option<String>,
    /// Export `INSTALL_REQUIREMENTS=true`
    pub install_requirements: bool,
    /// Requirements file, relative to the workspace root
    pub requirements_file: Option<String>,
    /// Export `PRINT_ENV_ON_LOAD=true`
    pub print_env_on_load: bool,
    /// Explicit `PYTHONPATH`; the workspace root when absent
    pub python_path: Option<String>,
    /// Cloud region exported as `AWS_REGION` and `AWS_DEFAULT_REGION`
    pub aws_region: Option<String>,
}

// =============================================================================
// Container runtime
// =============================================================================

/// Container-runtime settings, passed through verbatim
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerOptions {
    /// Container name; `{app}-container` when absent
    pub container_name: Option<String>,
    /// User
    pub user: Option<String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Hostname
    pub hostname: Option<String>,
    /// Platform
    pub platform: Option<String>,
    /// Restart policy
    pub restart_policy: Option<RestartPolicy>,
    /// Health check
    pub healthcheck: Option<HealthCheck>,
    /// Container labels
    pub labels: BTreeMap<String, String>,
    /// Remove on exit
    pub auto_remove: bool,
    /// Keep STDIN open
    pub stdin_open: bool,
    /// Allocate a TTY
    pub tty: bool,
    /// Additional images to build or pull
    pub images: Vec<DockerImage>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Orchestrator settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct K8sOptions {
    /// Namespace and RBAC bootstrap
    pub rbac: RbacSpec,
    /// Deployment shape
    pub deploy: DeploySpec,
    /// Generic service over every opened port
    pub service: ServiceOptions,
    /// Dedicated service for the app port
    pub app_service: ServiceOptions,
    /// ConfigMap name; `{app}-cm` when absent
    pub config_map_name: Option<String>,
    /// Secret name; `{app}-secret` when absent
    pub secret_name: Option<String>,
    /// Caller-supplied resources
    pub extras: ExtraResources,
}

/// Namespace, ServiceAccount and cluster RBAC bootstrap
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RbacSpec {
    /// Create namespace, service account, cluster role and binding
    pub enabled: bool,
    /// Namespace; `{app}-ns` when absent
    pub namespace: Option<String>,
    /// ServiceAccount; `{app}-sa` when absent
    pub service_account: Option<String>,
    /// ClusterRole; `{app}-cr` when absent
    pub cluster_role: Option<String>,
    /// ClusterRoleBinding; `{app}-crb` when absent
    pub cluster_role_binding: Option<String>,
}

/// Deployment shape
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeploySpec {
    /// Deployment name; `{app}-deploy` when absent
    pub name: Option<String>,
    /// Primary container name; `{app}-container` when absent
    pub container_name: Option<String>,
    /// Replicas
    pub replicas: u32,
    /// Node selector
    pub node_selector: Option<BTreeMap<String, String>>,
    /// Pod restart policy
    pub restart_policy: String,
    /// Termination grace period in seconds
    pub termination_grace_period_seconds: Option<i64>,
    /// Spread pods across a topology domain
    pub topology_spread: Option<TopologySpreadSpec>,
    /// Extra labels on the deployment and its pods
    pub labels: BTreeMap<String, String>,
    /// Extra pod annotations
    pub pod_annotations: BTreeMap<String, String>,
}

impl Default for DeploySpec {
    fn default() -> Self {
        Self {
            name: None,
            container_name: None,
            replicas: 1,
            node_selector: None,
            restart_policy: "Always".to_string(),
            termination_grace_period_seconds: None,
            topology_spread: None,
            labels: BTreeMap::new(),
            pod_annotations: BTreeMap::new(),
        }
    }
}

/// Topology spread
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TopologySpreadSpec {
    /// Node label key, e.g. `topology.kubernetes.io/zone`
    pub key: String,
    /// Maximum skew
    #[serde(default = "default_max_skew")]
    pub max_skew: i32,
    /// DoNotSchedule or ScheduleAnyway
    #[serde(default = "default_when_unsatisfiable")]
    pub when_unsatisfiable: String,
}

fn default_max_skew() -> i32 {
    2
}

fn default_when_unsatisfiable() -> String {
    "DoNotSchedule".to_string()
}

/// Service type
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceType {
    /// Cluster-internal virtual IP
    #[default]
    ClusterIP,
    /// Exposed on every node
    NodePort,
    /// External load balancer
    LoadBalancer,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One Service; every load-balancer field is passed through unchanged
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceOptions {
    /// Create this service
    pub enabled: bool,
    /// Name; `{app}-svc` / `{app}-app-svc` when absent
    pub name: Option<String>,
    /// Service type
    #[serde(rename = "type")]
    pub type_: ServiceType,
    /// Extra labels
    pub labels: BTreeMap<String, String>,
    /// Annotations
    pub annotations: BTreeMap<String, String>,
    /// Requested load balancer IP
    pub load_balancer_ip: Option<String>,
    /// Load balancer class
    pub load_balancer_class: Option<String>,
    /// Allowed client CIDRs
    pub load_balancer_source_ranges: Vec<String>,
    /// Health check node port
    pub health_check_node_port: Option<u16>,
    /// Allocate node ports for load balancers
    pub allocate_load_balancer_node_ports: Option<bool>,
    /// Internal traffic policy
    pub internal_traffic_policy: Option<String>,
    /// External traffic policy
    pub external_traffic_policy: Option<String>,
}

/// Caller-supplied resources appended to the generated ones
///
/// Typed namespaced objects without a namespace land in the group namespace.
/// Custom objects inherit it only when their namespace is explicitly empty;
/// an absent namespace marks them cluster-scoped.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtraResources {
    /// Secrets
    pub secrets: Vec<Secret>,
    /// ConfigMaps
    pub config_maps: Vec<ConfigMap>,
    /// Services
    pub services: Vec<Service>,
    /// Deployments
    pub deployments: Vec<Deployment>,
    /// PersistentVolumeClaims
    pub pvcs: Vec<PersistentVolumeClaim>,
    /// Containers added to the pod after the primary one
    pub containers: Vec<Container>,
    /// Init containers added after the sync init container
    pub init_containers: Vec<Container>,
    /// Pod volumes, each mounted into the primary container
    pub volumes: Vec<ExtraVolume>,
    /// Arbitrary objects
    pub custom_objects: Vec<CustomObject>,
    /// CustomResourceDefinitions
    pub crds: Vec<CustomObject>,
}

/// Caller-supplied pod volume and where the primary container sees it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExtraVolume {
    /// Pod volume
    pub volume: Volume,
    /// Mount path in the primary container
    pub mount_path: String,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
}
