//! Orchestrator backend
//!
//! Emits, in dependency order:
//! 1. Namespace, ServiceAccount, ClusterRole and ClusterRoleBinding (when RBAC
//!    bootstrap is enabled)
//! 2. a ConfigMap with every non-secret variable, and a Secret when secret
//!    values exist; the primary container imports both through `envFrom`
//! 3. the Deployment with the workspace volume and git sync containers
//! 4. zero, one or two Services
//! 5. caller-supplied extras
//!
//! The group builder buckets everything by stage, so pushing in any order
//! still yields a valid creation order.

pub mod rbac;
pub mod service;
pub mod volumes;
pub mod workload;

use std::collections::BTreeMap;

use deckhand_common::LABEL_NAME;
use deckhand_resource::k8s::{ConfigMap, EnvFromSource, Secret};
use deckhand_resource::{ResourceGroup, ResourceGroupBuilder, ResourceSpec, Target};
use tracing::debug;

pub use rbac::RbacCompiler;
pub use service::ServiceCompiler;
pub use volumes::{PodVolumes, VolumeCompiler};
pub use workload::WorkloadCompiler;

use crate::app::{AppSpec, ExtraResources};
use crate::context::{EnvironmentContext, K8sBuildContext};
use crate::env::{EnvResolver, EnvSource, ResolvedEnv, SecretProvider};
use crate::{push_all, CompileError};

/// Label carrying the app version
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";

/// Compiles one app for the orchestrator
pub struct OrchestratorCompiler<'a> {
    app: &'a AppSpec,
    ctx: &'a EnvironmentContext,
    build: &'a K8sBuildContext,
    secrets: Option<&'a dyn SecretProvider>,
}

impl<'a> OrchestratorCompiler<'a> {
    /// Create a compiler
    pub fn new(app: &'a AppSpec, ctx: &'a EnvironmentContext, build: &'a K8sBuildContext) -> Self {
        Self {
            app,
            ctx,
            build,
            secrets: None,
        }
    }

    /// Use an external secret provider
    pub fn with_secret_provider(mut self, provider: Option<&'a dyn SecretProvider>) -> Self {
        self.secrets = provider;
        self
    }

    /// Compile into `builder`
    pub fn compile(
        &self,
        mut builder: ResourceGroupBuilder,
    ) -> Result<ResourceGroup, CompileError> {
        let app = self.app;
        let rbac = &app.k8s.rbac;
        let labels = self.labels();

        // RBAC bootstrap, or fall back to build-context identities
        let (namespace, service_account) = if rbac.enabled {
            let namespace = rbac
                .namespace
                .clone()
                .unwrap_or_else(|| app.default_name("ns"));
            let service_account = rbac
                .service_account
                .clone()
                .unwrap_or_else(|| app.default_name("sa"));
            push_all(
                &mut builder,
                RbacCompiler::compile(app, &namespace, &service_account, &labels),
            )?;
            (namespace, Some(service_account))
        } else {
            let namespace = self.build.namespace.trim();
            if namespace.is_empty() {
                return Err(CompileError::InvalidBuildContext(
                    "namespace is empty and RBAC bootstrap is disabled".to_string(),
                ));
            }
            (namespace.to_string(), self.build.service_account_name.clone())
        };

        // Environment
        let mut env = EnvResolver::new(app, self.ctx, Target::Kubernetes)
            .with_secret_provider(self.secrets)
            .resolve()?;
        self.write_app_port(&mut env)?;
        let env_from = self.materialize_env(&mut builder, &env, &namespace, &labels)?;

        // Workload
        let volumes = VolumeCompiler::compile(app, self.ctx)?;
        let primary = WorkloadCompiler::primary_container(app, env_from, &volumes);
        let deployment = WorkloadCompiler::deployment(
            app,
            &namespace,
            service_account,
            primary,
            volumes,
            &labels,
        );
        push_all(&mut builder, [deployment])?;
        push_all(
            &mut builder,
            ServiceCompiler::compile(app, &namespace, &labels)?,
        )?;

        push_extras(&mut builder, &app.k8s.extras, &namespace)?;

        debug!(
            app = %app.name,
            namespace = %namespace,
            rbac = rbac.enabled,
            "compiled orchestrator resources"
        );
        Ok(builder.build())
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.build.labels.clone();
        labels.insert(LABEL_NAME.to_string(), self.app.name.clone());
        if let Some(version) = &self.app.version {
            labels.insert(LABEL_VERSION.to_string(), version.clone());
        }
        labels
    }

    fn write_app_port(&self, env: &mut ResolvedEnv) -> Result<(), CompileError> {
        let ports = &self.app.ports;
        if !ports.open_app_port {
            return Ok(());
        }
        if ports.app_port_env.trim().is_empty() {
            return Err(CompileError::InvalidPorts(
                "app port is open but its env var name is empty".to_string(),
            ));
        }
        env.set(
            ports.app_port_env.clone(),
            ports.app.container_port.to_string(),
            EnvSource::Explicit,
        );
        Ok(())
    }

    /// ConfigMap always, Secret only when sensitive values exist
    ///
    /// The returned `envFrom` list also imports every extra ConfigMap and
    /// Secret.
    fn materialize_env(
        &self,
        builder: &mut ResourceGroupBuilder,
        env: &ResolvedEnv,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<EnvFromSource>, CompileError> {
        let k8s = &self.app.k8s;
        let cm_name = k8s
            .config_map_name
            .clone()
            .unwrap_or_else(|| self.app.default_name("cm"));

        let mut cm = ConfigMap::new(&cm_name, namespace);
        cm.metadata.labels.extend(labels.clone());
        cm.data = env.plain();
        push_all(builder, [cm])?;
        let mut env_from = vec![EnvFromSource::config_map(cm_name)];

        let sensitive = env.sensitive();
        if !sensitive.is_empty() {
            let secret_name = k8s
                .secret_name
                .clone()
                .unwrap_or_else(|| self.app.default_name("secret"));
            let mut secret = Secret::new(&secret_name, namespace);
            secret.metadata.labels.extend(labels.clone());
            secret.string_data = sensitive;
            push_all(builder, [secret])?;
            env_from.push(EnvFromSource::secret(secret_name));
        }

        // caller-supplied env sources follow the generated ones
        env_from.extend(
            k8s.extras
                .config_maps
                .iter()
                .map(|cm| EnvFromSource::config_map(cm.metadata.name.as_str())),
        );
        env_from.extend(
            k8s.extras
                .secrets
                .iter()
                .map(|s| EnvFromSource::secret(s.metadata.name.as_str())),
        );
        Ok(env_from)
    }
}

/// Append caller-supplied resources
///
/// Typed namespaced kinds without a namespace land in the group namespace.
/// Custom objects only inherit it when their namespace is `Some("")`, since
/// `None` is how a cluster-scoped object is written.
fn push_extras(
    builder: &mut ResourceGroupBuilder,
    extras: &ExtraResources,
    namespace: &str,
) -> Result<(), CompileError> {
    fn fill(ns: &mut Option<String>, namespace: &str) {
        if ns.as_deref().map_or(true, str::is_empty) {
            *ns = Some(namespace.to_string());
        }
    }

    fn fill_custom(ns: &mut Option<String>, namespace: &str) {
        if ns.as_deref() == Some("") {
            *ns = Some(namespace.to_string());
        }
    }

    let mut resources: Vec<ResourceSpec> = Vec::new();
    for s in &extras.secrets {
        let mut s = s.clone();
        fill(&mut s.metadata.namespace, namespace);
        resources.push(s.into());
    }
    for cm in &extras.config_maps {
        let mut cm = cm.clone();
        fill(&mut cm.metadata.namespace, namespace);
        resources.push(cm.into());
    }
    for pvc in &extras.pvcs {
        let mut pvc = pvc.clone();
        fill(&mut pvc.metadata.namespace, namespace);
        resources.push(pvc.into());
    }
    for d in &extras.deployments {
        let mut d = d.clone();
        fill(&mut d.metadata.namespace, namespace);
        resources.push(d.into());
    }
    for svc in &extras.services {
        let mut svc = svc.clone();
        fill(&mut svc.metadata.namespace, namespace);
        resources.push(svc.into());
    }
    for crd in &extras.crds {
        resources.push(ResourceSpec::CustomResourceDefinition(crd.clone()));
    }
    for obj in &extras.custom_objects {
        let mut obj = obj.clone();
        fill_custom(&mut obj.metadata.namespace, namespace);
        resources.push(ResourceSpec::CustomObject(obj));
    }
    push_all(builder, resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ExtraVolume, ImageSpec, WorkspaceVolumeType};
    use crate::context::WorkspacePaths;
    use deckhand_resource::k8s::{
        CustomObject, PersistentVolumeClaim, PvcSpec, PvcVolumeSource, Volume,
    };
    use deckhand_resource::{ObjectMeta, ResourceKind};

    fn ctx() -> EnvironmentContext {
        EnvironmentContext::resolve(&WorkspacePaths::new("/srv/analytics"), "/mnt/workspaces")
            .expect("context should resolve")
    }

    fn compile(app: &AppSpec, build: &K8sBuildContext) -> Result<ResourceGroup, CompileError> {
        let ctx = ctx();
        OrchestratorCompiler::new(app, &ctx, build)
            .compile(ResourceGroup::builder(&app.name, Target::Kubernetes))
    }

    fn full_app() -> AppSpec {
        let mut app = AppSpec::new("airflow", ImageSpec::new("apache/airflow", "2.9"));
        app.k8s.rbac.enabled = true;
        app.ports.open_main_port = true;
        app.ports.open_app_port = true;
        app.k8s.service.enabled = true;
        app.k8s.app_service.enabled = true;
        app.env.secrets.insert("FERNET_KEY".to_string(), "abc".to_string());
        app.env.vars.insert("LOG_LEVEL".to_string(), "info".to_string());
        app.workspace.mount = true;
        app
    }

    fn index_of(group: &ResourceGroup, kind: &str, name: &str) -> usize {
        group
            .resources()
            .iter()
            .position(|r| r.kind_name() == kind && r.name() == name)
            .unwrap_or_else(|| panic!("{kind}/{name} missing"))
    }

    // =========================================================================
    // Story: a full bootstrap lands in dependency order
    // =========================================================================

    #[test]
    fn story_rbac_group_is_ordered() {
        let group = compile(&full_app(), &K8sBuildContext::default()).expect("compile");

        let ns = index_of(&group, "Namespace", "airflow-ns");
        let sa = index_of(&group, "ServiceAccount", "airflow-sa");
        let cr = index_of(&group, "ClusterRole", "airflow-cr");
        let crb = index_of(&group, "ClusterRoleBinding", "airflow-crb");
        let cm = index_of(&group, "ConfigMap", "airflow-cm");
        let secret = index_of(&group, "Secret", "airflow-secret");
        let deploy = index_of(&group, "Deployment", "airflow-deploy");
        let svc = index_of(&group, "Service", "airflow-svc");
        let app_svc = index_of(&group, "Service", "airflow-app-svc");

        assert!(ns < sa && sa < cr && cr < crb && crb < cm);
        assert!(cm < deploy && secret < deploy);
        assert!(deploy < svc && deploy < app_svc);
        assert_eq!(group.len(), 9);
    }

    #[test]
    fn story_env_is_split_between_config_map_and_secret() {
        let group = compile(&full_app(), &K8sBuildContext::default()).expect("compile");

        match group.get("ConfigMap", "airflow-cm") {
            Some(ResourceSpec::ConfigMap(cm)) => {
                assert_eq!(cm.data["LOG_LEVEL"], "info");
                assert_eq!(cm.data["APP_PORT"], "9090");
                assert_eq!(cm.data["RUNTIME_ENV"], "kubernetes");
                assert!(!cm.data.contains_key("FERNET_KEY"));
            }
            other => panic!("expected ConfigMap, got {other:?}"),
        }
        match group.get("Secret", "airflow-secret") {
            Some(ResourceSpec::Secret(s)) => assert_eq!(s.string_data["FERNET_KEY"], "abc"),
            other => panic!("expected Secret, got {other:?}"),
        }
        match group.get("Deployment", "airflow-deploy") {
            Some(ResourceSpec::Deployment(d)) => {
                let c = &d.spec.template.spec.containers[0];
                assert_eq!(c.env_from.len(), 2);
                assert!(c.env.is_empty());
                assert_eq!(
                    d.spec.template.spec.service_account_name.as_deref(),
                    Some("airflow-sa")
                );
                assert_eq!(d.metadata.namespace.as_deref(), Some("airflow-ns"));
            }
            other => panic!("expected Deployment, got {other:?}"),
        }
    }

    #[test]
    fn story_edges_link_workload_to_bootstrap() {
        let group = compile(&full_app(), &K8sBuildContext::default()).expect("compile");
        let has_edge = |pre: &str, dep: &str| {
            group
                .edges()
                .iter()
                .any(|e| e.prerequisite.to_string() == pre && e.dependent.to_string() == dep)
        };

        assert!(has_edge("Namespace/airflow-ns", "Deployment/airflow-deploy"));
        assert!(has_edge("ServiceAccount/airflow-sa", "Deployment/airflow-deploy"));
        assert!(has_edge("ConfigMap/airflow-cm", "Deployment/airflow-deploy"));
        assert!(has_edge("Secret/airflow-secret", "Deployment/airflow-deploy"));
        assert!(has_edge("ClusterRole/airflow-cr", "ClusterRoleBinding/airflow-crb"));
        assert!(has_edge("Deployment/airflow-deploy", "Service/airflow-svc"));
    }

    // =========================================================================
    // Story: without RBAC the build context supplies identities
    // =========================================================================

    #[test]
    fn story_disabled_rbac_falls_back_to_build_context() {
        let mut app = AppSpec::new("web", ImageSpec::new("web", "1"));
        app.version = Some("1.4.0".to_string());
        let mut build = K8sBuildContext {
            namespace: "shared".to_string(),
            service_account_name: Some("runner".to_string()),
            ..Default::default()
        };
        build.labels.insert("team".to_string(), "data".to_string());

        let group = compile(&app, &build).expect("compile");
        assert!(group.of_kind(ResourceKind::Namespace).next().is_none());
        assert!(group.get("Secret", "web-secret").is_none());

        match group.get("Deployment", "web-deploy") {
            Some(ResourceSpec::Deployment(d)) => {
                assert_eq!(d.metadata.namespace.as_deref(), Some("shared"));
                assert_eq!(d.metadata.labels["team"], "data");
                assert_eq!(d.metadata.labels[LABEL_VERSION], "1.4.0");
                assert_eq!(
                    d.spec.template.spec.service_account_name.as_deref(),
                    Some("runner")
                );
            }
            other => panic!("expected Deployment, got {other:?}"),
        }
    }

    #[test]
    fn empty_namespace_without_rbac_is_invalid() {
        let app = AppSpec::new("web", ImageSpec::new("web", "1"));
        let build = K8sBuildContext {
            namespace: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            compile(&app, &build),
            Err(CompileError::InvalidBuildContext(_))
        ));
    }

    #[test]
    fn missing_sync_repo_aborts_whole_group() {
        let mut app = full_app();
        app.workspace.volume_type = WorkspaceVolumeType::EmptyDir;
        assert!(matches!(
            compile(&app, &K8sBuildContext::default()),
            Err(CompileError::MissingGitSyncRepo)
        ));
    }

    // =========================================================================
    // Story: extras join the group in their own stages
    // =========================================================================

    #[test]
    fn story_extras_inherit_namespace_and_keep_order() {
        let mut app = full_app();
        app.k8s.extras.pvcs.push(PersistentVolumeClaim {
            api_version: "v1".to_string(),
            kind: "PersistentVolumeClaim".to_string(),
            metadata: ObjectMeta::cluster_scoped("airflow-logs"),
            spec: PvcSpec {
                access_modes: vec!["ReadWriteOnce".to_string()],
                ..Default::default()
            },
        });
        app.k8s.extras.volumes.push(ExtraVolume {
            volume: Volume {
                name: "logs".to_string(),
                persistent_volume_claim: Some(PvcVolumeSource {
                    claim_name: "airflow-logs".to_string(),
                    read_only: None,
                }),
                ..Default::default()
            },
            mount_path: "/opt/airflow/logs".to_string(),
            read_only: false,
        });
        app.k8s.extras.custom_objects.push(CustomObject {
            api_version: "monitoring.coreos.com/v1".to_string(),
            kind: "ServiceMonitor".to_string(),
            metadata: ObjectMeta::new("airflow-metrics", ""),
            body: BTreeMap::new(),
        });

        let group = compile(&app, &K8sBuildContext::default()).expect("compile");
        let pvc = index_of(&group, "PersistentVolumeClaim", "airflow-logs");
        let deploy = index_of(&group, "Deployment", "airflow-deploy");
        let monitor = index_of(&group, "ServiceMonitor", "airflow-metrics");
        assert!(pvc < deploy && deploy < monitor);

        assert_eq!(group.resources()[pvc].namespace(), Some("airflow-ns"));
        assert_eq!(group.resources()[monitor].namespace(), Some("airflow-ns"));
        assert!(group.edges().iter().any(|e| {
            e.prerequisite.to_string() == "PersistentVolumeClaim/airflow-logs"
                && e.dependent.to_string() == "Deployment/airflow-deploy"
        }));

        match group.get("Deployment", "airflow-deploy") {
            Some(ResourceSpec::Deployment(d)) => {
                let pod = &d.spec.template.spec;
                assert!(pod.volumes.iter().any(|v| v.name == "logs"));
                let logs = pod.containers[0]
                    .volume_mounts
                    .iter()
                    .find(|m| m.name == "logs")
                    .expect("extra volume is mounted");
                assert_eq!(logs.mount_path, "/opt/airflow/logs");
            }
            other => panic!("expected Deployment, got {other:?}"),
        }
    }

    #[test]
    fn cluster_scoped_custom_object_keeps_no_namespace() {
        let mut app = full_app();
        app.k8s.extras.custom_objects.push(CustomObject {
            api_version: "cert-manager.io/v1".to_string(),
            kind: "ClusterIssuer".to_string(),
            metadata: ObjectMeta::cluster_scoped("letsencrypt"),
            body: BTreeMap::new(),
        });

        let group = compile(&app, &K8sBuildContext::default()).expect("compile");
        let issuer = index_of(&group, "ClusterIssuer", "letsencrypt");
        assert_eq!(group.resources()[issuer].namespace(), None);
    }

    #[test]
    fn extra_config_maps_and_secrets_are_imported_as_env() {
        let mut app = full_app();
        app.k8s.extras.config_maps.push(ConfigMap::new("extra-cm", ""));
        app.k8s.extras.secrets.push(Secret::new("extra-secret", "airflow-ns"));

        let group = compile(&app, &K8sBuildContext::default()).expect("compile");
        assert_eq!(
            group.resources()[index_of(&group, "ConfigMap", "extra-cm")].namespace(),
            Some("airflow-ns")
        );
        match group.get("Deployment", "airflow-deploy") {
            Some(ResourceSpec::Deployment(d)) => {
                let env_from = &d.spec.template.spec.containers[0].env_from;
                assert_eq!(
                    env_from,
                    &vec![
                        EnvFromSource::config_map("airflow-cm"),
                        EnvFromSource::secret("airflow-secret"),
                        EnvFromSource::config_map("extra-cm"),
                        EnvFromSource::secret("extra-secret"),
                    ]
                );
            }
            other => panic!("expected Deployment, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_extra_is_rejected() {
        let mut app = full_app();
        app.k8s.extras.config_maps.push(ConfigMap::new("airflow-cm", "airflow-ns"));
        assert!(matches!(
            compile(&app, &K8sBuildContext::default()),
            Err(CompileError::DuplicateResource(_))
        ));
    }
}
