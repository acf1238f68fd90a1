//! Primary container and Deployment

use std::collections::BTreeMap;

use deckhand_common::{DEFAULT_CONTAINER_ANNOTATION, LABEL_NAME};
use deckhand_resource::k8s::{
    Container, ContainerPort, Deployment, DeploymentSpec, EnvFromSource, PodMeta, PodSpec,
    PodTemplateSpec, TopologySpreadConstraint,
};
use deckhand_resource::{LabelSelector, ObjectMeta};

use super::volumes::PodVolumes;
use crate::app::AppSpec;

/// Selector shared by the Deployment, its pods and the Services
pub fn selector(app: &AppSpec) -> BTreeMap<String, String> {
    let mut selector = BTreeMap::new();
    selector.insert(LABEL_NAME.to_string(), app.name.clone());
    selector
}

/// Compiles the pod and its Deployment
pub struct WorkloadCompiler;

impl WorkloadCompiler {
    /// Primary container: image, command, envFrom references, ports and mounts
    pub fn primary_container(
        app: &AppSpec,
        env_from: Vec<EnvFromSource>,
        volumes: &PodVolumes,
    ) -> Container {
        let image = &app.image;
        Container {
            name: app
                .k8s
                .deploy
                .container_name
                .clone()
                .unwrap_or_else(|| app.default_name("container")),
            image: image.reference(),
            image_pull_policy: Some(image.pull_policy_or_default().to_string()),
            command: image.entrypoint.as_ref().map(|c| c.to_args()),
            args: image.command.as_ref().map(|c| c.to_args()),
            working_dir: None,
            env: Vec::new(),
            env_from,
            ports: app
                .ports
                .opened()
                .into_iter()
                .map(|p| ContainerPort {
                    name: Some(p.name.clone()),
                    container_port: p.container_port,
                    protocol: p.protocol.clone(),
                })
                .collect(),
            volume_mounts: volumes.mounts.clone(),
        }
    }

    /// Wrap the primary container in a Deployment
    ///
    /// The primary container is always first and named by the default-container
    /// annotation; side-cars and extra containers follow it.
    pub fn deployment(
        app: &AppSpec,
        namespace: &str,
        service_account: Option<String>,
        primary: Container,
        volumes: PodVolumes,
        labels: &BTreeMap<String, String>,
    ) -> Deployment {
        let deploy = &app.k8s.deploy;
        let name = deploy
            .name
            .clone()
            .unwrap_or_else(|| app.default_name("deploy"));
        let selector = selector(app);

        let mut pod_labels = labels.clone();
        pod_labels.extend(deploy.labels.clone());
        pod_labels.extend(selector.clone());

        let mut annotations = deploy.pod_annotations.clone();
        annotations.insert(
            DEFAULT_CONTAINER_ANNOTATION.to_string(),
            primary.name.clone(),
        );

        let mut containers = vec![primary];
        containers.extend(volumes.sidecars);
        containers.extend(app.k8s.extras.containers.iter().cloned());

        let mut init_containers = volumes.init_containers;
        init_containers.extend(app.k8s.extras.init_containers.iter().cloned());

        let topology_spread_constraints = deploy
            .topology_spread
            .iter()
            .map(|spread| TopologySpreadConstraint {
                max_skew: spread.max_skew,
                topology_key: spread.key.clone(),
                when_unsatisfiable: spread.when_unsatisfiable.clone(),
                label_selector: LabelSelector {
                    match_labels: selector.clone(),
                },
            })
            .collect();

        Deployment {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata: ObjectMeta::new(name, namespace).with_labels(&pod_labels),
            spec: DeploymentSpec {
                replicas: deploy.replicas,
                selector: LabelSelector {
                    match_labels: selector,
                },
                template: PodTemplateSpec {
                    metadata: PodMeta {
                        labels: pod_labels,
                        annotations,
                    },
                    spec: PodSpec {
                        service_account_name: service_account,
                        containers,
                        init_containers,
                        volumes: volumes.volumes,
                        node_selector: deploy.node_selector.clone(),
                        restart_policy: Some(deploy.restart_policy.clone()),
                        termination_grace_period_seconds: deploy.termination_grace_period_seconds,
                        topology_spread_constraints,
                    },
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{CommandSpec, ImageSpec, TopologySpreadSpec};

    fn app() -> AppSpec {
        let mut app = AppSpec::new("api", ImageSpec::new("registry.local/api", "3"));
        app.image.entrypoint = Some(CommandSpec::Line("/bin/serve".to_string()));
        app.image.command = Some(CommandSpec::Args(vec!["--port".into(), "8000".into()]));
        app.ports.open_main_port = true;
        app
    }

    #[test]
    fn primary_container_normalizes_command_and_ports() {
        let c = WorkloadCompiler::primary_container(
            &app(),
            vec![EnvFromSource::config_map("api-cm")],
            &PodVolumes::default(),
        );
        assert_eq!(c.name, "api-container");
        assert_eq!(c.image, "registry.local/api:3");
        assert_eq!(c.image_pull_policy.as_deref(), Some("IfNotPresent"));
        assert_eq!(c.command, Some(vec!["/bin/serve".to_string()]));
        assert_eq!(c.args, Some(vec!["--port".to_string(), "8000".to_string()]));
        assert_eq!(c.ports[0].name.as_deref(), Some("http"));
        assert_eq!(c.ports[0].container_port, 8000);
    }

    #[test]
    fn deployment_puts_primary_first_and_annotates_it() {
        let mut app = app();
        app.k8s.deploy.replicas = 3;
        app.k8s.deploy.topology_spread = Some(TopologySpreadSpec {
            key: "topology.kubernetes.io/zone".to_string(),
            max_skew: 1,
            when_unsatisfiable: "ScheduleAnyway".to_string(),
        });
        app.k8s.extras.containers.push(Container {
            name: "proxy".to_string(),
            image: "envoy:1".to_string(),
            ..Default::default()
        });

        let primary = WorkloadCompiler::primary_container(&app, Vec::new(), &PodVolumes::default());
        let d = WorkloadCompiler::deployment(
            &app,
            "api-ns",
            Some("api-sa".to_string()),
            primary,
            PodVolumes::default(),
            &BTreeMap::new(),
        );

        assert_eq!(d.metadata.name, "api-deploy");
        assert_eq!(d.spec.replicas, 3);
        assert_eq!(d.spec.selector.match_labels[LABEL_NAME], "api");
        let pod = &d.spec.template;
        assert_eq!(pod.metadata.labels[LABEL_NAME], "api");
        assert_eq!(
            pod.metadata.annotations[DEFAULT_CONTAINER_ANNOTATION],
            "api-container"
        );
        let names: Vec<&str> = pod.spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["api-container", "proxy"]);
        assert_eq!(pod.spec.restart_policy.as_deref(), Some("Always"));
        assert_eq!(pod.spec.service_account_name.as_deref(), Some("api-sa"));
        assert_eq!(pod.spec.topology_spread_constraints[0].max_skew, 1);
    }
}
