//! Container-runtime backend
//!
//! Emits the network, any images to build, the workspace volume (empty-volume
//! mode only) and exactly one container per app.

use std::collections::BTreeMap;

use deckhand_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_DECKHAND, LABEL_NAME};
use deckhand_resource::docker::{
    DockerContainer, DockerImage, DockerNetwork, DockerVolume, VolumeBind,
};
use deckhand_resource::{ResourceGroup, ResourceGroupBuilder, Target};
use tracing::debug;

use crate::app::{AppSpec, WorkspaceVolumeType};
use crate::context::{DockerBuildContext, EnvironmentContext};
use crate::env::{EnvResolver, EnvSource, ResolvedEnv, SecretProvider};
use crate::{push_all, CompileError};

/// Compiles one app for the container runtime
pub struct ContainerCompiler<'a> {
    app: &'a AppSpec,
    ctx: &'a EnvironmentContext,
    build: &'a DockerBuildContext,
    secrets: Option<&'a dyn SecretProvider>,
}

impl<'a> ContainerCompiler<'a> {
    /// Create a compiler
    pub fn new(
        app: &'a AppSpec,
        ctx: &'a EnvironmentContext,
        build: &'a DockerBuildContext,
    ) -> Self {
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
        let network = self.build.network.trim();
        if network.is_empty() {
            return Err(CompileError::InvalidBuildContext(
                "container network name is empty".to_string(),
            ));
        }

        let mut env = EnvResolver::new(self.app, self.ctx, Target::Docker)
            .with_secret_provider(self.secrets)
            .resolve()?;
        let (volumes, named_volume) = self.volumes()?;
        let ports = self.ports(&mut env)?;
        let images = self.images();

        let container = self.container(network, env, ports, volumes);
        debug!(
            app = %self.app.name,
            container = %container.name,
            images = images.len(),
            "compiled container"
        );

        push_all(&mut builder, [self.network(network)])?;
        push_all(&mut builder, images)?;
        push_all(&mut builder, named_volume)?;
        push_all(&mut builder, [container])?;
        Ok(builder.build())
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_NAME.to_string(), self.app.name.clone());
        labels.insert(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_DECKHAND.to_string(),
        );
        labels
    }

    fn network(&self, name: &str) -> DockerNetwork {
        let mut network = DockerNetwork::new(name);
        network.labels.insert(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_DECKHAND.to_string(),
        );
        network
    }

    /// Binds keyed by host path or volume name, plus the named volume if any
    #[allow(clippy::type_complexity)]
    fn volumes(
        &self,
    ) -> Result<(BTreeMap<String, VolumeBind>, Option<DockerVolume>), CompileError> {
        let ws = &self.app.workspace;
        let mut binds = BTreeMap::new();
        let mut named = None;

        if ws.mount {
            match ws.volume_type {
                WorkspaceVolumeType::HostPath => {
                    binds.insert(self.absolute_host_root()?, VolumeBind::rw(self.ctx.root()));
                }
                WorkspaceVolumeType::EmptyDir => {
                    let name = ws.volume_name_for(&self.app.name);
                    binds.insert(name.clone(), VolumeBind::rw(self.ctx.root()));
                    named = Some(DockerVolume {
                        name,
                        driver: None,
                        labels: self.labels(),
                    });
                }
                other => {
                    return Err(CompileError::UnsupportedVolumeType {
                        volume_type: other,
                        target: Target::Docker,
                    })
                }
            }
        }

        if ws.mount_resources {
            self.absolute_host_root()?;
            let source = self.ctx.host_path(&ws.resources_dir);
            binds.insert(
                source.display().to_string(),
                VolumeBind::ro(&ws.resources_container_path),
            );
        }
        Ok((binds, named))
    }

    fn absolute_host_root(&self) -> Result<String, CompileError> {
        let root = self.ctx.host_root();
        if !root.is_absolute() {
            return Err(CompileError::InvalidContext(format!(
                "host-path mounts need an absolute workspace root, got {}",
                root.display()
            )));
        }
        Ok(root.display().to_string())
    }

    /// Publish map; writes the app port into `env` when it is opened
    fn ports(&self, env: &mut ResolvedEnv) -> Result<BTreeMap<String, u16>, CompileError> {
        let spec = &self.app.ports;
        let mut ports = spec.runtime_ports.clone();

        let mut declared = BTreeMap::new();
        for port in spec.opened() {
            let key = port.runtime_key();
            if let Some(previous) = declared.insert(key.clone(), port.name.as_str()) {
                return Err(CompileError::InvalidPorts(format!(
                    "ports '{}' and '{}' both publish container port {}",
                    previous, port.name, key
                )));
            }
            ports.insert(key, port.host_port_or_default());
        }

        if spec.open_app_port {
            if spec.app_port_env.trim().is_empty() {
                return Err(CompileError::InvalidPorts(
                    "app port is open but its env var name is empty".to_string(),
                ));
            }
            env.set(
                spec.app_port_env.clone(),
                spec.app.container_port.to_string(),
                EnvSource::Explicit,
            );
        }
        Ok(ports)
    }

    fn images(&self) -> Vec<DockerImage> {
        let image = &self.app.image;
        let mut images = Vec::new();
        if let Some(build) = &image.build {
            images.push(DockerImage {
                name: image.name.clone(),
                tag: image.tag_or_default().to_string(),
                path: Some(self.ctx.host_path(&build.path).display().to_string()),
                dockerfile: build.dockerfile.clone(),
                pull: build.pull,
                platform: build.platform.clone(),
                buildargs: build.buildargs.clone(),
            });
        }
        images.extend(self.app.docker.images.iter().cloned());
        images
    }

    fn container(
        &self,
        network: &str,
        env: ResolvedEnv,
        ports: BTreeMap<String, u16>,
        volumes: BTreeMap<String, VolumeBind>,
    ) -> DockerContainer {
        let app = self.app;
        let opts = &app.docker;
        let mut labels = self.labels();
        labels.extend(opts.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        DockerContainer {
            name: opts
                .container_name
                .clone()
                .unwrap_or_else(|| app.default_name("container")),
            image: app.image.reference(),
            entrypoint: app.image.entrypoint.as_ref().map(|c| c.to_args()),
            command: app.image.command.as_ref().map(|c| c.to_args()),
            environment: env.to_map(),
            network: Some(network.to_string()),
            ports,
            volumes,
            restart_policy: opts.restart_policy.clone(),
            healthcheck: opts.healthcheck.clone(),
            user: opts.user.clone(),
            working_dir: opts.working_dir.clone(),
            hostname: opts.hostname.clone(),
            platform: opts.platform.clone(),
            labels,
            auto_remove: opts.auto_remove,
            stdin_open: opts.stdin_open,
            tty: opts.tty,
        }
    }
}
