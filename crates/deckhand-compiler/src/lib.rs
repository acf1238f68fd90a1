//! Graph compiler for deckhand
//!
//! Turns an [`AppSpec`] into a [`ResourceGroup`] for one execution target.
//!
//! # Architecture
//!
//! [`GraphCompiler`] resolves the [`BuildContext`] once and delegates to a
//! backend:
//! - [`ContainerCompiler`]: network, images, named volume and one container
//! - [`OrchestratorCompiler`]: namespace/RBAC bootstrap, ConfigMap/Secret,
//!   Deployment, Services and caller-supplied extras
//!
//! Both backends share [`EnvironmentContext`] path resolution and the
//! [`env`] precedence resolver. Any failure aborts the whole group; nothing
//! is ever partially compiled.
//!
//! # Usage
//!
//! ```text
//! let compiler = GraphCompiler::new(&paths).with_env(Some("dev".into()));
//! let group = compiler.compile(&app, &BuildContext::Kubernetes(ctx))?;
//! ```

#![deny(missing_docs)]

pub mod app;
pub mod config;
pub mod context;
pub mod docker;
pub mod env;
pub mod k8s;

use deckhand_common::error::UNKNOWN_CONTEXT;
use deckhand_common::Error;
use deckhand_resource::{ResourceGroup, ResourceGroupBuilder, ResourceSpec, Target};
use tracing::{debug, info};

pub use app::AppSpec;
pub use config::{CompileFailure, CompileOutput, WorkspaceConfig};
pub use context::{
    BuildContext, DockerBuildContext, EnvironmentContext, K8sBuildContext, WorkspacePaths,
};
pub use docker::ContainerCompiler;
pub use env::{EnvSource, ResolvedEnv, SecretProvider};
pub use k8s::OrchestratorCompiler;

use app::WorkspaceVolumeType;

/// Errors that abort compilation of one resource group
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Workspace root or mount parent cannot be resolved
    #[error("invalid environment context: {0}")]
    InvalidContext(String),
    /// Build context is missing a required value
    #[error("invalid build context: {0}")]
    InvalidBuildContext(String),
    /// Volume type has no mapping on this target
    #[error("volume type {volume_type} is not supported on {target}")]
    UnsupportedVolumeType {
        /// Requested volume type
        volume_type: WorkspaceVolumeType,
        /// Target being compiled for
        target: Target,
    },
    /// Git sync containers were requested without a repository
    #[error("git sync requested without a repository url")]
    MissingGitSyncRepo,
    /// AppSpec has no image name
    #[error("image name is empty")]
    MissingImage,
    /// Port declarations cannot be honored
    #[error("invalid ports: {0}")]
    InvalidPorts(String),
    /// An env or secrets source could not be read
    #[error("cannot read {source_name}: {message}")]
    EnvSource {
        /// Source description (file path or secret id)
        source_name: String,
        /// Underlying failure
        message: String,
    },
    /// Two resources of the same kind share a name
    #[error("{0}")]
    DuplicateResource(String),
}

impl CompileError {
    /// AppSpec field the error points at
    pub fn field(&self) -> &'static str {
        match self {
            CompileError::InvalidContext(_) => "workspace",
            CompileError::InvalidBuildContext(_) => "build_context",
            CompileError::UnsupportedVolumeType { .. } => "workspace.volume_type",
            CompileError::MissingGitSyncRepo => "workspace.git_sync.repo",
            CompileError::MissingImage => "image.name",
            CompileError::InvalidPorts(_) => "ports",
            CompileError::EnvSource { .. } => "env",
            CompileError::DuplicateResource(_) => "k8s.extras",
        }
    }

    /// Attach the application name
    pub fn for_app(self, app: &str) -> Error {
        Error::configuration_for_field(app, self.field(), self.to_string())
    }
}

impl From<CompileError> for Error {
    fn from(err: CompileError) -> Self {
        err.for_app(UNKNOWN_CONTEXT)
    }
}

/// Compiles AppSpecs against one workspace
///
/// Holds only borrowed, read-only inputs; every call to
/// [`compile`](Self::compile) builds a fresh [`EnvironmentContext`].
pub struct GraphCompiler<'a> {
    paths: &'a WorkspacePaths,
    env: Option<String>,
    secrets: Option<&'a dyn SecretProvider>,
}

impl<'a> GraphCompiler<'a> {
    /// Create a compiler for the workspace at `paths`
    pub fn new(paths: &'a WorkspacePaths) -> Self {
        Self {
            paths,
            env: None,
            secrets: None,
        }
    }

    /// Label every compiled group with an environment (e.g. `dev`)
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    /// Use an external secret provider for `env.secret_id`
    pub fn with_secret_provider(mut self, provider: Option<&'a dyn SecretProvider>) -> Self {
        self.secrets = provider;
        self
    }

    /// Compile `app` for the target selected by `build`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the app and the offending field
    /// when any [`CompileError`] occurs.
    pub fn compile(
        &self,
        app: &AppSpec,
        build: &BuildContext,
    ) -> deckhand_common::Result<ResourceGroup> {
        let target = match build {
            BuildContext::Docker(_) => Target::Docker,
            BuildContext::Kubernetes(_) => Target::Kubernetes,
        };
        debug!(app = %app.name, target = %target, "compiling app");

        let group = self
            .compile_inner(app, build)
            .map_err(|e| e.for_app(&app.name))?;

        info!(
            group = %group.name(),
            target = %target,
            resources = group.len(),
            "compiled resource group"
        );
        Ok(group)
    }

    fn compile_inner(
        &self,
        app: &AppSpec,
        build: &BuildContext,
    ) -> Result<ResourceGroup, CompileError> {
        if app.image.name.trim().is_empty() {
            return Err(CompileError::MissingImage);
        }
        let ctx = EnvironmentContext::resolve(self.paths, &app.workspace.mount_parent)?;
        match build {
            BuildContext::Docker(docker) => ContainerCompiler::new(app, &ctx, docker)
                .with_secret_provider(self.secrets)
                .compile(self.builder(app, Target::Docker)),
            BuildContext::Kubernetes(k8s) => OrchestratorCompiler::new(app, &ctx, k8s)
                .with_secret_provider(self.secrets)
                .compile(self.builder(app, Target::Kubernetes)),
        }
    }

    fn builder(&self, app: &AppSpec, target: Target) -> ResourceGroupBuilder {
        ResourceGroup::builder(&app.name, target)
            .with_env(self.env.clone())
            .with_enabled(app.enabled)
            .with_weight(app.weight)
            .with_use_cache(app.use_cache)
    }
}

/// Append resources, reporting a duplicate as a [`CompileError`]
pub(crate) fn push_all<I, R>(
    builder: &mut ResourceGroupBuilder,
    resources: I,
) -> Result<(), CompileError>
where
    I: IntoIterator<Item = R>,
    R: Into<ResourceSpec>,
{
    for resource in resources {
        builder.push(resource).map_err(|e| match e {
            Error::Configuration { message, .. } => CompileError::DuplicateResource(message),
            other => CompileError::DuplicateResource(other.to_string()),
        })?;
    }
    Ok(())
}
