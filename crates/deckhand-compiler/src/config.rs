//! Typed workspace configuration
//!
//! The workspace file lists the workspace root once and then one section per
//! environment and target, each with its build context and an explicit list
//! of apps:
//!
//! ```yaml
//! workspace:
//!   root: .
//!   dirs:
//!     scripts: scripts
//! docker:
//!   - env: dev
//!     network: dev-net
//!     apps:
//!       - name: jupyter
//!         image: { name: jupyter/lab, tag: "4.0" }
//! k8s:
//!   - env: prd
//!     namespace: analytics
//!     apps: [...]
//! ```
//!
//! A relative root is resolved against the directory holding the file.

use std::path::Path;

use deckhand_common::{Error, Filter, Result};
use deckhand_resource::{ResourceGroup, Target};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::AppSpec;
use crate::context::{BuildContext, DockerBuildContext, K8sBuildContext, WorkspacePaths};
use crate::env::SecretProvider;
use crate::GraphCompiler;

/// Root of a workspace configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace root and sub-directories
    pub workspace: WorkspacePaths,
    /// Container-runtime environments
    pub docker: Vec<DockerEnvironment>,
    /// Orchestrator environments
    pub k8s: Vec<K8sEnvironment>,
}

/// One container-runtime environment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DockerEnvironment {
    /// Environment label
    #[serde(default)]
    pub env: Option<String>,
    /// Build context
    #[serde(flatten)]
    pub build: DockerBuildContext,
    /// Apps
    #[serde(default)]
    pub apps: Vec<AppSpec>,
}

/// One orchestrator environment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct K8sEnvironment {
    /// Environment label
    #[serde(default)]
    pub env: Option<String>,
    /// Build context
    #[serde(flatten)]
    pub build: K8sBuildContext,
    /// Apps
    #[serde(default)]
    pub apps: Vec<AppSpec>,
}

/// An app that failed to compile
#[derive(Debug)]
pub struct CompileFailure {
    /// App name
    pub app: String,
    /// Environment label
    pub env: Option<String>,
    /// Target
    pub target: Target,
    /// Why
    pub error: Error,
}

/// Result of compiling a workspace
///
/// One failing app never stops its siblings from compiling.
#[derive(Debug, Default)]
pub struct CompileOutput {
    /// Compiled groups, in file order
    pub groups: Vec<ResourceGroup>,
    /// Apps that failed
    pub failures: Vec<CompileFailure>,
}

impl CompileOutput {
    /// True when every selected app compiled
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl WorkspaceConfig {
    /// Parse a configuration from YAML
    pub fn from_yaml(input: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(input)?)
    }

    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        let mut config = Self::from_yaml(&raw)?;

        if let Some(root) = &config.workspace.root {
            if root.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                let joined = base.join(root);
                // canonicalize so "." resolves to a named directory
                let root = std::fs::canonicalize(&joined)
                    .map_err(|e| Error::io(joined.display().to_string(), e))?;
                config.workspace.root = Some(root);
            }
        }
        debug!(
            path = %path.display(),
            docker = config.docker.len(),
            k8s = config.k8s.len(),
            "loaded workspace config"
        );
        Ok(config)
    }

    /// Compile every selected app
    ///
    /// The filter's env, config and group fields select environments and
    /// apps; name and type are left for the lifecycle manager.
    pub fn compile(
        &self,
        filter: &Filter,
        secrets: Option<&dyn SecretProvider>,
    ) -> CompileOutput {
        let mut out = CompileOutput::default();

        for section in &self.docker {
            let build = BuildContext::Docker(section.build.clone());
            self.compile_section(
                &mut out,
                filter,
                secrets,
                &section.env,
                Target::Docker,
                &build,
                &section.apps,
            );
        }
        for section in &self.k8s {
            let build = BuildContext::Kubernetes(section.build.clone());
            self.compile_section(
                &mut out,
                filter,
                secrets,
                &section.env,
                Target::Kubernetes,
                &build,
                &section.apps,
            );
        }

        info!(
            groups = out.groups.len(),
            failures = out.failures.len(),
            "compiled workspace"
        );
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_section(
        &self,
        out: &mut CompileOutput,
        filter: &Filter,
        secrets: Option<&dyn SecretProvider>,
        env: &Option<String>,
        target: Target,
        build: &BuildContext,
        apps: &[AppSpec],
    ) {
        if !filter.matches_env(env.as_deref()) || !filter.matches_config(target.aliases()) {
            return;
        }
        let compiler = GraphCompiler::new(&self.workspace)
            .with_env(env.clone())
            .with_secret_provider(secrets);

        for app in apps {
            if !app.enabled {
                debug!(app = %app.name, target = %target, "app disabled, skipping");
                continue;
            }
            if !filter.matches_group(&app.name) {
                continue;
            }
            match compiler.compile(app, build) {
                Ok(group) => out.groups.push(group),
                Err(error) => {
                    warn!(app = %app.name, target = %target, error = %error, "compile failed");
                    out.failures.push(CompileFailure {
                        app: app.name.clone(),
                        env: env.clone(),
                        target,
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
workspace:
  root: /home/dev/analytics
  dirs:
    scripts: scripts
docker:
  - env: dev
    network: dev-net
    apps:
      - name: jupyter
        image: { name: jupyter/lab, tag: "4.0" }
        ports: { open_main_port: true }
      - name: legacy
        enabled: false
        image: { name: legacy }
k8s:
  - env: prd
    namespace: analytics
    labels: { team: data }
    apps:
      - name: jupyter
        image: { name: jupyter/lab, tag: "4.0" }
      - name: broken
        image: { name: broken }
        workspace: { mount: true, volume_type: aws_ebs }
"#;

    // =========================================================================
    // Story: one file, several environments, isolated failures
    // =========================================================================

    #[test]
    fn story_compile_whole_workspace() {
        let config = WorkspaceConfig::from_yaml(CONFIG).expect("config parses");
        assert_eq!(config.k8s[0].build.namespace, "analytics");
        assert_eq!(config.docker[0].build.network, "dev-net");

        let out = config.compile(&Filter::default(), None);
        let names: Vec<(String, Target)> = out
            .groups
            .iter()
            .map(|g| (g.name().to_string(), g.target()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("jupyter".to_string(), Target::Docker),
                ("jupyter".to_string(), Target::Kubernetes)
            ]
        );
        assert_eq!(out.groups[1].env(), Some("prd"));

        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].app, "broken");
        assert!(out.failures[0].error.is_configuration());
        assert!(!out.is_success());
    }

    #[test]
    fn story_filter_selects_environment_and_target() {
        let config = WorkspaceConfig::from_yaml(CONFIG).expect("config parses");

        let out = config.compile(&Filter::parse("prd:k8s").expect("filter parses"), None);
        assert_eq!(out.groups.len(), 1);
        assert_eq!(out.groups[0].target(), Target::Kubernetes);

        let out = config.compile(&Filter::parse("dev:kubernetes").expect("filter parses"), None);
        assert!(out.groups.is_empty());

        let out = config.compile(&Filter::parse("::jup").expect("filter parses"), None);
        assert_eq!(out.groups.len(), 2);
        assert!(out.is_success());
    }

    #[test]
    fn load_resolves_relative_root() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("deckhand.yml");
        let mut file = std::fs::File::create(&path).expect("config created");
        writeln!(file, "workspace:\n  root: .\n").expect("config written");

        let config = WorkspaceConfig::load(&path).expect("config loads");
        let root = config.workspace.root.expect("root set");
        assert!(root.is_absolute());
        assert_eq!(
            root,
            std::fs::canonicalize(dir.path()).expect("tempdir canonicalizes")
        );
    }

    #[test]
    fn load_relative_root_to_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("deckhand.yml");
        let mut file = std::fs::File::create(&path).expect("config created");
        writeln!(file, "workspace:\n  root: missing/notebooks\n").expect("config written");

        let err = WorkspaceConfig::load(&path).unwrap_err();
        match err {
            Error::Io { path, .. } => assert!(path.ends_with("missing/notebooks"), "{path}"),
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = WorkspaceConfig::load(Path::new("/nonexistent/deckhand.yml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
