//! Compile-time contexts
//!
//! [`EnvironmentContext`] turns a host workspace and a target mount parent
//! into absolute target-side paths. Build contexts carry the ambient
//! configuration of each target (network name, namespace and labels).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CompileError;

/// Workspace sub-directory names, relative to the workspace root
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceDirs {
    /// Scripts
    pub scripts: Option<String>,
    /// Local storage
    pub storage: Option<String>,
    /// Metadata
    pub meta: Option<String>,
    /// Data products
    pub products: Option<String>,
    /// Notebooks
    pub notebooks: Option<String>,
    /// Workspace configuration
    pub workspace_config: Option<String>,
}

/// Host-side description of a workspace
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspacePaths {
    /// Absolute workspace root on the host
    pub root: Option<PathBuf>,
    /// Sub-directory names
    pub dirs: WorkspaceDirs,
}

impl WorkspacePaths {
    /// Workspace at `root` with no sub-directories
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            dirs: WorkspaceDirs::default(),
        }
    }
}

/// Resolved paths for one target
///
/// Built fresh for every compile and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentContext {
    workspace_name: String,
    host_root: PathBuf,
    mount_parent: String,
    root: String,
    scripts_dir: Option<String>,
    storage_dir: Option<String>,
    meta_dir: Option<String>,
    products_dir: Option<String>,
    notebooks_dir: Option<String>,
    workspace_config_dir: Option<String>,
}

impl EnvironmentContext {
    /// Resolve `paths` under `mount_parent` on the target
    pub fn resolve(paths: &WorkspacePaths, mount_parent: &str) -> Result<Self, CompileError> {
        let host_root = paths
            .root
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| CompileError::InvalidContext("workspace root is not set".to_string()))?;

        let workspace_name = host_root
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                CompileError::InvalidContext(format!(
                    "cannot derive a workspace name from {}",
                    host_root.display()
                ))
            })?
            .to_string();

        let mount_parent = mount_parent.trim_end_matches('/');
        if mount_parent.is_empty() {
            return Err(CompileError::InvalidContext(
                "mount parent must be a non-root absolute path".to_string(),
            ));
        }
        if !mount_parent.starts_with('/') {
            return Err(CompileError::InvalidContext(format!(
                "mount parent '{}' is not absolute",
                mount_parent
            )));
        }

        let root = format!("{}/{}", mount_parent, workspace_name);
        let sub = |name: &str, dir: &Option<String>| -> Result<Option<String>, CompileError> {
            match dir.as_deref().map(str::trim) {
                None => Ok(None),
                Some("") => Err(CompileError::InvalidContext(format!(
                    "{} directory name is empty",
                    name
                ))),
                Some(d) => Ok(Some(format!("{}/{}", root, d.trim_matches('/')))),
            }
        };

        let dirs = &paths.dirs;
        let scripts_dir = sub("scripts", &dirs.scripts)?;
        let storage_dir = sub("storage", &dirs.storage)?;
        let meta_dir = sub("meta", &dirs.meta)?;
        let products_dir = sub("products", &dirs.products)?;
        let notebooks_dir = sub("notebooks", &dirs.notebooks)?;
        let workspace_config_dir = sub("workspace config", &dirs.workspace_config)?;

        Ok(Self {
            scripts_dir,
            storage_dir,
            meta_dir,
            products_dir,
            notebooks_dir,
            workspace_config_dir,
            workspace_name,
            host_root: host_root.to_path_buf(),
            mount_parent: mount_parent.to_string(),
            root,
        })
    }

    /// Workspace name (last component of the host root)
    pub fn workspace_name(&self) -> &str {
        &self.workspace_name
    }

    /// Workspace root on the host
    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// A host path under the workspace root
    pub fn host_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.host_root.join(relative)
    }

    /// Target-side parent of the workspace
    pub fn mount_parent(&self) -> &str {
        &self.mount_parent
    }

    /// Target-side workspace root
    pub fn root(&self) -> &str {
        &self.root
    }

    /// A target-side path under the workspace root
    pub fn target_path(&self, relative: &str) -> String {
        format!("{}/{}", self.root, relative.trim_matches('/'))
    }

    /// Target-side scripts directory
    pub fn scripts_dir(&self) -> Option<&str> {
        self.scripts_dir.as_deref()
    }

    /// Target-side storage directory
    pub fn storage_dir(&self) -> Option<&str> {
        self.storage_dir.as_deref()
    }

    /// Target-side metadata directory
    pub fn meta_dir(&self) -> Option<&str> {
        self.meta_dir.as_deref()
    }

    /// Target-side products directory
    pub fn products_dir(&self) -> Option<&str> {
        self.products_dir.as_deref()
    }

    /// Target-side notebooks directory
    pub fn notebooks_dir(&self) -> Option<&str> {
        self.notebooks_dir.as_deref()
    }

    /// Target-side workspace config directory
    pub fn workspace_config_dir(&self) -> Option<&str> {
        self.workspace_config_dir.as_deref()
    }
}

// =============================================================================
// Build contexts
// =============================================================================

/// Container-runtime build context
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DockerBuildContext {
    /// Network every container joins
    pub network: String,
}

/// Orchestrator build context
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct K8sBuildContext {
    /// Namespace used when the app does not bootstrap its own
    pub namespace: String,
    /// Kubeconfig context, informational for the target client
    pub context: Option<String>,
    /// ServiceAccount used when the app does not bootstrap its own
    pub service_account_name: Option<String>,
    /// Labels added to every resource
    pub labels: BTreeMap<String, String>,
}

impl Default for K8sBuildContext {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            context: None,
            service_account_name: None,
            labels: BTreeMap::new(),
        }
    }
}

/// Build context for one target; selects the compiler backend
#[derive(Clone, Debug, PartialEq)]
pub enum BuildContext {
    /// Container runtime
    Docker(DockerBuildContext),
    /// Cluster orchestrator
    Kubernetes(K8sBuildContext),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> WorkspacePaths {
        WorkspacePaths {
            root: Some(PathBuf::from("/home/dev/data-platform")),
            dirs: WorkspaceDirs {
                scripts: Some("scripts".to_string()),
                storage: Some("storage/".to_string()),
                notebooks: Some("notebooks".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn resolves_target_side_paths() {
        let ctx = EnvironmentContext::resolve(&paths(), "/mnt/workspaces/")
            .expect("context should resolve");

        assert_eq!(ctx.workspace_name(), "data-platform");
        assert_eq!(ctx.mount_parent(), "/mnt/workspaces");
        assert_eq!(ctx.root(), "/mnt/workspaces/data-platform");
        assert_eq!(
            ctx.scripts_dir(),
            Some("/mnt/workspaces/data-platform/scripts")
        );
        assert_eq!(
            ctx.storage_dir(),
            Some("/mnt/workspaces/data-platform/storage")
        );
        assert_eq!(ctx.meta_dir(), None);
        assert_eq!(ctx.host_root(), Path::new("/home/dev/data-platform"));
        assert_eq!(
            ctx.host_path("resources"),
            PathBuf::from("/home/dev/data-platform/resources")
        );
    }

    #[test]
    fn missing_root_is_invalid_context() {
        let err = EnvironmentContext::resolve(&WorkspacePaths::default(), "/mnt").unwrap_err();
        assert!(matches!(err, CompileError::InvalidContext(_)));
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(EnvironmentContext::resolve(&paths(), "").is_err());
        assert!(EnvironmentContext::resolve(&paths(), "/").is_err());
        assert!(EnvironmentContext::resolve(&paths(), "relative/dir").is_err());

        let mut p = paths();
        p.dirs.meta = Some(" ".to_string());
        assert!(EnvironmentContext::resolve(&p, "/mnt").is_err());

        assert!(EnvironmentContext::resolve(&WorkspacePaths::new("/"), "/mnt").is_err());
    }
}
