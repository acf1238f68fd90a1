//! Workspace mount settings

use std::fmt;

use serde::{Deserialize, Serialize};

/// Parent directory workspaces are mounted under inside the target
pub const DEFAULT_MOUNT_PARENT: &str = "/mnt/workspaces";

/// Image running the git sync containers
pub const GIT_SYNC_IMAGE: &str = "k8s.gcr.io/git-sync:v3.1.1";

/// Name of the git sync side-car
pub const GIT_SYNC_CONTAINER: &str = "git-sync-workspaces";

/// How the workspace reaches the target
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceVolumeType {
    /// Bind the host directory
    #[default]
    HostPath,
    /// Start empty; on the orchestrator, git sync fills it
    EmptyDir,
    /// Block-store volume; not supported by either backend
    AwsEbs,
}

impl fmt::Display for WorkspaceVolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkspaceVolumeType::HostPath => "host_path",
            WorkspaceVolumeType::EmptyDir => "empty_dir",
            WorkspaceVolumeType::AwsEbs => "aws_ebs",
        })
    }
}

/// Workspace mount options
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkspaceMountSpec {
    /// Mount the workspace into the container
    pub mount: bool,
    /// Volume type
    pub volume_type: WorkspaceVolumeType,
    /// Volume name; `{app}-volume` when absent
    pub volume_name: Option<String>,
    /// Target-side parent directory
    pub mount_parent: String,
    /// Mount a resources directory read-only
    pub mount_resources: bool,
    /// Resources directory, relative to the workspace root
    pub resources_dir: String,
    /// Where the resources directory appears in the container
    pub resources_container_path: String,
    /// Git sync for empty-dir workspaces on the orchestrator
    pub git_sync: GitSyncSpec,
}

impl Default for WorkspaceMountSpec {
    fn default() -> Self {
        Self {
            mount: false,
            volume_type: WorkspaceVolumeType::default(),
            volume_name: None,
            mount_parent: DEFAULT_MOUNT_PARENT.to_string(),
            mount_resources: false,
            resources_dir: "resources".to_string(),
            resources_container_path: "/mnt/resources".to_string(),
            git_sync: GitSyncSpec::default(),
        }
    }
}

impl WorkspaceMountSpec {
    /// Volume name, defaulted from the app name
    pub fn volume_name_for(&self, app: &str) -> String {
        self.volume_name
            .clone()
            .unwrap_or_else(|| format!("{}-volume", app))
    }
}

/// Git repository synchronization into the workspace volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitSyncSpec {
    /// Repository URL
    pub repo: Option<String>,
    /// Branch
    pub branch: Option<String>,
    /// Seconds between syncs
    pub wait: u32,
    /// Sync image
    pub image: String,
    /// Clone once before the pod starts
    pub init_container: bool,
    /// Keep pulling while the pod runs
    pub sidecar: bool,
}

impl Default for GitSyncSpec {
    fn default() -> Self {
        Self {
            repo: None,
            branch: None,
            wait: 1,
            image: GIT_SYNC_IMAGE.to_string(),
            init_container: true,
            sidecar: true,
        }
    }
}

impl GitSyncSpec {
    /// True when either sync container is wanted
    pub fn requested(&self) -> bool {
        self.init_container || self.sidecar
    }
}
