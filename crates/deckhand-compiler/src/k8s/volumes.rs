//! Workspace volumes and git sync containers

use deckhand_resource::k8s::{Container, EnvVar, Volume, VolumeMount};
use deckhand_resource::Target;

use crate::app::{AppSpec, GitSyncSpec, WorkspaceVolumeType, GIT_SYNC_CONTAINER};
use crate::context::EnvironmentContext;
use crate::CompileError;

/// Pod-level pieces produced for the workspace
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodVolumes {
    /// Pod volumes
    pub volumes: Vec<Volume>,
    /// Mounts for the primary container
    pub mounts: Vec<VolumeMount>,
    /// Init containers, run before the primary container
    pub init_containers: Vec<Container>,
    /// Side-cars, added after the primary container
    pub sidecars: Vec<Container>,
}

/// Compiles the workspace and resources volumes
pub struct VolumeCompiler;

impl VolumeCompiler {
    /// Volumes, mounts and sync containers for `app`
    pub fn compile(app: &AppSpec, ctx: &EnvironmentContext) -> Result<PodVolumes, CompileError> {
        let ws = &app.workspace;
        let mut out = PodVolumes::default();

        if ws.mount {
            let name = ws.volume_name_for(&app.name);
            match ws.volume_type {
                WorkspaceVolumeType::HostPath => {
                    out.volumes
                        .push(Volume::host_path(&name, absolute_host_root(ctx)?));
                    out.mounts.push(mount(&name, ctx.root(), false));
                }
                WorkspaceVolumeType::EmptyDir => {
                    // sync writes {mount_parent}/{workspace}, so every
                    // container mounts the volume at the parent
                    out.volumes.push(Volume::empty_dir(&name));
                    out.mounts.push(mount(&name, ctx.mount_parent(), false));

                    let sync = &ws.git_sync;
                    if sync.requested() {
                        let repo = sync
                            .repo
                            .as_deref()
                            .map(str::trim)
                            .filter(|r| !r.is_empty())
                            .ok_or(CompileError::MissingGitSyncRepo)?;
                        if sync.init_container {
                            out.init_containers.push(git_sync_container(
                                &format!("{}-init", GIT_SYNC_CONTAINER),
                                sync,
                                repo,
                                ctx,
                                &name,
                                true,
                            ));
                        }
                        if sync.sidecar {
                            out.sidecars.push(git_sync_container(
                                GIT_SYNC_CONTAINER,
                                sync,
                                repo,
                                ctx,
                                &name,
                                false,
                            ));
                        }
                    }
                }
                other => {
                    return Err(CompileError::UnsupportedVolumeType {
                        volume_type: other,
                        target: Target::Kubernetes,
                    })
                }
            }
        }

        if ws.mount_resources {
            let name = app.default_name("resources");
            let source = ctx.host_path(&ws.resources_dir);
            absolute_host_root(ctx)?;
            out.volumes
                .push(Volume::host_path(&name, source.display().to_string()));
            out.mounts
                .push(mount(&name, &ws.resources_container_path, true));
        }

        for extra in &app.k8s.extras.volumes {
            out.volumes.push(extra.volume.clone());
            out.mounts
                .push(mount(&extra.volume.name, &extra.mount_path, extra.read_only));
        }
        Ok(out)
    }
}

fn absolute_host_root(ctx: &EnvironmentContext) -> Result<String, CompileError> {
    let root = ctx.host_root();
    if !root.is_absolute() {
        return Err(CompileError::InvalidContext(format!(
            "host-path volumes need an absolute workspace root, got {}",
            root.display()
        )));
    }
    Ok(root.display().to_string())
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
    }
}

fn git_sync_container(
    name: &str,
    sync: &GitSyncSpec,
    repo: &str,
    ctx: &EnvironmentContext,
    volume: &str,
    one_time: bool,
) -> Container {
    let mut env = vec![
        EnvVar::new("GIT_SYNC_REPO", repo),
        EnvVar::new("GIT_SYNC_ROOT", ctx.mount_parent()),
        EnvVar::new("GIT_SYNC_DEST", ctx.workspace_name()),
    ];
    if let Some(branch) = &sync.branch {
        env.push(EnvVar::new("GIT_SYNC_BRANCH", branch));
    }
    env.push(EnvVar::new("GIT_SYNC_WAIT", sync.wait.to_string()));
    if one_time {
        env.push(EnvVar::new("GIT_SYNC_ONE_TIME", "true"));
    }

    Container {
        name: name.to_string(),
        image: sync.image.clone(),
        env,
        volume_mounts: vec![mount(volume, ctx.mount_parent(), false)],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ExtraVolume, ImageSpec};
    use crate::context::WorkspacePaths;
    use deckhand_resource::k8s::PvcVolumeSource;

    fn ctx() -> EnvironmentContext {
        EnvironmentContext::resolve(&WorkspacePaths::new("/srv/notebooks"), "/mnt/workspaces")
            .expect("context should resolve")
    }

    fn app() -> AppSpec {
        let mut app = AppSpec::new("lab", ImageSpec::new("lab", "1"));
        app.workspace.mount = true;
        app
    }

    #[test]
    fn host_path_mounts_workspace_root() {
        let out = VolumeCompiler::compile(&app(), &ctx()).expect("volumes compile");
        assert_eq!(out.volumes.len(), 1);
        assert_eq!(
            out.volumes[0].host_path.as_ref().map(|h| h.path.as_str()),
            Some("/srv/notebooks")
        );
        assert_eq!(out.mounts[0].mount_path, "/mnt/workspaces/notebooks");
        assert!(out.init_containers.is_empty());
        assert!(out.sidecars.is_empty());
    }

    #[test]
    fn empty_dir_adds_sync_init_and_sidecar() {
        let mut app = app();
        app.workspace.volume_type = WorkspaceVolumeType::EmptyDir;
        app.workspace.git_sync.repo = Some("https://git.example.com/notebooks.git".to_string());
        app.workspace.git_sync.branch = Some("main".to_string());

        let out = VolumeCompiler::compile(&app, &ctx()).expect("volumes compile");
        assert!(out.volumes[0].empty_dir.is_some());
        assert_eq!(out.init_containers[0].name, "git-sync-workspaces-init");
        assert_eq!(out.sidecars[0].name, "git-sync-workspaces");

        let init_env: Vec<(&str, &str)> = out.init_containers[0]
            .env
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        assert!(init_env.contains(&("GIT_SYNC_ROOT", "/mnt/workspaces")));
        assert!(init_env.contains(&("GIT_SYNC_DEST", "notebooks")));
        assert!(init_env.contains(&("GIT_SYNC_BRANCH", "main")));
        assert!(init_env.contains(&("GIT_SYNC_WAIT", "1")));
        assert!(init_env.contains(&("GIT_SYNC_ONE_TIME", "true")));
        assert!(!out.sidecars[0]
            .env
            .iter()
            .any(|e| e.name == "GIT_SYNC_ONE_TIME"));
    }

    #[test]
    fn sync_without_repo_fails() {
        let mut app = app();
        app.workspace.volume_type = WorkspaceVolumeType::EmptyDir;
        let err = VolumeCompiler::compile(&app, &ctx()).unwrap_err();
        assert!(matches!(err, CompileError::MissingGitSyncRepo));
    }

    #[test]
    fn empty_dir_without_sync_needs_no_repo() {
        let mut app = app();
        app.workspace.volume_type = WorkspaceVolumeType::EmptyDir;
        app.workspace.git_sync.init_container = false;
        app.workspace.git_sync.sidecar = false;
        let out = VolumeCompiler::compile(&app, &ctx()).expect("volumes compile");
        assert!(out.init_containers.is_empty());
    }

    #[test]
    fn block_store_is_unsupported() {
        let mut app = app();
        app.workspace.volume_type = WorkspaceVolumeType::AwsEbs;
        assert!(matches!(
            VolumeCompiler::compile(&app, &ctx()),
            Err(CompileError::UnsupportedVolumeType { .. })
        ));
    }

    #[test]
    fn resources_are_mounted_read_only() {
        let mut app = app();
        app.workspace.mount = false;
        app.workspace.mount_resources = true;
        let out = VolumeCompiler::compile(&app, &ctx()).expect("volumes compile");
        assert_eq!(out.volumes[0].name, "lab-resources");
        assert_eq!(out.mounts[0].mount_path, "/mnt/resources");
        assert_eq!(out.mounts[0].read_only, Some(true));
    }

    #[test]
    fn extra_volumes_are_mounted_in_primary_container() {
        let mut app = app();
        app.k8s.extras.volumes.push(ExtraVolume {
            volume: Volume {
                name: "logs".to_string(),
                persistent_volume_claim: Some(PvcVolumeSource {
                    claim_name: "lab-logs".to_string(),
                    read_only: None,
                }),
                ..Default::default()
            },
            mount_path: "/var/log/lab".to_string(),
            read_only: false,
        });

        let out = VolumeCompiler::compile(&app, &ctx()).expect("volumes compile");
        let volumes: Vec<&str> = out.volumes.iter().map(|v| v.name.as_str()).collect();
        let mounts: Vec<&str> = out.mounts.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(volumes, mounts);
        let logs = out.mounts.iter().find(|m| m.name == "logs").expect("logs mounted");
        assert_eq!(logs.mount_path, "/var/log/lab");
        assert_ne!(logs.read_only, Some(true));
    }
}
