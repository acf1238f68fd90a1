//! Writing orchestrator manifests to disk
//!
//! Layout is one directory per group and one file per resource:
//!
//! ```text
//! <dir>/<group>/<resource-name>.yaml
//! ```
//!
//! A group directory is removed before it is regenerated, so stale files from
//! renamed resources never linger.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use deckhand_common::{Error, Filter, Result};
use deckhand_resource::{ResourceGroup, Target};
use tracing::{info, warn};

use crate::manager::{select_groups, select_resources};
use crate::outcome::Operation;

/// Write every selected orchestrator group under `dir`
///
/// Container-runtime groups have no manifest form and are skipped. Returns
/// the files written, in order.
pub fn save_manifests(
    groups: &[ResourceGroup],
    filter: &Filter,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for group in select_groups(groups, filter, Operation::Create) {
        if group.target() != Target::Kubernetes {
            warn!(
                group = %group.name(),
                target = %group.target(),
                "manifests are only saved for orchestrator groups, skipping"
            );
            continue;
        }

        let group_dir = dir.join(group.name());
        if group_dir.exists() {
            std::fs::remove_dir_all(&group_dir)
                .map_err(|e| Error::io(group_dir.display().to_string(), e))?;
        }
        std::fs::create_dir_all(&group_dir)
            .map_err(|e| Error::io(group_dir.display().to_string(), e))?;

        let mut used = HashSet::new();
        for resource in select_resources(group, filter, Operation::Create) {
            // two kinds may share a name; the second gets a kind suffix
            let mut file_name = format!("{}.yaml", resource.name());
            if !used.insert(file_name.clone()) {
                file_name = format!(
                    "{}-{}.yaml",
                    resource.name(),
                    resource.kind_name().to_lowercase()
                );
                used.insert(file_name.clone());
            }

            let path = group_dir.join(file_name);
            let yaml = serde_yaml::to_string(&resource.to_manifest()?)?;
            std::fs::write(&path, yaml).map_err(|e| Error::io(path.display().to_string(), e))?;
            written.push(path);
        }

        info!(
            group = %group.name(),
            dir = %group_dir.display(),
            "saved manifests"
        );
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_resource::docker::DockerNetwork;
    use deckhand_resource::k8s::{ConfigMap, Namespace, ServiceAccount};

    fn k8s_group() -> ResourceGroup {
        let mut builder = ResourceGroup::builder("api", Target::Kubernetes);
        builder.push(Namespace::new("api")).expect("unique");
        builder.push(ServiceAccount::new("api", "api")).expect("unique");
        builder.push(ConfigMap::new("api-cm", "api")).expect("unique");
        builder.build()
    }

    #[test]
    fn writes_one_file_per_resource_and_replaces_stale_content() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let stale = dir.path().join("api").join("old.yaml");
        std::fs::create_dir_all(stale.parent().expect("has parent")).expect("mkdir");
        std::fs::write(&stale, "stale").expect("write stale");

        let written =
            save_manifests(&[k8s_group()], &Filter::default(), dir.path()).expect("save succeeds");

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["api.yaml", "api-serviceaccount.yaml", "api-cm.yaml"]);
        assert!(!stale.exists());

        let cm = std::fs::read_to_string(dir.path().join("api").join("api-cm.yaml"))
            .expect("configmap written");
        assert!(cm.contains("kind: ConfigMap"));
        assert!(cm.contains("namespace: api"));
    }

    #[test]
    fn container_groups_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut builder = ResourceGroup::builder("web", Target::Docker);
        builder.push(DockerNetwork::new("dev-net")).expect("unique");

        let written = save_manifests(&[builder.build()], &Filter::default(), dir.path())
            .expect("save succeeds");
        assert!(written.is_empty());
        assert!(!dir.path().join("web").exists());
    }
}
