//! Compile a workspace config and drive it through the lifecycle manager
//!
//! Uses an in-memory target client so the whole pipeline runs without a
//! container runtime or cluster.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deckhand_common::{Filter, Result};
use deckhand_compiler::WorkspaceConfig;
use deckhand_lifecycle::{
    ActiveQuery, ActiveResource, FailureStage, LifecycleManager, ManagerOptions, TargetClient,
};
use deckhand_resource::{ResourceGroup, ResourceSpec, Target};

const CONFIG: &str = r#"
workspace:
  root: /home/dev/analytics
docker:
  - env: dev
    network: dev-net
    apps:
      - name: notebook
        image: { name: jupyter/lab, tag: "4.0" }
        ports: { open_main_port: true }
k8s:
  - env: prd
    namespace: analytics
    apps:
      - name: api
        weight: 50
        image: { name: api, tag: "2.1" }
        ports: { open_app_port: true }
        k8s:
          rbac: { enabled: true }
          app_service: { enabled: true }
      - name: worker
        image: { name: worker, tag: "2.1" }
"#;

/// Target that stores active resources in memory
#[derive(Default)]
struct MemoryTarget {
    active: Mutex<BTreeSet<(String, String)>>,
    calls: Mutex<Vec<String>>,
    /// Report create success without storing anything
    lose_creates: bool,
}

impl MemoryTarget {
    fn key(resource: &ResourceSpec) -> (String, String) {
        (resource.kind_name().to_string(), resource.name().to_string())
    }

    fn record(&self, verb: &str, resource: &ResourceSpec) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{verb} {}", resource.resource_ref()));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("read "))
            .collect()
    }
}

#[async_trait]
impl TargetClient for MemoryTarget {
    async fn create(&self, resource: &ResourceSpec) -> Result<bool> {
        self.record("create", resource);
        if !self.lose_creates {
            self.active.lock().unwrap().insert(Self::key(resource));
        }
        Ok(true)
    }

    async fn read(&self, resource: &ResourceSpec) -> Result<Option<ActiveResource>> {
        self.record("read", resource);
        let present = self.active.lock().unwrap().contains(&Self::key(resource));
        Ok(present.then(|| ActiveResource::from_spec(resource)))
    }

    async fn delete(&self, resource: &ResourceSpec) -> Result<bool> {
        self.record("delete", resource);
        Ok(self.active.lock().unwrap().remove(&Self::key(resource)))
    }

    async fn patch(&self, resource: &ResourceSpec) -> Result<bool> {
        self.record("patch", resource);
        Ok(self.active.lock().unwrap().contains(&Self::key(resource)))
    }

    async fn list_active(&self, query: &ActiveQuery) -> Result<Vec<ActiveResource>> {
        Ok(self
            .active
            .lock()
            .unwrap()
            .iter()
            .map(|(kind, name)| ActiveResource {
                kind: kind.clone(),
                name: name.clone(),
                namespace: None,
            })
            .filter(|a| query.matches(a))
            .collect())
    }
}

fn compile() -> Vec<ResourceGroup> {
    let config = WorkspaceConfig::from_yaml(CONFIG).expect("config parses");
    let out = config.compile(&Filter::default(), None);
    assert!(out.is_success(), "compile failures: {:?}", out.failures);
    out.groups
}

fn manager(target: Arc<MemoryTarget>, dry_run: bool) -> LifecycleManager {
    LifecycleManager::new(ManagerOptions { dry_run })
        .with_client(Target::Docker, target.clone())
        .with_client(Target::Kubernetes, target)
}

fn verbs_for(calls: &[String], verb: &str) -> Vec<String> {
    calls
        .iter()
        .filter_map(|c| c.strip_prefix(&format!("{verb} ")).map(str::to_string))
        .collect()
}

// =============================================================================
// Story: compiled groups are created in order and deleted in exact reverse
// =============================================================================

#[tokio::test]
async fn story_create_then_delete_full_workspace() {
    let groups = compile();
    let target = Arc::new(MemoryTarget::default());
    let manager = manager(target.clone(), false);

    let report = manager.create(&groups, &Filter::default()).await;
    assert!(report.is_success(), "{report}");
    let total: usize = groups.iter().map(ResourceGroup::len).sum();
    assert_eq!(report.total(), total);

    let report = manager.delete(&groups, &Filter::default()).await;
    assert!(report.is_success(), "{report}");

    let calls = target.mutating_calls();
    let created = verbs_for(&calls, "create");
    let mut deleted = verbs_for(&calls, "delete");
    deleted.reverse();
    assert_eq!(created, deleted);

    // the light "api" group goes first on create
    assert_eq!(created[0], "Namespace/api-ns");
}

#[tokio::test]
async fn story_orchestrator_group_respects_stage_order() {
    let groups = compile();
    let api = groups
        .iter()
        .find(|g| g.name() == "api" && g.target() == Target::Kubernetes)
        .expect("api group compiled");

    let kinds: Vec<&str> = api.resources().iter().map(|r| r.kind_name()).collect();
    let position = |kind: &str| {
        kinds
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_else(|| panic!("{kind} missing from {kinds:?}"))
    };
    assert!(position("Namespace") < position("ServiceAccount"));
    assert!(position("ServiceAccount") < position("ClusterRoleBinding"));
    assert!(position("ClusterRoleBinding") < position("ConfigMap"));
    assert!(position("ConfigMap") < position("Deployment"));
    assert!(position("Deployment") < position("Service"));
}

// =============================================================================
// Story: repeat runs and dry runs
// =============================================================================

#[tokio::test]
async fn story_second_create_is_a_noop_with_cache() {
    let groups = compile();
    let target = Arc::new(MemoryTarget::default());
    let manager = manager(target.clone(), false);

    manager.create(&groups, &Filter::default()).await;
    let first = target.mutating_calls().len();

    let report = manager.create(&groups, &Filter::default()).await;
    assert!(report.is_success());
    assert_eq!(target.mutating_calls().len(), first);
    assert!(report.results.iter().all(|r| !r.executed));
}

#[tokio::test]
async fn story_dry_run_touches_nothing() {
    let groups = compile();
    let target = Arc::new(MemoryTarget::default());
    let manager = manager(target.clone(), true);

    for report in [
        manager.create(&groups, &Filter::default()).await,
        manager.patch(&groups, &Filter::default()).await,
        manager.delete(&groups, &Filter::default()).await,
    ] {
        assert!(report.is_success());
        assert!(!report.planned.is_empty());
    }
    assert!(target.calls().is_empty());
}

#[tokio::test]
async fn story_filter_narrows_to_one_target_and_kind() {
    let groups = compile();
    let target = Arc::new(MemoryTarget::default());
    let manager = manager(target.clone(), false);

    let filter = Filter::parse("prd:k8s::-cm:ConfigMap").expect("filter parses");
    let report = manager.create(&groups, &filter).await;

    assert_eq!(report.total(), 2);
    assert_eq!(
        verbs_for(&target.mutating_calls(), "create"),
        vec!["ConfigMap/api-cm", "ConfigMap/worker-cm"]
    );

    let active = manager
        .list_active(Target::Kubernetes, &ActiveQuery::kind("ConfigMap"))
        .await
        .expect("listing succeeds");
    assert_eq!(active.len(), 2);
}

// =============================================================================
// Story: a target that claims success without doing the work
// =============================================================================

#[tokio::test]
async fn story_unobserved_creates_fail_validation() {
    let groups = compile();
    let target = Arc::new(MemoryTarget {
        lose_creates: true,
        ..Default::default()
    });
    let manager = manager(target, false);

    let report = manager
        .create(&groups, &Filter::default().with_group("worker"))
        .await;

    assert!(!report.is_success());
    assert_eq!(report.succeeded(), 0);
    assert!(report
        .results
        .iter()
        .all(|r| r.executed && r.failure_stage() == Some(FailureStage::Validate)));
    assert!(report.to_string().contains("failed at validate"));
}
