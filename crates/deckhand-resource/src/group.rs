//! Compiled resource groups
//!
//! A [`ResourceGroup`] is the output of one compilation: the resources that
//! implement a single application on a single target, already in creation
//! order, plus the dependency edges between them. Groups are immutable; the
//! only way to make one is through [`ResourceGroupBuilder`], which buckets
//! resources by [`Stage`] so the creation order holds by construction.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use deckhand_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::spec::{ResourceKind, ResourceRef, ResourceSpec, Stage};

/// Default group weight; lower weights are created first
pub const DEFAULT_WEIGHT: u32 = 100;

/// Execution target of a group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Single-host container runtime
    Docker,
    /// Cluster orchestrator
    #[serde(alias = "k8s")]
    Kubernetes,
}

impl Target {
    /// Short config-kind name
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Docker => "docker",
            Target::Kubernetes => "k8s",
        }
    }

    /// Every name a filter may use for this target
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Target::Docker => &["docker"],
            Target::Kubernetes => &["k8s", "kubernetes"],
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `dependent` cannot exist without `prerequisite`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DependencyEdge {
    /// Created first, deleted last
    pub prerequisite: ResourceRef,
    /// Created after, deleted before
    pub dependent: ResourceRef,
}

/// An ordered, named set of resources implementing one application
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceGroup {
    name: String,
    target: Target,
    env: Option<String>,
    enabled: bool,
    weight: u32,
    use_cache: bool,
    resources: Vec<ResourceSpec>,
    edges: Vec<DependencyEdge>,
}

impl ResourceGroup {
    /// Start building a group
    pub fn builder(name: impl Into<String>, target: Target) -> ResourceGroupBuilder {
        ResourceGroupBuilder::new(name, target)
    }

    /// Group name (the application name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution target
    pub fn target(&self) -> Target {
        self.target
    }

    /// Environment label
    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    /// Disabled groups are skipped by every operation
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Ordering weight across groups
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Treat already-active resources as created
    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    /// Resources in creation order
    pub fn resources(&self) -> &[ResourceSpec] {
        &self.resources
    }

    /// Dependency edges; both ends are always members of this group
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when the group holds no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Look up a resource by kind name and name
    pub fn get(&self, kind: &str, name: &str) -> Option<&ResourceSpec> {
        self.resources
            .iter()
            .find(|r| r.kind_name() == kind && r.name() == name)
    }

    /// Resources of one kind, in order
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.iter().filter(move |r| r.kind() == kind)
    }

    /// Everything that depends on `root`, directly or transitively
    pub fn dependents_of(&self, root: &ResourceRef) -> BTreeSet<ResourceRef> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![root.clone()];
        while let Some(current) = frontier.pop() {
            for edge in self.edges.iter().filter(|e| e.prerequisite == current) {
                if found.insert(edge.dependent.clone()) {
                    frontier.push(edge.dependent.clone());
                }
            }
        }
        found
    }
}

/// Append-only builder for [`ResourceGroup`]
///
/// Resources go into the bucket of their stage; within a stage they keep
/// insertion order. There is no way to remove or reorder.
#[derive(Debug)]
pub struct ResourceGroupBuilder {
    name: String,
    target: Target,
    env: Option<String>,
    enabled: bool,
    weight: u32,
    use_cache: bool,
    stages: BTreeMap<Stage, Vec<ResourceSpec>>,
    seen: HashSet<(String, String)>,
}

impl ResourceGroupBuilder {
    /// Create an empty builder
    pub fn new(name: impl Into<String>, target: Target) -> Self {
        Self {
            name: name.into(),
            target,
            env: None,
            enabled: true,
            weight: DEFAULT_WEIGHT,
            use_cache: true,
            stages: BTreeMap::new(),
            seen: HashSet::new(),
        }
    }

    /// Set the environment label
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    /// Enable or disable the group
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the ordering weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the cache-use flag
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Append a resource to its stage
    ///
    /// Fails if a resource of the same kind and name is already present.
    pub fn push(&mut self, resource: impl Into<ResourceSpec>) -> Result<&mut Self> {
        let resource = resource.into();
        let key = (resource.kind_name().to_string(), resource.name().to_string());
        if !self.seen.insert(key) {
            return Err(Error::configuration_for_field(
                &self.name,
                "resources",
                format!("duplicate resource {}", resource.resource_ref()),
            ));
        }
        self.stages
            .entry(resource.kind().stage())
            .or_default()
            .push(resource);
        Ok(self)
    }

    /// Append several resources
    pub fn extend<I, R>(&mut self, resources: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceSpec>,
    {
        for r in resources {
            self.push(r)?;
        }
        Ok(self)
    }

    /// Freeze into a group, computing dependency edges
    pub fn build(self) -> ResourceGroup {
        let resources: Vec<ResourceSpec> = self.stages.into_values().flatten().collect();
        let edges = compute_edges(&resources);
        debug!(
            group = %self.name,
            target = %self.target,
            resources = resources.len(),
            edges = edges.len(),
            "built resource group"
        );
        ResourceGroup {
            name: self.name,
            target: self.target,
            env: self.env,
            enabled: self.enabled,
            weight: self.weight,
            use_cache: self.use_cache,
            resources,
            edges,
        }
    }
}

fn compute_edges(resources: &[ResourceSpec]) -> Vec<DependencyEdge> {
    let present: HashSet<ResourceRef> = resources.iter().map(ResourceSpec::resource_ref).collect();
    let mut edges = Vec::new();
    let mut seen = HashSet::new();

    let mut add = |prerequisite: ResourceRef, dependent: ResourceRef| {
        if prerequisite != dependent
            && present.contains(&prerequisite)
            && seen.insert((prerequisite.clone(), dependent.clone()))
        {
            edges.push(DependencyEdge {
                prerequisite,
                dependent,
            });
        }
    };

    for resource in resources {
        let me = resource.resource_ref();
        for target in resource.references() {
            add(target, me.clone());
        }

        // Services route to whichever deployments their selector matches
        if let ResourceSpec::Service(svc) = resource {
            if svc.spec.selector.is_empty() {
                continue;
            }
            for d in resources.iter().filter_map(|r| match r {
                ResourceSpec::Deployment(d) => Some(d),
                _ => None,
            }) {
                let pod_labels = &d.spec.template.metadata.labels;
                let selected = svc
                    .spec
                    .selector
                    .iter()
                    .all(|(k, v)| pod_labels.get(k) == Some(v));
                if selected && d.metadata.namespace == svc.metadata.namespace {
                    add(ResourceRef::new("Deployment", &d.metadata.name), me.clone());
                }
            }
        }
    }
    edges
}
