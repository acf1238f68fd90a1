//! Create, delete and patch resource groups through a target client
//!
//! Groups are processed one at a time and resources one at a time, in
//! compiled order for create and patch and in exact reverse for delete.
//! Every mutating call is followed by a read-back; a resource only counts as
//! succeeded once its end state is observed.
//!
//! A failed resource never stops its siblings, except that a failed hard
//! prerequisite (Namespace, ServiceAccount, Network) marks everything in the
//! same group that depends on it as skipped.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use deckhand_common::{Error, Filter, Result};
use deckhand_resource::{ResourceGroup, ResourceRef, ResourceSpec, Target};
use tracing::{debug, info, warn};

use crate::client::{ActiveQuery, ActiveResource, TargetClient};
use crate::outcome::{FailureStage, Operation, OperationResult, PlannedAction, RunReport};

/// Options for a [`LifecycleManager`]
#[derive(Clone, Debug, Default)]
pub struct ManagerOptions {
    /// Plan only; never contact a target
    pub dry_run: bool,
}

/// Runs lifecycle operations against registered target clients
#[derive(Default)]
pub struct LifecycleManager {
    clients: HashMap<Target, Arc<dyn TargetClient>>,
    options: ManagerOptions,
}

impl LifecycleManager {
    /// Create a manager with no clients
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            clients: HashMap::new(),
            options,
        }
    }

    /// Register the client serving `target`
    pub fn with_client(mut self, target: Target, client: Arc<dyn TargetClient>) -> Self {
        self.clients.insert(target, client);
        self
    }

    /// Options in effect
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Create every selected resource
    pub async fn create(&self, groups: &[ResourceGroup], filter: &Filter) -> RunReport {
        self.run(Operation::Create, groups, filter).await
    }

    /// Delete every selected resource, in reverse order
    pub async fn delete(&self, groups: &[ResourceGroup], filter: &Filter) -> RunReport {
        self.run(Operation::Delete, groups, filter).await
    }

    /// Patch every selected resource, creating those not yet active
    pub async fn patch(&self, groups: &[ResourceGroup], filter: &Filter) -> RunReport {
        self.run(Operation::Patch, groups, filter).await
    }

    /// Active resources on `target` matching `query`
    pub async fn list_active(
        &self,
        target: Target,
        query: &ActiveQuery,
    ) -> Result<Vec<ActiveResource>> {
        match self.clients.get(&target) {
            Some(client) => client.list_active(query).await,
            None => Err(Error::execution(
                &query.kind,
                query.name.as_deref().unwrap_or("*"),
                format!("no client registered for target {target}"),
            )),
        }
    }

    /// Run `operation` over the groups and resources `filter` selects
    pub async fn run(
        &self,
        operation: Operation,
        groups: &[ResourceGroup],
        filter: &Filter,
    ) -> RunReport {
        let mut report = RunReport::new(operation, self.options.dry_run);
        let selected = select_groups(groups, filter, operation);
        info!(
            operation = %operation,
            groups = selected.len(),
            dry_run = self.options.dry_run,
            "starting lifecycle run"
        );

        for group in selected {
            let resources = select_resources(group, filter, operation);

            if self.options.dry_run {
                for resource in resources {
                    info!(
                        operation = %operation,
                        group = %group.name(),
                        resource = %resource.resource_ref(),
                        "dry run, would apply"
                    );
                    report.planned.push(PlannedAction {
                        group: group.name().to_string(),
                        target: group.target(),
                        resource: resource.resource_ref(),
                    });
                }
                continue;
            }

            match self.clients.get(&group.target()) {
                Some(client) => {
                    run_group(client.as_ref(), operation, group, &resources, &mut report).await
                }
                None => {
                    warn!(
                        group = %group.name(),
                        target = %group.target(),
                        "no client registered for target"
                    );
                    for resource in resources {
                        let error = Error::execution(
                            resource.kind_name(),
                            resource.name(),
                            format!("no client registered for target {}", group.target()),
                        );
                        report.results.push(
                            result_for(group, resource).fail(FailureStage::Execute, error),
                        );
                    }
                }
            }
        }

        if report.is_success() {
            info!(
                operation = %operation,
                succeeded = report.succeeded(),
                total = report.total(),
                dry_run = report.dry_run,
                "lifecycle run finished"
            );
        } else {
            warn!(
                operation = %operation,
                succeeded = report.succeeded(),
                total = report.total(),
                "lifecycle run finished with failures"
            );
        }
        report
    }
}

/// Enabled groups matching the filter's env, config and group fields
///
/// Lighter groups go first; delete reverses both the weight order and the
/// input order among equal weights.
pub fn select_groups<'a>(
    groups: &'a [ResourceGroup],
    filter: &Filter,
    operation: Operation,
) -> Vec<&'a ResourceGroup> {
    let mut selected: Vec<&ResourceGroup> = groups
        .iter()
        .filter(|g| {
            g.is_enabled()
                && filter.matches_env(g.env())
                && filter.matches_config(g.target().aliases())
                && filter.matches_group(g.name())
        })
        .collect();

    if operation.is_reverse() {
        selected.reverse();
        selected.sort_by_key(|g| Reverse(g.weight()));
    } else {
        selected.sort_by_key(|g| g.weight());
    }
    selected
}

/// Resources of `group` matching the filter's name and type fields, in
/// processing order
pub fn select_resources<'a>(
    group: &'a ResourceGroup,
    filter: &Filter,
    operation: Operation,
) -> Vec<&'a ResourceSpec> {
    let mut selected: Vec<&ResourceSpec> = group
        .resources()
        .iter()
        .filter(|r| filter.matches_name(r.name()) && filter.matches_kind(r.kind_name()))
        .collect();
    if operation.is_reverse() {
        selected.reverse();
    }
    selected
}

async fn run_group(
    client: &dyn TargetClient,
    operation: Operation,
    group: &ResourceGroup,
    resources: &[&ResourceSpec],
    report: &mut RunReport,
) {
    // dependent -> the failed prerequisite that blocks it
    let mut blocked: BTreeMap<ResourceRef, ResourceRef> = BTreeMap::new();

    for resource in resources {
        let rref = resource.resource_ref();

        let result = match blocked.get(&rref) {
            Some(prerequisite) => result_for(group, resource).fail(
                FailureStage::Prerequisite,
                Error::execution(
                    resource.kind_name(),
                    resource.name(),
                    format!("prerequisite {prerequisite} failed"),
                ),
            ),
            None => process(client, operation, group, resource).await,
        };

        match &result.failure {
            None => info!(
                operation = %operation,
                group = %group.name(),
                resource = %rref,
                executed = result.executed,
                "resource reconciled"
            ),
            Some(failure) => warn!(
                operation = %operation,
                group = %group.name(),
                resource = %rref,
                stage = %failure.stage,
                error = %failure.error,
                "resource failed"
            ),
        }

        if !result.succeeded() && resource.kind().is_hard_prerequisite() {
            for dependent in group.dependents_of(&rref) {
                blocked.entry(dependent).or_insert_with(|| rref.clone());
            }
        }
        report.results.push(result);
    }
}

async fn process(
    client: &dyn TargetClient,
    operation: Operation,
    group: &ResourceGroup,
    resource: &ResourceSpec,
) -> OperationResult {
    let mut result = result_for(group, resource);
    let active = match client.read(resource).await {
        Ok(active) => active,
        Err(e) => return result.fail(FailureStage::Execute, e),
    };

    match (operation, active) {
        (Operation::Create, Some(_)) if group.use_cache() => {
            debug!(resource = %result.resource, "already active, skipping create");
            result.validated = true;
            result
        }
        (Operation::Delete, None) => {
            debug!(resource = %result.resource, "already absent, skipping delete");
            result.validated = true;
            result
        }
        (Operation::Patch, None) => {
            debug!(resource = %result.resource, "not active, creating instead of patching");
            apply(client, Operation::Create, resource, result).await
        }
        (operation, _) => apply(client, operation, resource, result).await,
    }
}

async fn apply(
    client: &dyn TargetClient,
    operation: Operation,
    resource: &ResourceSpec,
    mut result: OperationResult,
) -> OperationResult {
    let call = match operation {
        Operation::Create => client.create(resource).await,
        Operation::Delete => client.delete(resource).await,
        Operation::Patch => client.patch(resource).await,
    };
    match call {
        Ok(true) => result.executed = true,
        Ok(false) => {
            let error = Error::execution(
                resource.kind_name(),
                resource.name(),
                format!("target reported {operation} failed"),
            );
            return result.fail(FailureStage::Execute, error);
        }
        Err(e) => return result.fail(FailureStage::Execute, e),
    }
    validate(client, operation, resource, result).await
}

async fn validate(
    client: &dyn TargetClient,
    operation: Operation,
    resource: &ResourceSpec,
    mut result: OperationResult,
) -> OperationResult {
    let expect_active = !operation.is_reverse();
    match client.read(resource).await {
        Ok(found) if found.is_some() == expect_active => {
            result.validated = true;
            result
        }
        Ok(_) => {
            let message = if expect_active {
                format!("not found after {operation}")
            } else {
                "still present after delete".to_string()
            };
            let error = Error::validation(resource.kind_name(), resource.name(), message);
            result.fail(FailureStage::Validate, error)
        }
        Err(e) => result.fail(FailureStage::Validate, e),
    }
}

fn result_for(group: &ResourceGroup, resource: &ResourceSpec) -> OperationResult {
    OperationResult::new(group.name(), group.target(), resource.resource_ref())
}
