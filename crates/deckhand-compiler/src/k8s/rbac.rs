//! Namespace, ServiceAccount and cluster RBAC bootstrap

use std::collections::BTreeMap;

use deckhand_resource::k8s::{
    ClusterRole, ClusterRoleBinding, Namespace, PolicyRule, ServiceAccount,
};
use deckhand_resource::ResourceSpec;

use crate::app::AppSpec;

/// Verbs granted on pods, secrets and configmaps
pub const WORKLOAD_VERBS: &[&str] = &[
    "get", "list", "watch", "create", "update", "patch", "delete",
];

/// Verbs granted on pod logs
pub const LOG_VERBS: &[&str] = &["get", "list"];

/// The fixed minimal policy every bootstrapped ClusterRole carries
pub fn default_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule::core(&["pods", "secrets", "configmaps"], WORKLOAD_VERBS),
        PolicyRule::core(&["pods/log"], LOG_VERBS),
    ]
}

/// Compiles the bootstrap resources
pub struct RbacCompiler;

impl RbacCompiler {
    /// Namespace, ServiceAccount, ClusterRole and ClusterRoleBinding, in that order
    pub fn compile(
        app: &AppSpec,
        namespace: &str,
        service_account: &str,
        labels: &BTreeMap<String, String>,
    ) -> Vec<ResourceSpec> {
        let rbac = &app.k8s.rbac;
        let role = rbac
            .cluster_role
            .clone()
            .unwrap_or_else(|| app.default_name("cr"));
        let binding = rbac
            .cluster_role_binding
            .clone()
            .unwrap_or_else(|| app.default_name("crb"));

        let mut ns = Namespace::new(namespace);
        ns.metadata.labels.extend(labels.clone());

        let mut sa = ServiceAccount::new(service_account, namespace);
        sa.metadata.labels.extend(labels.clone());

        let mut cr = ClusterRole::new(&role, default_rules());
        cr.metadata.labels.extend(labels.clone());

        let mut crb =
            ClusterRoleBinding::for_service_account(binding, role, service_account, namespace);
        crb.metadata.labels.extend(labels.clone());

        vec![ns.into(), sa.into(), cr.into(), crb.into()]
    }
}
