//! Generic and app Services

use std::collections::BTreeMap;

use deckhand_resource::k8s::{IntOrString, Service, ServicePort, ServiceSpec};
use deckhand_resource::ObjectMeta;

use super::workload::selector;
use crate::app::{AppSpec, PortSpec, ServiceOptions};
use crate::CompileError;

/// Compiles up to two Services routed to the app's pods
pub struct ServiceCompiler;

impl ServiceCompiler {
    /// Generic service over every opened port, then the app-port service
    pub fn compile(
        app: &AppSpec,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>, CompileError> {
        let k8s = &app.k8s;
        let mut services = Vec::new();

        if k8s.service.enabled {
            let ports = app.ports.opened();
            if ports.is_empty() {
                return Err(CompileError::InvalidPorts(
                    "service is enabled but no port is opened".to_string(),
                ));
            }
            let name = k8s
                .service
                .name
                .clone()
                .unwrap_or_else(|| app.default_name("svc"));
            services.push(Self::service(app, name, namespace, &k8s.service, &ports, labels));
        }

        if k8s.app_service.enabled {
            if !app.ports.open_app_port {
                return Err(CompileError::InvalidPorts(
                    "app service is enabled but the app port is not opened".to_string(),
                ));
            }
            let name = k8s
                .app_service
                .name
                .clone()
                .unwrap_or_else(|| app.default_name("app-svc"));
            services.push(Self::service(
                app,
                name,
                namespace,
                &k8s.app_service,
                &[&app.ports.app],
                labels,
            ));
        }
        Ok(services)
    }

    fn service(
        app: &AppSpec,
        name: String,
        namespace: &str,
        opts: &ServiceOptions,
        ports: &[&PortSpec],
        labels: &BTreeMap<String, String>,
    ) -> Service {
        let metadata = ObjectMeta::new(name, namespace)
            .with_labels(labels)
            .with_labels(&opts.labels)
            .with_annotations(&opts.annotations);

        Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata,
            spec: ServiceSpec {
                selector: selector(app),
                ports: ports.iter().map(|p| service_port(p)).collect(),
                type_: Some(opts.type_.to_string()),
                load_balancer_ip: opts.load_balancer_ip.clone(),
                load_balancer_class: opts.load_balancer_class.clone(),
                load_balancer_source_ranges: opts.load_balancer_source_ranges.clone(),
                health_check_node_port: opts.health_check_node_port,
                allocate_load_balancer_node_ports: opts.allocate_load_balancer_node_ports,
                internal_traffic_policy: opts.internal_traffic_policy.clone(),
                external_traffic_policy: opts.external_traffic_policy.clone(),
            },
        }
    }
}

fn service_port(port: &PortSpec) -> ServicePort {
    let target_port = match port.target_port.as_deref() {
        Some(t) => match t.parse::<u16>() {
            Ok(n) => IntOrString::Int(n),
            Err(_) => IntOrString::String(t.to_string()),
        },
        None => IntOrString::String(port.name.clone()),
    };
    ServicePort {
        name: Some(port.name.clone()),
        port: port.service_port_or_default(),
        target_port: Some(target_port),
        node_port: port.node_port,
        protocol: port.protocol.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ImageSpec, ServiceType};
    use deckhand_common::LABEL_NAME;

    fn app() -> AppSpec {
        let mut app = AppSpec::new("web", ImageSpec::new("web", "1"));
        app.ports.open_main_port = true;
        app.ports.open_app_port = true;
        app
    }

    #[test]
    fn generic_and_app_services_are_independent() {
        let mut app = app();
        app.k8s.service.enabled = true;
        app.k8s.app_service.enabled = true;
        app.k8s.app_service.type_ = ServiceType::LoadBalancer;
        app.k8s.app_service.load_balancer_source_ranges = vec!["10.0.0.0/8".to_string()];
        app.k8s.app_service.health_check_node_port = Some(30999);

        let services =
            ServiceCompiler::compile(&app, "web-ns", &BTreeMap::new()).expect("services compile");
        assert_eq!(services.len(), 2);

        let generic = &services[0];
        assert_eq!(generic.metadata.name, "web-svc");
        assert_eq!(generic.spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(generic.spec.ports.len(), 2);
        assert_eq!(generic.spec.selector[LABEL_NAME], "web");
        assert_eq!(
            generic.spec.ports[0].target_port,
            Some(IntOrString::String("http".to_string()))
        );

        let app_svc = &services[1];
        assert_eq!(app_svc.metadata.name, "web-app-svc");
        assert_eq!(app_svc.spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(app_svc.spec.ports.len(), 1);
        assert_eq!(app_svc.spec.ports[0].port, 9090);
        assert_eq!(app_svc.spec.load_balancer_source_ranges, vec!["10.0.0.0/8"]);
        assert_eq!(app_svc.spec.health_check_node_port, Some(30999));
    }

    #[test]
    fn numeric_target_port_stays_numeric() {
        let mut port = PortSpec::new("grpc", 50051);
        port.target_port = Some("50052".to_string());
        assert_eq!(service_port(&port).target_port, Some(IntOrString::Int(50052)));
    }

    #[test]
    fn services_need_ports() {
        let mut app = AppSpec::new("web", ImageSpec::new("web", "1"));
        app.k8s.service.enabled = true;
        assert!(ServiceCompiler::compile(&app, "ns", &BTreeMap::new()).is_err());

        let mut app = AppSpec::new("web", ImageSpec::new("web", "1"));
        app.k8s.app_service.enabled = true;
        assert!(ServiceCompiler::compile(&app, "ns", &BTreeMap::new()).is_err());
    }

    #[test]
    fn disabled_services_emit_nothing() {
        let services =
            ServiceCompiler::compile(&app(), "ns", &BTreeMap::new()).expect("services compile");
        assert!(services.is_empty());
    }
}
