//! Port declarations

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Env var the app port is exported under by default
pub const DEFAULT_APP_PORT_ENV: &str = "APP_PORT";

/// One port, as seen from the container, the host and the service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PortSpec {
    /// Port name; referenced by service target ports
    pub name: String,
    /// Port the process listens on
    pub container_port: u16,
    /// Host port to publish on (container backend)
    #[serde(default)]
    pub host_port: Option<u16>,
    /// Service port (orchestrator backend); defaults to the container port
    #[serde(default)]
    pub service_port: Option<u16>,
    /// Node port for NodePort/LoadBalancer services
    #[serde(default)]
    pub node_port: Option<u16>,
    /// Explicit service target port; defaults to the port name
    #[serde(default)]
    pub target_port: Option<String>,
    /// Protocol (TCP when absent)
    #[serde(default)]
    pub protocol: Option<String>,
}

impl PortSpec {
    /// A port published on the same number everywhere
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            container_port: port,
            host_port: Some(port),
            service_port: Some(port),
            node_port: None,
            target_port: None,
            protocol: None,
        }
    }

    /// The main `http` port
    pub fn main() -> Self {
        Self::new("http", 8000)
    }

    /// The `app` port
    pub fn app() -> Self {
        Self::new("app", 9090)
    }

    /// Host port, defaulting to the container port
    pub fn host_port_or_default(&self) -> u16 {
        self.host_port.unwrap_or(self.container_port)
    }

    /// Service port, defaulting to the container port
    pub fn service_port_or_default(&self) -> u16 {
        self.service_port.unwrap_or(self.container_port)
    }

    /// Runtime key for port publishing (`8000` or `8000/udp`)
    pub fn runtime_key(&self) -> String {
        match self.protocol.as_deref() {
            Some(proto) if !proto.eq_ignore_ascii_case("tcp") => {
                format!("{}/{}", self.container_port, proto.to_lowercase())
            }
            _ => self.container_port.to_string(),
        }
    }
}

/// Which ports to open
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PortsSpec {
    /// Open the main port
    pub open_main_port: bool,
    /// Main port definition
    pub main: PortSpec,
    /// Open the app port
    pub open_app_port: bool,
    /// App port definition
    pub app: PortSpec,
    /// Env var that receives the app port when it is opened
    pub app_port_env: String,
    /// Additional container ports
    pub extra: Vec<PortSpec>,
    /// Raw runtime publish map (`container_port[/proto]` -> host port)
    pub runtime_ports: BTreeMap<String, u16>,
}

impl Default for PortsSpec {
    fn default() -> Self {
        Self {
            open_main_port: false,
            main: PortSpec::main(),
            open_app_port: false,
            app: PortSpec::app(),
            app_port_env: DEFAULT_APP_PORT_ENV.to_string(),
            extra: Vec::new(),
            runtime_ports: BTreeMap::new(),
        }
    }
}

impl PortsSpec {
    /// Every opened port: main, then app, then extras
    pub fn opened(&self) -> Vec<&PortSpec> {
        let mut ports = Vec::new();
        if self.open_main_port {
            ports.push(&self.main);
        }
        if self.open_app_port {
            ports.push(&self.app);
        }
        ports.extend(self.extra.iter());
        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_ports_keep_declaration_order() {
        let mut ports = PortsSpec {
            open_main_port: true,
            open_app_port: true,
            ..Default::default()
        };
        ports.extra.push(PortSpec::new("metrics", 9100));

        let names: Vec<&str> = ports.opened().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["http", "app", "metrics"]);
    }

    #[test]
    fn runtime_key_omits_tcp() {
        let mut port = PortSpec::new("dns", 53);
        assert_eq!(port.runtime_key(), "53");
        port.protocol = Some("UDP".to_string());
        assert_eq!(port.runtime_key(), "53/udp");
    }
}
