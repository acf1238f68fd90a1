//! Connection details inherited from a sibling application
//!
//! A database or cache app exposes how to reach it through [`ConnectedApp`].
//! The env resolver asks it only for fields the caller left unset.

use std::collections::BTreeMap;

use deckhand_resource::Target;
use serde::{Deserialize, Serialize};

/// What kind of service a connected app provides
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    /// SQL database
    #[default]
    Database,
    /// Key-value cache
    Cache,
}

/// Accessors a connected application must expose
///
/// Hosts and ports depend on the target: a container on the runtime network
/// reaches its database by container name, a pod by service DNS name.
pub trait ConnectedApp: Send + Sync {
    /// Kind of service
    fn connection_kind(&self) -> ConnectionKind;
    /// User name
    fn connection_user(&self) -> Option<String>;
    /// Password
    fn connection_password(&self) -> Option<String>;
    /// Database/schema name
    fn connection_schema(&self) -> Option<String>;
    /// Host reachable from the given target
    fn connection_host(&self, target: Target) -> Option<String>;
    /// Port reachable from the given target
    fn connection_port(&self, target: Target) -> Option<u16>;
    /// Driver or dialect (e.g. `postgresql`, `redis`)
    fn connection_driver(&self) -> Option<String>;
}

/// Where a connected app listens on one target
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Endpoint {
    /// Host
    pub host: Option<String>,
    /// Port
    pub port: Option<u16>,
}

/// A connected app described in configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSource {
    /// App name, informational
    pub name: String,
    /// Kind of service
    pub kind: ConnectionKind,
    /// User name
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Database/schema name
    pub schema: Option<String>,
    /// Driver or dialect
    pub driver: Option<String>,
    /// Endpoint on the container runtime network
    pub docker: Endpoint,
    /// Endpoint inside the cluster
    pub k8s: Endpoint,
}

impl ConnectionSource {
    fn endpoint(&self, target: Target) -> &Endpoint {
        match target {
            Target::Docker => &self.docker,
            Target::Kubernetes => &self.k8s,
        }
    }
}

impl ConnectedApp for ConnectionSource {
    fn connection_kind(&self) -> ConnectionKind {
        self.kind
    }

    fn connection_user(&self) -> Option<String> {
        self.user.clone()
    }

    fn connection_password(&self) -> Option<String> {
        self.password.clone()
    }

    fn connection_schema(&self) -> Option<String> {
        self.schema.clone()
    }

    fn connection_host(&self, target: Target) -> Option<String> {
        self.endpoint(target).host.clone()
    }

    fn connection_port(&self, target: Target) -> Option<u16> {
        self.endpoint(target).port
    }

    fn connection_driver(&self) -> Option<String> {
        self.driver.clone()
    }
}

/// Connection settings on an app: explicit values plus an optional source
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionSpec {
    /// Upstream app to inherit from
    pub app: Option<ConnectionSource>,
    /// Kind, when no upstream app is given
    pub kind: Option<ConnectionKind>,
    /// Explicit user
    pub user: Option<String>,
    /// Explicit password
    pub password: Option<String>,
    /// Explicit schema
    pub schema: Option<String>,
    /// Explicit host
    pub host: Option<String>,
    /// Explicit port
    pub port: Option<u16>,
    /// Explicit driver
    pub driver: Option<String>,
}

impl ConnectionSpec {
    /// Env vars for this connection, explicit fields first, then `upstream`
    pub fn env_vars(
        &self,
        upstream: Option<&dyn ConnectedApp>,
        target: Target,
    ) -> BTreeMap<String, String> {
        let kind = self
            .kind
            .or_else(|| upstream.map(|u| u.connection_kind()))
            .unwrap_or_default();

        let user = self
            .user
            .clone()
            .or_else(|| upstream.and_then(|u| u.connection_user()));
        let password = self
            .password
            .clone()
            .or_else(|| upstream.and_then(|u| u.connection_password()));
        let schema = self
            .schema
            .clone()
            .or_else(|| upstream.and_then(|u| u.connection_schema()));
        let host = self
            .host
            .clone()
            .or_else(|| upstream.and_then(|u| u.connection_host(target)));
        let port = self
            .port
            .or_else(|| upstream.and_then(|u| u.connection_port(target)));
        let driver = self
            .driver
            .clone()
            .or_else(|| upstream.and_then(|u| u.connection_driver()));

        let keys = EnvKeys::for_kind(kind);
        let mut vars = BTreeMap::new();
        let mut set = |key: &str, value: &Option<String>| {
            if let Some(v) = value {
                vars.insert(key.to_string(), v.clone());
            }
        };
        set(keys.user, &user);
        set(keys.password, &password);
        set(keys.schema, &schema);
        set(keys.host, &host);
        set(keys.port, &port.map(|p| p.to_string()));
        set(keys.driver, &driver);
        vars
    }
}

struct EnvKeys {
    user: &'static str,
    password: &'static str,
    schema: &'static str,
    host: &'static str,
    port: &'static str,
    driver: &'static str,
}

impl EnvKeys {
    fn for_kind(kind: ConnectionKind) -> Self {
        match kind {
            ConnectionKind::Database => Self {
                user: "DATABASE_USER",
                password: "DATABASE_PASSWORD",
                schema: "DATABASE_DB",
                host: "DATABASE_HOST",
                port: "DATABASE_PORT",
                driver: "DATABASE_DIALECT",
            },
            ConnectionKind::Cache => Self {
                user: "REDIS_USER",
                password: "REDIS_PASSWORD",
                schema: "REDIS_DB",
                host: "REDIS_HOST",
                port: "REDIS_PORT",
                driver: "REDIS_DRIVER",
            },
        }
    }
}
