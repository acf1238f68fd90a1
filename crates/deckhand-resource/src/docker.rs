//! Container-runtime resource types emitted by the container backend
//!
//! Field names follow the Docker Engine create parameters so a target client
//! can pass them through unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A user-defined bridge network
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DockerNetwork {
    /// Network name
    pub name: String,
    /// Driver (defaults to bridge on the daemon)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl DockerNetwork {
    /// Reference a network by name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: None,
            labels: BTreeMap::new(),
        }
    }
}

/// An image that is built or pulled before the container starts
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DockerImage {
    /// Repository name
    pub name: String,
    /// Tag
    pub tag: String,
    /// Build context directory; pulled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Dockerfile relative to `path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Always pull base layers
    #[serde(default)]
    pub pull: bool,
    /// Target platform (e.g. linux/amd64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Build arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub buildargs: BTreeMap<String, String>,
}

impl DockerImage {
    /// `name:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// A named volume managed by the runtime
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DockerVolume {
    /// Volume name
    pub name: String,
    /// Driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// One container
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DockerContainer {
    /// Container name
    pub name: String,
    /// Image reference (`name:tag`)
    pub image: String,
    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    /// Command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// Environment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// Network to attach to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Published ports: `container_port[/proto]` -> host port
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, u16>,
    /// Mounts: host path or volume name -> bind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeBind>,
    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Health check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthCheck>,
    /// User (name or uid[:gid])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Platform (e.g. linux/amd64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Remove the container when it exits
    #[serde(default)]
    pub auto_remove: bool,
    /// Keep STDIN open
    #[serde(default)]
    pub stdin_open: bool,
    /// Allocate a pseudo-TTY
    #[serde(default)]
    pub tty: bool,
}

/// Bind target of a mount
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeBind {
    /// Path inside the container
    pub bind: String,
    /// `rw` or `ro`
    pub mode: String,
}

impl VolumeBind {
    /// Read-write bind
    pub fn rw(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: "rw".to_string(),
        }
    }

    /// Read-only bind
    pub fn ro(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: "ro".to_string(),
        }
    }
}

/// Container restart policy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    /// no, always, on-failure, unless-stopped
    pub name: String,
    /// Retries for on-failure
    #[serde(default)]
    pub maximum_retry_count: u32,
}

/// Container health check
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    /// Test command (e.g. ["CMD", "curl", "-f", "http://localhost"])
    pub test: Vec<String>,
    /// Nanoseconds between checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Nanoseconds before a check is considered hung
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Consecutive failures before unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Nanoseconds to wait before the first check counts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<u64>,
}
