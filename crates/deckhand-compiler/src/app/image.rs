//! Image and command settings

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default tag when none is given
pub const DEFAULT_TAG: &str = "latest";

/// Default orchestrator pull policy
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Which image to run and how to start it
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageSpec {
    /// Repository name
    pub name: String,
    /// Tag; `latest` when absent
    pub tag: Option<String>,
    /// Orchestrator pull policy; `IfNotPresent` when absent
    pub pull_policy: Option<String>,
    /// Entrypoint override (orchestrator `command`)
    pub entrypoint: Option<CommandSpec>,
    /// Command (orchestrator `args`)
    pub command: Option<CommandSpec>,
    /// Build the image locally before running (container backend only)
    pub build: Option<ImageBuildSpec>,
}

impl ImageSpec {
    /// Image with a tag
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    /// Tag, defaulted
    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// `name:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag_or_default())
    }

    /// Pull policy, defaulted
    pub fn pull_policy_or_default(&self) -> &str {
        self.pull_policy.as_deref().unwrap_or(DEFAULT_PULL_POLICY)
    }
}

/// Local build settings
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImageBuildSpec {
    /// Build context, relative to the workspace root
    pub path: String,
    /// Dockerfile relative to `path`
    pub dockerfile: Option<String>,
    /// Always pull base layers
    pub pull: bool,
    /// Target platform
    pub platform: Option<String>,
    /// Build arguments
    pub buildargs: BTreeMap<String, String>,
}

/// A command given either as one string or as an argv list
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    /// A single string, passed as one element
    Line(String),
    /// Explicit argv
    Args(Vec<String>),
}

impl CommandSpec {
    /// Normalize to an argv list
    pub fn to_args(&self) -> Vec<String> {
        match self {
            CommandSpec::Line(line) => vec![line.clone()],
            CommandSpec::Args(args) => args.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_string_becomes_single_element_list() {
        let cmd: CommandSpec =
            serde_yaml::from_str("jupyter lab --ip 0.0.0.0").expect("string command parses");
        assert_eq!(cmd.to_args(), vec!["jupyter lab --ip 0.0.0.0".to_string()]);

        let cmd: CommandSpec = serde_yaml::from_str("[serve, --port, '80']").expect("list parses");
        assert_eq!(cmd.to_args(), vec!["serve", "--port", "80"]);
    }

    #[test]
    fn defaults_fill_tag_and_pull_policy() {
        let image = ImageSpec {
            name: "web".to_string(),
            ..Default::default()
        };
        assert_eq!(image.reference(), "web:latest");
        assert_eq!(image.pull_policy_or_default(), "IfNotPresent");
        assert_eq!(ImageSpec::new("web", "1.2").reference(), "web:1.2");
    }
}
