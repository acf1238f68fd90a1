//! Resource selection filters
//!
//! A filter is written either as one colon-delimited string
//! `ENV:CONFIG:GROUP:NAME:TYPE` or as discrete fields. Trailing segments may be
//! omitted and empty segments select everything for that position:
//!
//! ```text
//! prd:aws::s3        env=prd config=aws name=s3
//! dev                env=dev
//! ::jupyter          group=jupyter
//! ```
//!
//! When both forms are supplied, a non-empty discrete field replaces the
//! corresponding segment of the combined string.

use crate::{Error, Result};

/// Number of positional segments in the combined grammar
const SEGMENTS: usize = 5;

/// Selection predicate over environment, config kind, group, name and type
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    /// Environment label (e.g. `dev`, `prd`)
    pub env: Option<String>,
    /// Config kind / target backend (e.g. `docker`, `k8s`)
    pub config: Option<String>,
    /// Application group name
    pub group: Option<String>,
    /// Resource name
    pub name: Option<String>,
    /// Resource kind
    pub kind: Option<String>,
}

impl Filter {
    /// Parse the combined `ENV:CONFIG:GROUP:NAME:TYPE` form
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let segments: Vec<&str> = trimmed.split(':').collect();
        if segments.len() > SEGMENTS {
            return Err(Error::filter(
                input,
                format!(
                    "expected at most {} segments (ENV:CONFIG:GROUP:NAME:TYPE), got {}",
                    SEGMENTS,
                    segments.len()
                ),
            ));
        }

        let mut it = segments.into_iter().map(non_empty);
        Ok(Self {
            env: it.next().flatten(),
            config: it.next().flatten(),
            group: it.next().flatten(),
            name: it.next().flatten(),
            kind: it.next().flatten(),
        })
    }

    /// Build a filter from an optional combined string plus discrete fields
    ///
    /// Parse errors in the combined string are returned before anything else
    /// happens, so callers can surface them ahead of any resource operation.
    pub fn from_parts(combined: Option<&str>, discrete: Filter) -> Result<Self> {
        let base = match combined {
            Some(s) => Self::parse(s)?,
            None => Self::default(),
        };
        Ok(base.overridden_by(discrete))
    }

    /// Overlay `other` on top of `self`; only non-empty fields of `other` win
    pub fn overridden_by(self, other: Filter) -> Self {
        fn pick(base: Option<String>, over: Option<String>) -> Option<String> {
            over.and_then(|v| non_empty(&v)).or(base)
        }
        Self {
            env: pick(self.env, other.env),
            config: pick(self.config, other.config),
            group: pick(self.group, other.group),
            name: pick(self.name, other.name),
            kind: pick(self.kind, other.kind),
        }
    }

    /// Set the environment field
    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Set the config-kind field
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = Some(config.into());
        self
    }

    /// Set the group field
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set the name field
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the resource-type field
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// True when no field is set, i.e. the filter selects everything
    pub fn is_empty(&self) -> bool {
        self.env.is_none()
            && self.config.is_none()
            && self.group.is_none()
            && self.name.is_none()
            && self.kind.is_none()
    }

    /// Case-insensitive equality on the environment label
    pub fn matches_env(&self, env: Option<&str>) -> bool {
        match (&self.env, env) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        }
    }

    /// Matches when any of the target's accepted names equals the config field
    pub fn matches_config(&self, accepted: &[&str]) -> bool {
        match &self.config {
            None => true,
            Some(want) => accepted.iter().any(|a| want.eq_ignore_ascii_case(a)),
        }
    }

    /// Case-insensitive substring match on the group name
    pub fn matches_group(&self, group: &str) -> bool {
        contains_ignore_case(self.group.as_deref(), group)
    }

    /// Case-insensitive substring match on a resource name
    pub fn matches_name(&self, name: &str) -> bool {
        contains_ignore_case(self.name.as_deref(), name)
    }

    /// Case-insensitive equality on a resource kind
    pub fn matches_kind(&self, kind: &str) -> bool {
        match &self.kind {
            None => true,
            Some(want) => want.eq_ignore_ascii_case(kind),
        }
    }
}

impl std::str::FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn contains_ignore_case(needle: Option<&str>, haystack: &str) -> bool {
    match needle {
        None => true,
        Some(n) => haystack.to_lowercase().contains(&n.to_lowercase()),
    }
}
