//! Environment-variable resolution
//!
//! A container's environment is assembled from five layers, lowest precedence
//! first:
//!
//! 1. path variables and feature flags computed from the [`EnvironmentContext`]
//! 2. secrets (secret provider, then secrets file, then inline secrets)
//! 3. the plain env file
//! 4. connection details (explicit connection fields, then the connected app)
//! 5. explicit values
//!
//! Each layer overwrites keys from earlier ones and never removes any. Every
//! resolved value remembers which layer it came from so the orchestrator
//! backend can route secrets into a Secret and everything else into a
//! ConfigMap.

use std::collections::BTreeMap;
use std::path::Path;

use deckhand_common::yaml;
use deckhand_resource::Target;
use tracing::debug;

use crate::app::{AppSpec, ConnectedApp};
use crate::context::EnvironmentContext;
use crate::CompileError;

/// Looks up secrets held outside the workspace (e.g. a cloud secret manager)
pub trait SecretProvider: Send + Sync {
    /// Fetch every key/value pair stored under `secret_id`
    fn fetch(&self, secret_id: &str) -> deckhand_common::Result<BTreeMap<String, String>>;
}

/// Layer a resolved value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnvSource {
    /// Computed paths and feature flags
    PathContext,
    /// Secret provider, secrets file or inline secrets
    Secrets,
    /// Plain env file
    EnvFile,
    /// Connection details
    ConnectedApp,
    /// Caller-supplied
    Explicit,
}

impl EnvSource {
    /// Values from this layer belong in a Secret
    pub fn is_sensitive(self) -> bool {
        self == EnvSource::Secrets
    }
}

/// The five input layers
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvLayers {
    /// Layer 1
    pub path_vars: BTreeMap<String, String>,
    /// Layer 2
    pub secrets: BTreeMap<String, String>,
    /// Layer 3
    pub env_file: BTreeMap<String, String>,
    /// Layer 4
    pub inherited: BTreeMap<String, String>,
    /// Layer 5
    pub explicit: BTreeMap<String, String>,
}

impl EnvLayers {
    /// Merge the layers in precedence order
    pub fn resolve(&self) -> ResolvedEnv {
        let mut resolved = ResolvedEnv::default();
        let layers = [
            (EnvSource::PathContext, &self.path_vars),
            (EnvSource::Secrets, &self.secrets),
            (EnvSource::EnvFile, &self.env_file),
            (EnvSource::ConnectedApp, &self.inherited),
            (EnvSource::Explicit, &self.explicit),
        ];
        for (source, layer) in layers {
            for (key, value) in layer {
                resolved.set(key.clone(), value.clone(), source);
            }
        }
        derive_database_url(&mut resolved);
        resolved
    }
}

/// Parts of `DATABASE_URL`, in URL order
const DATABASE_URL_PARTS: [&str; 6] = [
    "DATABASE_DIALECT",
    "DATABASE_USER",
    "DATABASE_PASSWORD",
    "DATABASE_HOST",
    "DATABASE_PORT",
    "DATABASE_DB",
];

/// Assemble `DATABASE_URL` from the merged parts unless a layer set it
///
/// The URL is sensitive whenever any part came from a sensitive layer.
fn derive_database_url(resolved: &mut ResolvedEnv) {
    if resolved.get("DATABASE_URL").is_some() {
        return;
    }
    let parts = DATABASE_URL_PARTS.map(|key| resolved.get(key));
    let [Some(dialect), Some(user), Some(password), Some(host), Some(port), Some(db)] = parts
    else {
        return;
    };
    let url = format!("{dialect}://{user}:{password}@{host}:{port}/{db}");

    let sensitive = DATABASE_URL_PARTS
        .iter()
        .any(|key| resolved.source(key).is_some_and(EnvSource::is_sensitive));
    let source = if sensitive {
        EnvSource::Secrets
    } else {
        EnvSource::ConnectedApp
    };
    resolved.set("DATABASE_URL", url, source);
}

/// One resolved variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedVar {
    /// Value
    pub value: String,
    /// Winning layer
    pub source: EnvSource,
}

/// Final environment, with provenance
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedEnv {
    vars: BTreeMap<String, ResolvedVar>,
}

impl ResolvedEnv {
    /// Set a value, overwriting any earlier one
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, source: EnvSource) {
        self.vars.insert(
            key.into(),
            ResolvedVar {
                value: value.into(),
                source,
            },
        );
    }

    /// Look up a value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|v| v.value.as_str())
    }

    /// Look up where a value came from
    pub fn source(&self, key: &str) -> Option<EnvSource> {
        self.vars.get(key).map(|v| v.source)
    }

    /// Every variable as a plain map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Variables whose winning layer is not sensitive
    pub fn plain(&self) -> BTreeMap<String, String> {
        self.partition(false)
    }

    /// Variables whose winning layer is sensitive
    pub fn sensitive(&self) -> BTreeMap<String, String> {
        self.partition(true)
    }

    fn partition(&self, sensitive: bool) -> BTreeMap<String, String> {
        self.vars
            .iter()
            .filter(|(_, v)| v.source.is_sensitive() == sensitive)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True when nothing is set
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Gathers the layers for one app on one target
pub struct EnvResolver<'a> {
    app: &'a AppSpec,
    ctx: &'a EnvironmentContext,
    target: Target,
    secrets: Option<&'a dyn SecretProvider>,
}

impl<'a> EnvResolver<'a> {
    /// Create a resolver
    pub fn new(app: &'a AppSpec, ctx: &'a EnvironmentContext, target: Target) -> Self {
        Self {
            app,
            ctx,
            target,
            secrets: None,
        }
    }

    /// Use an external secret provider for `env.secret_id`
    pub fn with_secret_provider(mut self, provider: Option<&'a dyn SecretProvider>) -> Self {
        self.secrets = provider;
        self
    }

    /// Read every layer
    pub fn layers(&self) -> Result<EnvLayers, CompileError> {
        let spec = &self.app.env;
        let upstream = self
            .app
            .connection
            .app
            .as_ref()
            .map(|a| a as &dyn ConnectedApp);

        Ok(EnvLayers {
            path_vars: self.path_vars(),
            secrets: self.secrets()?,
            env_file: match &spec.env_file {
                Some(file) => self.read_file("env file", file)?,
                None => BTreeMap::new(),
            },
            inherited: self.app.connection.env_vars(upstream, self.target),
            explicit: spec.vars.clone(),
        })
    }

    /// Read and merge every layer
    pub fn resolve(&self) -> Result<ResolvedEnv, CompileError> {
        let resolved = self.layers()?.resolve();
        debug!(
            app = %self.app.name,
            target = %self.target,
            vars = resolved.len(),
            secrets = resolved.sensitive().len(),
            "resolved environment"
        );
        Ok(resolved)
    }

    fn path_vars(&self) -> BTreeMap<String, String> {
        let ctx = self.ctx;
        let spec = &self.app.env;
        let mut vars = BTreeMap::new();

        vars.insert("WORKSPACE_PARENT".to_string(), ctx.mount_parent().to_string());
        vars.insert("WORKSPACE_ROOT".to_string(), ctx.root().to_string());
        vars.insert(
            "PYTHONPATH".to_string(),
            spec.python_path
                .clone()
                .unwrap_or_else(|| ctx.root().to_string()),
        );
        vars.insert(
            "RUNTIME_ENV".to_string(),
            match self.target {
                Target::Docker => "docker",
                Target::Kubernetes => "kubernetes",
            }
            .to_string(),
        );

        let dirs = [
            ("SCRIPTS_DIR", ctx.scripts_dir()),
            ("STORAGE_DIR", ctx.storage_dir()),
            ("META_DIR", ctx.meta_dir()),
            ("PRODUCTS_DIR", ctx.products_dir()),
            ("NOTEBOOKS_DIR", ctx.notebooks_dir()),
            ("WORKSPACE_CONFIG_DIR", ctx.workspace_config_dir()),
        ];
        for (key, dir) in dirs {
            if let Some(dir) = dir {
                vars.insert(key.to_string(), dir.to_string());
            }
        }

        vars.insert(
            "INSTALL_REQUIREMENTS".to_string(),
            spec.install_requirements.to_string(),
        );
        if let Some(file) = &spec.requirements_file {
            vars.insert("REQUIREMENTS_FILE_PATH".to_string(), ctx.target_path(file));
        }
        vars.insert(
            "PRINT_ENV_ON_LOAD".to_string(),
            spec.print_env_on_load.to_string(),
        );
        if let Some(region) = &spec.aws_region {
            vars.insert("AWS_REGION".to_string(), region.clone());
            vars.insert("AWS_DEFAULT_REGION".to_string(), region.clone());
        }
        vars
    }

    fn secrets(&self) -> Result<BTreeMap<String, String>, CompileError> {
        let spec = &self.app.env;
        let mut merged = BTreeMap::new();

        if let Some(id) = &spec.secret_id {
            let provider = self.secrets.ok_or_else(|| CompileError::EnvSource {
                source_name: format!("secret '{}'", id),
                message: "no secret provider is configured".to_string(),
            })?;
            let fetched = provider.fetch(id).map_err(|e| CompileError::EnvSource {
                source_name: format!("secret '{}'", id),
                message: e.to_string(),
            })?;
            merged.extend(fetched);
        }
        if let Some(file) = &spec.secrets_file {
            merged.extend(self.read_file("secrets file", file)?);
        }
        merged.extend(spec.secrets.clone());
        Ok(merged)
    }

    fn read_file(&self, what: &str, file: &Path) -> Result<BTreeMap<String, String>, CompileError> {
        let path = self.ctx.host_path(file);
        yaml::read_string_map(&path).map_err(|e| CompileError::EnvSource {
            source_name: format!("{} {}", what, path.display()),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ConnectionSource, Endpoint, ImageSpec};
    use crate::context::WorkspacePaths;
    use std::io::Write;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // Story: every layer overrides the ones before it, and only those
    // =========================================================================

    #[test]
    fn story_layers_resolve_in_precedence_order() {
        let layers = EnvLayers {
            path_vars: map(&[("A", "1")]),
            secrets: map(&[("A", "2"), ("B", "2")]),
            env_file: map(&[("B", "3"), ("C", "3")]),
            inherited: map(&[("C", "4"), ("D", "4")]),
            explicit: map(&[("D", "5")]),
        };

        let resolved = layers.resolve();
        assert_eq!(
            resolved.to_map(),
            map(&[("A", "2"), ("B", "3"), ("C", "4"), ("D", "5")])
        );
        assert_eq!(resolved.source("A"), Some(EnvSource::Secrets));
        assert_eq!(resolved.source("D"), Some(EnvSource::Explicit));
    }

    #[test]
    fn story_overridden_secret_is_no_longer_sensitive() {
        let layers = EnvLayers {
            secrets: map(&[("TOKEN", "s3cr3t"), ("DB_PASS", "pw")]),
            explicit: map(&[("TOKEN", "public")]),
            ..Default::default()
        };

        let resolved = layers.resolve();
        assert_eq!(resolved.sensitive(), map(&[("DB_PASS", "pw")]));
        assert_eq!(resolved.plain(), map(&[("TOKEN", "public")]));
    }

    #[test]
    fn database_url_uses_explicit_overrides() {
        let layers = EnvLayers {
            secrets: map(&[("DATABASE_PASSWORD", "pw")]),
            inherited: map(&[
                ("DATABASE_DIALECT", "postgresql"),
                ("DATABASE_USER", "app"),
                ("DATABASE_HOST", "pg-svc"),
                ("DATABASE_PORT", "5432"),
                ("DATABASE_DB", "app"),
            ]),
            explicit: map(&[("DATABASE_HOST", "db.internal"), ("DATABASE_PORT", "6543")]),
            ..Default::default()
        };

        let resolved = layers.resolve();
        assert_eq!(
            resolved.get("DATABASE_URL"),
            Some("postgresql://app:pw@db.internal:6543/app")
        );
        // carries the password, so it lands in the Secret
        assert_eq!(resolved.source("DATABASE_URL"), Some(EnvSource::Secrets));
    }

    #[test]
    fn explicit_database_url_is_kept_and_partial_parts_derive_nothing() {
        let layers = EnvLayers {
            inherited: map(&[("DATABASE_HOST", "pg-svc"), ("DATABASE_PORT", "5432")]),
            ..Default::default()
        };
        assert_eq!(layers.resolve().get("DATABASE_URL"), None);

        let layers = EnvLayers {
            explicit: map(&[
                ("DATABASE_URL", "sqlite:///tmp/db"),
                ("DATABASE_DIALECT", "postgresql"),
                ("DATABASE_USER", "app"),
                ("DATABASE_PASSWORD", "pw"),
                ("DATABASE_HOST", "h"),
                ("DATABASE_PORT", "1"),
                ("DATABASE_DB", "d"),
            ]),
            ..Default::default()
        };
        assert_eq!(layers.resolve().get("DATABASE_URL"), Some("sqlite:///tmp/db"));
    }

    struct FakeVault;

    impl SecretProvider for FakeVault {
        fn fetch(&self, secret_id: &str) -> deckhand_common::Result<BTreeMap<String, String>> {
            Ok(map(&[("VAULT_ID", secret_id), ("SHARED", "vault")]))
        }
    }

    #[test]
    fn story_resolver_reads_files_and_connected_app() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut env_file =
            std::fs::File::create(dir.path().join("dev.env.yml")).expect("env file created");
        writeln!(env_file, "LOG_LEVEL: debug\nSHARED: file").expect("env file written");
        let mut secrets_file =
            std::fs::File::create(dir.path().join("dev.secrets.yml")).expect("secrets created");
        writeln!(secrets_file, "API_KEY: abc123").expect("secrets written");

        let mut app = AppSpec::new("api", ImageSpec::new("api", "1"));
        app.env.env_file = Some("dev.env.yml".into());
        app.env.secrets_file = Some("dev.secrets.yml".into());
        app.env.secret_id = Some("prod/api".to_string());
        app.env.vars = map(&[("DATABASE_HOST", "override")]);
        app.env.aws_region = Some("us-east-1".to_string());
        app.connection.app = Some(ConnectionSource {
            user: Some("api".to_string()),
            k8s: Endpoint {
                host: Some("pg-svc".to_string()),
                port: Some(5432),
            },
            ..Default::default()
        });

        let ctx = EnvironmentContext::resolve(&WorkspacePaths::new(dir.path()), "/mnt/workspaces")
            .expect("context should resolve");
        let vault = FakeVault;
        let resolved = EnvResolver::new(&app, &ctx, Target::Kubernetes)
            .with_secret_provider(Some(&vault))
            .resolve()
            .expect("env should resolve");

        assert_eq!(resolved.get("RUNTIME_ENV"), Some("kubernetes"));
        assert_eq!(resolved.get("WORKSPACE_PARENT"), Some("/mnt/workspaces"));
        assert_eq!(resolved.get("AWS_DEFAULT_REGION"), Some("us-east-1"));
        assert_eq!(resolved.get("VAULT_ID"), Some("prod/api"));
        assert_eq!(resolved.get("API_KEY"), Some("abc123"));
        assert_eq!(resolved.get("LOG_LEVEL"), Some("debug"));
        // env file (3) beats the vault (2)
        assert_eq!(resolved.get("SHARED"), Some("file"));
        assert_eq!(resolved.get("DATABASE_USER"), Some("api"));
        assert_eq!(resolved.get("DATABASE_PORT"), Some("5432"));
        // explicit (5) beats the connected app (4)
        assert_eq!(resolved.get("DATABASE_HOST"), Some("override"));

        let sensitive = resolved.sensitive();
        assert!(sensitive.contains_key("API_KEY"));
        assert!(sensitive.contains_key("VAULT_ID"));
        assert!(!sensitive.contains_key("SHARED"));
    }

    #[test]
    fn secret_id_without_provider_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut app = AppSpec::new("api", ImageSpec::new("api", "1"));
        app.env.secret_id = Some("prod/api".to_string());
        let ctx = EnvironmentContext::resolve(&WorkspacePaths::new(dir.path()), "/mnt")
            .expect("context should resolve");

        let err = EnvResolver::new(&app, &ctx, Target::Docker)
            .resolve()
            .unwrap_err();
        assert!(matches!(err, CompileError::EnvSource { .. }));
    }

    #[test]
    fn missing_env_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut app = AppSpec::new("api", ImageSpec::new("api", "1"));
        app.env.env_file = Some("absent.yml".into());
        let ctx = EnvironmentContext::resolve(&WorkspacePaths::new(dir.path()), "/mnt")
            .expect("context should resolve");

        assert!(EnvResolver::new(&app, &ctx, Target::Docker).resolve().is_err());
    }
}
