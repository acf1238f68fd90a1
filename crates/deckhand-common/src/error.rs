//! Error types for deckhand
//!
//! Errors are structured with fields to aid debugging. Compilation failures
//! carry the application name, lifecycle failures carry the resource kind and
//! name they happened on.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for deckhand operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The inputs to a compilation were invalid or incomplete
    #[error("configuration error for {app}: {message}")]
    Configuration {
        /// Name of the application being compiled
        app: String,
        /// Description of what's invalid
        message: String,
        /// The offending field path (e.g., "workspace.volume_type")
        field: Option<String>,
    },

    /// A target-client call raised or reported failure
    #[error("execution error for {kind}/{name}: {message}")]
    Execution {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Description of what failed
        message: String,
    },

    /// The call succeeded but the expected end state was not observed
    #[error("validation error for {kind}/{name}: {message}")]
    Validation {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Description of the mismatch
        message: String,
    },

    /// An unparseable filter expression
    #[error("invalid filter '{input}': {message}")]
    Filter {
        /// The filter string as supplied
        input: String,
        /// Why it could not be parsed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Filesystem error
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: String,
        /// The underlying io error
        source: std::io::Error,
    },
}

impl Error {
    /// Create a configuration error with the given message
    ///
    /// For configuration errors raised before an application name is known.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            app: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a named application
    pub fn configuration_for(app: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            app: app.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error pointing at a specific field
    pub fn configuration_for_field(
        app: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            app: app.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an execution error for a resource
    pub fn execution(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Execution {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a resource
    pub fn validation(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a filter error
    pub fn filter(input: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Filter {
            input: input.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an io error for a path
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the application name if this error came out of compilation
    pub fn app(&self) -> Option<&str> {
        match self {
            Error::Configuration { app, .. } => Some(app),
            _ => None,
        }
    }

    /// Check if this error aborts compilation of a resource group
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error categories surfaced to operators
    // ==========================================================================

    /// Story: A broken app definition names the app and the field at fault
    #[test]
    fn story_configuration_errors_point_at_the_app() {
        let err = Error::configuration_for_field("jupyter", "workspace.root", "not set");
        assert!(err.to_string().contains("configuration error for jupyter"));
        assert_eq!(err.app(), Some("jupyter"));
        assert!(err.is_configuration());

        match err {
            Error::Configuration { field, .. } => {
                assert_eq!(field.as_deref(), Some("workspace.root"))
            }
            _ => panic!("Expected Configuration variant"),
        }

        let err = Error::configuration("no apps");
        assert_eq!(err.app(), Some(UNKNOWN_CONTEXT));
    }

    /// Story: Execute and validate failures read differently in the tally
    #[test]
    fn story_execution_and_validation_are_distinguishable() {
        let exec = Error::execution("Deployment", "web-deploy", "connection refused");
        let validate = Error::validation("Deployment", "web-deploy", "not found after create");

        assert!(exec.to_string().starts_with("execution error for Deployment/web-deploy"));
        assert!(validate
            .to_string()
            .starts_with("validation error for Deployment/web-deploy"));
        assert!(!exec.is_configuration());
        assert_eq!(exec.app(), None);
    }

    #[test]
    fn filter_error_echoes_the_input() {
        let err = Error::filter("a:b:c:d:e:f", "too many segments");
        assert_eq!(
            err.to_string(),
            "invalid filter 'a:b:c:d:e:f': too many segments"
        );
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { kind: None, .. }));

        let err = Error::serialization_for_kind("Secret", "bad data");
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Secret")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
