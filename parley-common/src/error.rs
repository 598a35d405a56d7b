//! Error types for the Parley agent workspace.

use thiserror::Error;

/// Result type alias using the Parley error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Plugin lifecycle operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginOp {
    /// `register` (validation or `initialize` failure)
    Register,
    /// `unregister` (`cleanup` failure)
    Unregister,
    /// `execute`
    Execute,
    /// `schema` retrieval
    Schema,
}

impl std::fmt::Display for PluginOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register => write!(f, "registration"),
            Self::Unregister => write!(f, "unregistration"),
            Self::Execute => write!(f, "execution"),
            Self::Schema => write!(f, "schema retrieval"),
        }
    }
}

/// Unified error type for Parley crates.
#[derive(Error, Debug)]
pub enum Error {
    /// Session, plugin or storage key absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input or out-of-range configuration value
    #[error("Invalid {field}: {constraint} (got {value:?})")]
    Validation {
        field: String,
        constraint: String,
        value: String,
    },

    /// Storage I/O or parse failure wrapping the underlying cause
    #[error("Storage error: {context}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Plugin lifecycle failure wrapping the underlying cause
    #[error("Plugin {op} failed: {name}")]
    Plugin {
        name: String,
        op: PluginOp,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Plugin is registered but disabled
    #[error("Plugin disabled: {0}")]
    PluginDisabled(String),

    /// Completion provider failed after exhausting retries
    #[error("Generation failed after {attempts} attempts")]
    Generation {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a `Validation` error with field, constraint and actual value.
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl std::fmt::Display,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.to_string(),
        }
    }

    /// Create a `Storage` error wrapping an underlying cause.
    pub fn storage(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Create a `Plugin` error for the given operation, wrapping the cause.
    pub fn plugin(name: impl Into<String>, op: PluginOp, source: anyhow::Error) -> Self {
        Self::Plugin {
            name: name.into(),
            op,
            source: source.into(),
        }
    }

    /// Create a `Generation` error wrapping the last provider failure.
    pub fn generation(attempts: u32, source: anyhow::Error) -> Self {
        Self::Generation {
            attempts,
            source: source.into(),
        }
    }

    /// Check if this is a not-found error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a validation error.
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this is a transient failure after exhausted retries.
    pub const fn is_generation(&self) -> bool {
        matches!(self, Self::Generation { .. })
    }
}
