//! The error taxonomy from the design's error-handling section, implemented
//! as a single `thiserror` enum in the style of `services::error` /
//! `network::NetworkError` in the wider containrs stack.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or out-of-range spec field, missing mandatory field,
    /// disallowed device or capability.
    #[error("invalid config field '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    /// A hook returned false.
    #[error("plugin '{plugin}' failed at hook '{hook}'")]
    PluginFailure { plugin: String, hook: String },

    /// Non-zero exit from the OCI tool, timeout in create, missing pidfile.
    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    /// Filesystem/syscall errors (mkdir, mount, open, fork).
    #[error("system failure: {0}")]
    SystemFailure(String),

    /// Caller requested a transition not permitted by the current state.
    #[error("state mismatch: {0}")]
    StateMismatch(String),

    /// Descriptor or id not present in the table.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl EngineError {
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_fields(fields: &[&str]) -> Self {
        Self::ConfigInvalid {
            field: fields.join(", "),
            reason: "mandatory field(s) missing".into(),
        }
    }
}
