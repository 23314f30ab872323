//! Plugin-side error types.

use borg_plugin_api::{ApiError, PluginId};
use thiserror::Error;

/// Errors raised while a bootstrapper declares its capabilities.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// `set_plugin_information` was already called.
    #[error("Plugin information for '{0}' was already set")]
    InformationAlreadySet(PluginId),

    /// Published id differs from the id the plugin was launched as.
    #[error("Plugin information id '{actual}' does not match launch id '{expected}'")]
    MismatchedId { expected: PluginId, actual: PluginId },

    /// Start finished without declaring an identity.
    #[error("Plugin never called set_plugin_information")]
    MissingInformation,

    /// A command or value failed validation.
    #[error(transparent)]
    Invalid(#[from] ApiError),

    /// Two endpoints share a method and path.
    #[error("Duplicate endpoint {method} {path}")]
    DuplicateEndpoint { method: String, path: String },

    /// Endpoint path is unusable.
    #[error("Invalid endpoint path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

impl RegistrationError {
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }
}

/// Errors from calls to the host.
#[derive(Debug, Error)]
pub enum HostClientError {
    /// Request never produced a response.
    #[error("Host request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Host answered with a non-success status.
    #[error("Host returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Request URL could not be built.
    #[error("Invalid host URI: {0}")]
    InvalidUri(String),

    /// Argument failed validation before sending.
    #[error(transparent)]
    Invalid(#[from] ApiError),
}

/// Errors that stop the adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The plugin binary is malformed.
    #[error("Plugin configuration error: {0}")]
    Configuration(String),

    /// Capability declaration failed.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Launch environment is missing or invalid.
    #[error(transparent)]
    Environment(#[from] ApiError),

    /// The bootstrapper's start routine failed.
    #[error("Plugin start routine failed: {0}")]
    Start(String),

    /// Talking to the host failed.
    #[error(transparent)]
    Host(#[from] HostClientError),

    /// Listener error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Whether the error means the plugin itself is invalid.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Registration(_) | Self::Environment(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
