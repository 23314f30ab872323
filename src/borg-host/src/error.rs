//! Error types for the plugin host.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use borg_plugin_api::{ApiError, PluginId};
use serde::Serialize;
use thiserror::Error;

/// Plugin hosting errors.
#[derive(Debug, Error)]
pub enum PluginError {
    /// `initialize` has not run yet.
    #[error("Plugin manager is not initialized")]
    NotInitialized,

    /// The plugin itself is malformed.
    #[error("Configuration error in plugin '{plugin}': {message}")]
    Configuration { plugin: String, message: String },

    /// Plugin could not be started.
    #[error("Failed to load plugin '{plugin}': {message}")]
    LoadError { plugin: String, message: String },

    /// Host to plugin call failed.
    #[error("Transport error talking to plugin '{plugin}': {message}")]
    Transport { plugin: String, message: String },

    /// Forwarding a message to a plugin failed.
    #[error("Dispatch to plugin '{plugin}' failed: {message}")]
    Dispatch { plugin: String, message: String },

    /// Operation timed out.
    #[error("Plugin operation timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled by the caller.
    #[error("Plugin operation cancelled: {0}")]
    Cancelled(String),

    /// A load of the same id is already in flight.
    #[error("Plugin '{0}' is already being loaded")]
    Busy(PluginId),

    /// The id is already loaded.
    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(PluginId),

    /// Unknown plugin or tenant.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Package installation failed.
    #[error("Plugin install failed: {0}")]
    Install(String),

    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ApiError),

    /// Settings store failure.
    #[error("Settings error: {0}")]
    Settings(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Create a configuration error.
    pub fn configuration(plugin: impl ToString, message: impl Into<String>) -> Self {
        Self::Configuration {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }

    /// Create a load error.
    pub fn load_error(plugin: impl ToString, message: impl Into<String>) -> Self {
        Self::LoadError {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(plugin: impl ToString, message: impl Into<String>) -> Self {
        Self::Transport {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }

    /// Create a dispatch error.
    pub fn dispatch(plugin: impl ToString, message: impl Into<String>) -> Self {
        Self::Dispatch {
            plugin: plugin.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error means the plugin is malformed.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Result type for the plugin host.
pub type Result<T> = std::result::Result<T, PluginError>;

/// HTTP error for the host surface plugins call.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or unknown plugin credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Validation error.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request conflicts with current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A plugin did not answer properly.
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// Service unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Plugin(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_failed",
            Self::Validation(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Plugin(_) => "plugin_error",
            Self::Timeout => "timeout",
            Self::Unavailable(_) => "service_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Result type for HTTP handlers.
pub type AppResult<T> = std::result::Result<T, AppError>;

impl From<ApiError> for AppError {
    fn from(error: ApiError) -> Self {
        Self::Validation(error.to_string())
    }
}

impl From<PluginError> for AppError {
    fn from(error: PluginError) -> Self {
        match &error {
            PluginError::Validation(_) => Self::Validation(error.to_string()),
            PluginError::NotFound(_) => Self::NotFound(error.to_string()),
            PluginError::Busy(_) | PluginError::AlreadyLoaded(_) => {
                Self::Conflict(error.to_string())
            }
            PluginError::Timeout(_) => Self::Timeout,
            PluginError::Transport { .. } | PluginError::Dispatch { .. } => {
                Self::Plugin(error.to_string())
            }
            PluginError::Configuration { .. } | PluginError::LoadError { .. } => {
                Self::Plugin(error.to_string())
            }
            PluginError::NotInitialized | PluginError::Cancelled(_) => {
                Self::Unavailable(error.to_string())
            }
            PluginError::Install(_) => Self::BadRequest(error.to_string()),
            PluginError::Settings(_) | PluginError::Io(_) => Self::Internal(error.to_string()),
        }
    }
}
