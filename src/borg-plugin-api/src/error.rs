//! Validation errors for shared value types.

use thiserror::Error;

/// Errors raised while constructing or parsing shared values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Plugin id is empty after normalization.
    #[error("Plugin id must not be empty")]
    EmptyPluginId,

    /// Path has no usable file name.
    #[error("Cannot derive a plugin id from path '{0}'")]
    InvalidPluginPath(String),

    /// Token is not `{uuid}@{plugin-id}`.
    #[error("Malformed token '{token}' ({reason})")]
    MalformedToken { token: String, reason: &'static str },

    /// Command regex does not compile.
    #[error("Invalid command pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Setting or configuration key is out of bounds.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// Message text is empty.
    #[error("Message text must not be empty")]
    EmptyMessage,

    /// Install source is not a supported package.
    #[error("Unsupported plugin package '{0}': only .zip archives can be installed")]
    UnsupportedPackage(String),

    /// Launch environment variable missing or unparsable.
    #[error("Plugin environment variable {name} is {problem}")]
    Environment { name: &'static str, problem: String },
}

impl ApiError {
    /// Create a malformed token error.
    pub fn malformed_token(token: impl Into<String>, reason: &'static str) -> Self {
        Self::MalformedToken {
            token: token.into(),
            reason,
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason,
        }
    }
}

/// Result type for shared value construction.
pub type Result<T> = std::result::Result<T, ApiError>;
