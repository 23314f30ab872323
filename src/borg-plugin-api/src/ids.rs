//! Identifiers: plugin ids, plugin paths, session tokens and tenant keys.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ApiError, Result};

/// Normalized plugin identifier.
///
/// Always trimmed and lower-case, never empty. Two ids that differ only in
/// case or surrounding whitespace are the same plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginId(String);

impl PluginId {
    /// Normalize and validate a plugin id.
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let normalized = value.as_ref().trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ApiError::EmptyPluginId);
        }
        Ok(Self(normalized))
    }

    /// The normalized id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PluginId {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PluginId {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PluginId> for String {
    fn from(id: PluginId) -> Self {
        id.0
    }
}

impl AsRef<str> for PluginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Location of a plugin executable on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PluginPath(PathBuf);

impl PluginPath {
    /// Wrap a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The wrapped path.
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Directory the plugin executable lives in.
    pub fn directory(&self) -> Option<&Path> {
        self.0.parent().filter(|p| !p.as_os_str().is_empty())
    }

    /// Derive the plugin id from the file name, without extension.
    pub fn plugin_id(&self) -> Result<PluginId> {
        let stem = self
            .0
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ApiError::InvalidPluginPath(self.0.display().to_string()))?;
        PluginId::new(stem)
            .map_err(|_| ApiError::InvalidPluginPath(self.0.display().to_string()))
    }
}

impl fmt::Display for PluginPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for PluginPath {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

/// Opaque per-session credential, `{uuid}@{plugin-id}`.
///
/// Issued by the host when a load starts and attached by the plugin to every
/// call it makes to the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token {
    value: String,
    id: Uuid,
    plugin_id: PluginId,
}

impl Token {
    /// Issue a fresh token for a plugin.
    pub fn new_for(plugin_id: &PluginId) -> Self {
        let id = Uuid::new_v4();
        Self {
            value: format!("{}@{}", id.hyphenated(), plugin_id),
            id,
            plugin_id: plugin_id.clone(),
        }
    }

    /// Parse a token received over the wire.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let (id, plugin) = value
            .split_once('@')
            .ok_or_else(|| ApiError::malformed_token(&value, "parts"))?;
        if plugin.contains('@') {
            return Err(ApiError::malformed_token(&value, "parts"));
        }
        let id = Uuid::parse_str(id).map_err(|_| ApiError::malformed_token(&value, "uuid"))?;
        let plugin_id =
            PluginId::new(plugin).map_err(|_| ApiError::malformed_token(&value, "plugin id"))?;
        Ok(Self {
            value,
            id,
            plugin_id,
        })
    }

    /// The unique part of the token.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The plugin this token was issued to.
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Raw wire value.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl TryFrom<String> for Token {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.value
    }
}

/// Key of a tenant (chat platform adapter), e.g. `console` or `slack`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TenantKey(String);

impl TenantKey {
    /// Create a tenant key, lower-cased.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_lowercase())
    }

    /// The key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TenantKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<TenantKey> for String {
    fn from(key: TenantKey) -> Self {
        key.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
