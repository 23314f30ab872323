//! Plugin-scoped setting and configuration keys.

use serde::{Deserialize, Serialize};

use crate::{ApiError, PluginId, Result};

/// Longest key accepted by the settings and configuration endpoints.
pub const MAX_KEY_LENGTH: usize = 128;

/// Validated setting or configuration key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingKey(String);

impl SettingKey {
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ApiError::invalid_key(key, "must not be empty"));
        }
        if key.chars().count() > MAX_KEY_LENGTH {
            return Err(ApiError::invalid_key(key, "longer than 128 characters"));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key scoped to a plugin, `"{plugin-id}:{key}"`.
    pub fn scoped(&self, plugin_id: &PluginId) -> String {
        format!("{}:{}", plugin_id, self.0)
    }
}

/// Body of setting reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingValue {
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bounds() {
        assert!(SettingKey::new("last-ping-message").is_ok());
        assert!(SettingKey::new("").is_err());
        assert!(SettingKey::new("  ").is_err());
        assert!(SettingKey::new("k".repeat(128)).is_ok());
        assert!(SettingKey::new("k".repeat(129)).is_err());
    }

    #[test]
    fn test_scoped_key() {
        let key = SettingKey::new("token").unwrap();
        let id = PluginId::new("GitHub").unwrap();
        assert_eq!(key.scoped(&id), "github:token");
    }
}
