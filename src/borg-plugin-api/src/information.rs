//! Plugin metadata published across the boundary.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ApiError, PluginId, Result};

/// Immutable description of a running plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInformation {
    /// Plugin id.
    pub id: PluginId,
    /// Human readable title.
    pub title: String,
    /// Plugin version string.
    pub version: String,
    /// Short description.
    pub description: String,
    /// Base address of the plugin's local HTTP listener.
    pub uri: Url,
}

impl PluginInformation {
    /// Create plugin information.
    pub fn new(
        id: PluginId,
        title: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        uri: Url,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            version: version.into(),
            description: description.into(),
            uri,
        }
    }
}

/// A text command claimed by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescription {
    /// Pattern matched against the full message text.
    pub regex: String,
    /// Help text shown to users.
    pub help: String,
    /// Endpoint path, relative to the plugin base address.
    pub endpoint: String,
}

impl CommandDescription {
    /// Create a command description.
    pub fn new(
        regex: impl Into<String>,
        help: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            regex: regex.into(),
            help: help.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Compile the pattern.
    pub fn compile(&self) -> Result<regex::Regex> {
        regex::Regex::new(&self.regex).map_err(|e| ApiError::InvalidPattern {
            pattern: self.regex.clone(),
            message: e.to_string(),
        })
    }

    /// Endpoint path with exactly one leading slash.
    pub fn endpoint_path(&self) -> String {
        format!("/{}", self.endpoint.trim_start_matches('/'))
    }

    /// Resolve the endpoint against a plugin base address.
    pub fn endpoint_url(&self, base: &Url) -> Result<Url> {
        base.join(&self.endpoint_path())
            .map_err(|e| ApiError::InvalidPattern {
                pattern: self.endpoint.clone(),
                message: e.to_string(),
            })
    }
}

/// Capability table an adapter pushes to the host once start has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// The plugin's identity and base address.
    pub information: PluginInformation,
    /// Commands the plugin claims.
    #[serde(default)]
    pub commands: Vec<CommandDescription>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_pattern_must_compile() {
        let good = CommandDescription::new("^ping (?<message>.+)$", "pings", "api/commands/ping");
        let regex = good.compile().unwrap();
        let caps = regex.captures("ping hello").unwrap();
        assert_eq!(&caps["message"], "hello");

        let bad = CommandDescription::new("^ping (", "broken", "api/commands/ping");
        assert!(matches!(bad.compile(), Err(ApiError::InvalidPattern { .. })));
    }

    #[test]
    fn test_endpoint_resolves_against_base() {
        let base = Url::parse("http://127.0.0.1:4711/").unwrap();
        let relative = CommandDescription::new("^a$", "", "api/commands/a");
        let absolute = CommandDescription::new("^a$", "", "/api/commands/a");

        assert_eq!(
            relative.endpoint_url(&base).unwrap().as_str(),
            "http://127.0.0.1:4711/api/commands/a"
        );
        assert_eq!(
            relative.endpoint_url(&base).unwrap(),
            absolute.endpoint_url(&base).unwrap()
        );
    }

    #[test]
    fn test_information_uses_camel_case() {
        let info = PluginInformation::new(
            PluginId::new("help").unwrap(),
            "Help",
            "1.0.0",
            "Lists commands",
            Url::parse("http://127.0.0.1:1234/").unwrap(),
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "help");
        assert_eq!(json["uri"], "http://127.0.0.1:1234/");
    }
}
