//! Launch contract between the host and a plugin adapter.
//!
//! The host starts every plugin with three environment variables. The
//! adapter reads them back to learn who it is, where the host listens and
//! which credential to present.

use url::Url;

use crate::{ApiError, PluginId, Result, Token};

/// Plugin id the adapter must publish.
pub const ENV_PLUGIN_ID: &str = "BORG_PLUGIN_ID";

/// Base address of the host's HTTP surface.
pub const ENV_HOST_URI: &str = "BORG_HOST_URI";

/// Session token issued for this load.
pub const ENV_PLUGIN_TOKEN: &str = "BORG_PLUGIN_TOKEN";

/// Exit code a plugin process uses for configuration errors (EX_CONFIG).
pub const CONFIGURATION_EXIT_CODE: i32 = 78;

/// Everything a plugin adapter needs to reach its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEnvironment {
    pub plugin_id: PluginId,
    pub host_uri: Url,
    pub token: Token,
}

impl PluginEnvironment {
    /// Create an environment, checking the token belongs to the plugin.
    pub fn new(plugin_id: PluginId, host_uri: Url, token: Token) -> Result<Self> {
        if token.plugin_id() != &plugin_id {
            return Err(ApiError::Environment {
                name: ENV_PLUGIN_TOKEN,
                problem: format!("issued to '{}', not '{}'", token.plugin_id(), plugin_id),
            });
        }
        Ok(Self {
            plugin_id,
            host_uri,
            token,
        })
    }

    /// Variables to set on a plugin process.
    pub fn to_vars(&self) -> [(&'static str, String); 3] {
        [
            (ENV_PLUGIN_ID, self.plugin_id.to_string()),
            (ENV_HOST_URI, self.host_uri.to_string()),
            (ENV_PLUGIN_TOKEN, self.token.to_string()),
        ]
    }

    /// Read the environment of the current process.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the environment through a lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let read = |name: &'static str| {
            lookup(name).ok_or(ApiError::Environment {
                name,
                problem: "not set".to_string(),
            })
        };

        let plugin_id = PluginId::new(read(ENV_PLUGIN_ID)?).map_err(|e| ApiError::Environment {
            name: ENV_PLUGIN_ID,
            problem: e.to_string(),
        })?;
        let host_uri = Url::parse(&read(ENV_HOST_URI)?).map_err(|e| ApiError::Environment {
            name: ENV_HOST_URI,
            problem: e.to_string(),
        })?;
        let token = Token::parse(read(ENV_PLUGIN_TOKEN)?).map_err(|e| ApiError::Environment {
            name: ENV_PLUGIN_TOKEN,
            problem: e.to_string(),
        })?;

        Self::new(plugin_id, host_uri, token)
    }
}
