//! Plugins compiled into the host.
//!
//! They are written against the SDK like any other plugin and run in a
//! [`TaskBoundary`](crate::boundary::TaskBoundary).

mod help;
mod plugins;

pub use help::HelpPlugin;
pub use plugins::AdministrationPlugin;

use std::time::Duration;

use borg_plugin_api::PluginId;
use borg_plugin_sdk::PluginBootstrapper;
use regex::Regex;

use crate::boundary::TaskBoundaryFactory;
use crate::error::{PluginError, Result};

/// Names accepted by [`BuiltinPlugin::by_name`].
pub const BUILTIN_NAMES: [&str; 2] = [HelpPlugin::ID, AdministrationPlugin::ID];

/// A plugin id paired with the factory that hosts it.
#[derive(Clone)]
pub struct BuiltinPlugin {
    id: PluginId,
    factory: TaskBoundaryFactory,
}

impl BuiltinPlugin {
    pub fn new(id: PluginId, factory: TaskBoundaryFactory) -> Self {
        Self { id, factory }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn factory(&self) -> &TaskBoundaryFactory {
        &self.factory
    }

    pub fn help(client: reqwest::Client, grace: Duration) -> Result<Self> {
        let plugin_client = client.clone();
        Ok(Self::new(
            PluginId::new(HelpPlugin::ID)?,
            TaskBoundaryFactory::new(
                move || {
                    vec![Box::new(HelpPlugin::new(plugin_client.clone()))
                        as Box<dyn PluginBootstrapper>]
                },
                client,
                grace,
            ),
        ))
    }

    pub fn plugins(client: reqwest::Client, grace: Duration) -> Result<Self> {
        Ok(Self::new(
            PluginId::new(AdministrationPlugin::ID)?,
            TaskBoundaryFactory::new(
                || vec![Box::new(AdministrationPlugin) as Box<dyn PluginBootstrapper>],
                client,
                grace,
            ),
        ))
    }

    pub fn by_name(name: &str, client: reqwest::Client, grace: Duration) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            HelpPlugin::ID => Self::help(client, grace),
            AdministrationPlugin::ID => Self::plugins(client, grace),
            other => Err(PluginError::NotFound(format!(
                "built-in plugin '{other}' (known: {})",
                BUILTIN_NAMES.join(", ")
            ))),
        }
    }
}

/// Named capture group of `pattern` in `text`.
pub(crate) fn capture(pattern: &str, text: &str, group: &str) -> anyhow::Result<Option<String>> {
    let regex = Regex::new(pattern)?;
    Ok(regex
        .captures(text)
        .and_then(|c| c.name(group))
        .map(|m| m.as_str().trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name() {
        let client = reqwest::Client::new();
        let help = BuiltinPlugin::by_name("Help", client.clone(), Duration::from_secs(1)).unwrap();
        assert_eq!(help.id().as_str(), "help");
        assert!(matches!(
            BuiltinPlugin::by_name("weather", client, Duration::from_secs(1)),
            Err(PluginError::NotFound(_))
        ));
    }

    #[test]
    fn test_capture() {
        assert_eq!(
            capture(r"^help (?<pluginId>[a-z0-9\-\.]+)$", "help status", "pluginId").unwrap(),
            Some("status".to_string())
        );
        assert_eq!(capture(r"^help$", "help", "pluginId").unwrap(), None);
    }
}
