//! The entry point every plugin implements.

use async_trait::async_trait;

use crate::error::{AdapterError, Result};
use crate::registration::PluginRegistration;

/// Start routine of a plugin.
///
/// `start` must call [`PluginRegistration::set_plugin_information`] (or
/// [`PluginRegistration::describe`]) exactly once and declare the plugin's
/// endpoints and commands.
#[async_trait]
pub trait PluginBootstrapper: Send + Sync {
    async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()>;
}

/// Pick the single bootstrapper a plugin binary offers.
pub fn resolve_bootstrapper(
    mut candidates: Vec<Box<dyn PluginBootstrapper>>,
) -> Result<Box<dyn PluginBootstrapper>> {
    if candidates.len() > 1 {
        return Err(AdapterError::Configuration(format!(
            "found {} plugin bootstrappers, expected exactly one",
            candidates.len()
        )));
    }
    candidates
        .pop()
        .ok_or_else(|| AdapterError::Configuration("no plugin bootstrapper found".to_string()))
}
