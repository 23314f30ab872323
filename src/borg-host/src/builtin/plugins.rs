//! `plugins`: list, unload and install plugins from chat.

use std::sync::Arc;

use borg_plugin_api::{PluginId, TenantMessage};
use borg_plugin_sdk::{
    ApiEndpoint, Body, HostClient, PluginBootstrapper, PluginHttpApi, PluginRegistration,
    async_trait,
};
use url::Url;

use super::capture;

const UNLOAD: &str = r"^unload plugin (?<pluginId>[a-z0-9\-\.]+)$";
const INSTALL: &str = r"^install plugin (?<uri>.+)$";

/// Bootstrapper for the administration plugin.
pub struct AdministrationPlugin;

impl AdministrationPlugin {
    pub const ID: &'static str = "plugins";
}

#[async_trait]
impl PluginBootstrapper for AdministrationPlugin {
    async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
        registration.describe(
            "Plugins",
            env!("CARGO_PKG_VERSION"),
            "Lists, unloads and installs plugins",
        )?;
        registration.register_http_api_with(|host| PluginsApi { host: host.clone() });
        Ok(())
    }
}

struct PluginsApi {
    host: HostClient,
}

impl PluginHttpApi for PluginsApi {
    fn endpoints(self: Arc<Self>) -> Vec<ApiEndpoint> {
        let list = self.clone();
        let unload = self.clone();
        let install = self;
        vec![
            ApiEndpoint::post("api/commands/list-plugins", move |Body(message): Body<TenantMessage>| {
                let api = list.clone();
                async move { api.list(message).await }
            })
            .command("^plugins$", "list all plugins"),
            ApiEndpoint::post("api/commands/unload-plugin", move |Body(message): Body<TenantMessage>| {
                let api = unload.clone();
                async move { api.unload(message).await }
            })
            .command(UNLOAD, "unload a plugin"),
            ApiEndpoint::post("api/commands/install-plugin", move |Body(message): Body<TenantMessage>| {
                let api = install.clone();
                async move { api.install(message).await }
            })
            .command(INSTALL, "install a plugin from a .zip URL"),
        ]
    }
}

impl PluginsApi {
    async fn list(&self, message: TenantMessage) -> anyhow::Result<()> {
        let plugins = self.host.plugins().await?;
        let text = plugins
            .iter()
            .map(|p| format!("{} - {}", p.id, p.description))
            .collect::<Vec<_>>()
            .join("\n");
        let text = if text.is_empty() {
            "No plugins are loaded".to_string()
        } else {
            text
        };
        self.host.reply(&message, text).await?;
        Ok(())
    }

    async fn unload(&self, message: TenantMessage) -> anyhow::Result<()> {
        let Some(id) = capture(UNLOAD, &message.text, "pluginId")? else {
            return Ok(());
        };
        let plugin_id = PluginId::new(id)?;
        self.host.unload_plugin(&plugin_id).await?;
        self.host
            .reply(&message, format!("Unloaded plugin {plugin_id}"))
            .await?;
        Ok(())
    }

    async fn install(&self, message: TenantMessage) -> anyhow::Result<()> {
        let Some(raw) = capture(INSTALL, &message.text, "uri")? else {
            return Ok(());
        };
        let reply = match Url::parse(&raw) {
            Err(_) => format!("This is not a valid URI {raw}, please provide me with a real one"),
            Ok(uri) => match self.host.install_plugin(&uri).await {
                Ok(plugin) => format!("Installed {}: {}", plugin.id, plugin.description),
                Err(e) => format!("Could not install {uri}: {e}"),
            },
        };
        self.host.reply(&message, reply).await?;
        Ok(())
    }
}
