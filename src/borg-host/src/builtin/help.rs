//! `help`: lists the commands every loaded plugin understands.

use std::fmt::Write as _;
use std::sync::Arc;

use borg_plugin_api::{CommandDescription, PluginInformation, TenantMessage, routes};
use borg_plugin_sdk::{
    ApiEndpoint, Body, HostClient, PluginBootstrapper, PluginHttpApi, PluginRegistration,
    async_trait,
};
use futures::future::join_all;
use tracing::warn;

use super::capture;

const HELP_ONE: &str = r"^help (?<pluginId>[a-z0-9\-\.]+)$";

/// Bootstrapper for the help plugin.
pub struct HelpPlugin {
    client: reqwest::Client,
}

impl HelpPlugin {
    pub const ID: &'static str = "help";

    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PluginBootstrapper for HelpPlugin {
    async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
        registration.describe(
            "Help",
            env!("CARGO_PKG_VERSION"),
            "Lists the commands plugins understand",
        )?;
        let client = self.client.clone();
        registration.register_http_api_with(|host| HelpApi {
            host: host.clone(),
            client,
        });
        Ok(())
    }
}

struct HelpApi {
    host: HostClient,
    client: reqwest::Client,
}

impl PluginHttpApi for HelpApi {
    fn endpoints(self: Arc<Self>) -> Vec<ApiEndpoint> {
        let all = self.clone();
        let one = self;
        vec![
            ApiEndpoint::post("api/commands/help", move |Body(message): Body<TenantMessage>| {
                let api = all.clone();
                async move { api.help_all(message).await }
            })
            .command("^help$", "list every command of every plugin"),
            ApiEndpoint::post(
                "api/commands/help-plugin",
                move |Body(message): Body<TenantMessage>| {
                    let api = one.clone();
                    async move { api.help_plugin(message).await }
                },
            )
            .command(HELP_ONE, "list the commands of one plugin"),
        ]
    }
}

impl HelpApi {
    async fn help_all(&self, message: TenantMessage) -> anyhow::Result<()> {
        let plugins = self.host.plugins().await?;
        let sections = join_all(plugins.iter().map(|p| self.describe(p))).await;
        let text = if sections.is_empty() {
            "No plugins are loaded".to_string()
        } else {
            sections.join("\n")
        };
        self.host.reply(&message, text).await?;
        Ok(())
    }

    async fn help_plugin(&self, message: TenantMessage) -> anyhow::Result<()> {
        let Some(plugin_id) = capture(HELP_ONE, &message.text, "pluginId")? else {
            return Ok(());
        };
        let plugins = self.host.plugins().await?;
        let text = match plugins.iter().find(|p| p.id.as_str() == plugin_id) {
            Some(plugin) => self.describe(plugin).await,
            None => format!("No plugin named '{plugin_id}' is loaded"),
        };
        self.host.reply(&message, text).await?;
        Ok(())
    }

    async fn describe(&self, plugin: &PluginInformation) -> String {
        let mut text = format!("{} - {}\n", plugin.id, plugin.title);
        match self.commands(plugin).await {
            Ok(commands) if commands.is_empty() => text.push_str("  (no commands)\n"),
            Ok(commands) => {
                for command in commands {
                    let _ = writeln!(text, "  {}  {}", command.regex, command.help);
                }
            }
            Err(e) => {
                warn!(plugin = %plugin.id, error = %e, "Could not fetch plugin commands");
                text.push_str("  (commands unavailable)\n");
            }
        }
        text
    }

    async fn commands(&self, plugin: &PluginInformation) -> anyhow::Result<Vec<CommandDescription>> {
        let url = plugin.uri.join(routes::plugin::COMMANDS)?;
        let commands = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(commands)
    }
}
