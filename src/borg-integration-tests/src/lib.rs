//! Fixture plugins used by the end-to-end tests.
//!
//! Each fixture is shipped as its own executable under `src/bin` so the
//! host can launch it exactly like an installed plugin.

use std::sync::Arc;

use async_trait::async_trait;
use borg_plugin_api::{AttachmentProperty, CommandDescription, TenantMessage};
use borg_plugin_sdk::{
    ApiEndpoint, Body, HostClient, PluginBootstrapper, PluginHttpApi, PluginRegistration,
};

/// Setting the echo plugin writes the last ping message to.
pub const LAST_PING_SETTING: &str = "last-ping-message";

/// Answers `ping <message>` with `pong` and stores the message as a setting.
pub struct EchoPlugin;

#[async_trait]
impl PluginBootstrapper for EchoPlugin {
    async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
        registration.describe("Echo", env!("CARGO_PKG_VERSION"), "Answers pings")?;
        registration.register_http_api_with(|host| EchoApi { host: host.clone() });
        Ok(())
    }
}

struct EchoApi {
    host: HostClient,
}

impl PluginHttpApi for EchoApi {
    fn endpoints(self: Arc<Self>) -> Vec<ApiEndpoint> {
        vec![
            ApiEndpoint::post("api/commands/ping", move |Body(message): Body<TenantMessage>| {
                let api = self.clone();
                async move {
                    let text = message
                        .text
                        .strip_prefix("ping ")
                        .unwrap_or(&message.text)
                        .to_string();
                    api.host.set_setting(LAST_PING_SETTING, text.clone()).await?;
                    let reply = message
                        .create_reply("pong", vec![AttachmentProperty::with("message", text)])?;
                    api.host.send_message(&reply).await?;
                    Ok::<_, anyhow::Error>(())
                }
            })
            .command("^ping (?<message>.+)$", "answers with pong"),
        ]
    }
}

/// Declares a command but never says who it is.
pub struct NamelessPlugin;

#[async_trait]
impl PluginBootstrapper for NamelessPlugin {
    async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
        registration.register_commands([CommandDescription::new("^hello$", "hi", "/hello")]);
        Ok(())
    }
}

/// Fails inside its start routine.
pub struct CrashingPlugin;

#[async_trait]
impl PluginBootstrapper for CrashingPlugin {
    async fn start(&self, _registration: &mut PluginRegistration) -> anyhow::Result<()> {
        anyhow::bail!("required service is unreachable")
    }
}
