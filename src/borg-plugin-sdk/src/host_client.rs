//! Client stubs for calling the host from inside a plugin.

use borg_plugin_api::{
    AUTHORIZATION_SCHEME, LogLevel, LogMessage, PluginId, PluginInformation,
    PluginInstallRequest, RegistrationRequest, SettingKey, SettingValue, TenantMessage, Token,
    routes,
};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use url::Url;

use crate::error::HostClientError;

type Result<T> = std::result::Result<T, HostClientError>;

/// Authenticated client for the host's HTTP surface.
#[derive(Debug, Clone)]
pub struct HostClient {
    client: reqwest::Client,
    base_uri: Url,
    token: Token,
}

impl HostClient {
    pub fn new(client: reqwest::Client, base_uri: Url, token: Token) -> Self {
        Self {
            client,
            base_uri,
            token,
        }
    }

    /// Plugin this client authenticates as.
    pub fn plugin_id(&self) -> &PluginId {
        self.token.plugin_id()
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Read a plugin-scoped configuration value.
    pub async fn configuration(&self, key: &str) -> Result<Option<String>> {
        let key = SettingKey::new(key)?;
        let url = self.url_with_segments(&["api", "plugin-configuration", key.as_str()])?;
        self.get_optional_value(url).await
    }

    /// Read a plugin-scoped setting.
    pub async fn setting(&self, key: &str) -> Result<Option<String>> {
        let key = SettingKey::new(key)?;
        let url = self.url_with_segments(&["api", "settings", key.as_str()])?;
        self.get_optional_value(url).await
    }

    /// Write a plugin-scoped setting.
    pub async fn set_setting(&self, key: &str, value: impl Into<String>) -> Result<()> {
        let key = SettingKey::new(key)?;
        let url = self.url_with_segments(&["api", "settings", key.as_str()])?;
        let body = SettingValue {
            value: value.into(),
        };
        self.send_json(Method::POST, url, &body).await?;
        Ok(())
    }

    /// Send a message through the tenant it is addressed to.
    pub async fn send_message(&self, message: &TenantMessage) -> Result<()> {
        let url = self.url(routes::host::TENANT_MESSAGES)?;
        self.send_json(Method::POST, url, message).await?;
        Ok(())
    }

    /// Reply to a message with plain text.
    pub async fn reply(&self, message: &TenantMessage, text: impl Into<String>) -> Result<()> {
        let reply = message.create_reply(text, Vec::new())?;
        self.send_message(&reply).await
    }

    /// Forward a log line into the host's log.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) -> Result<()> {
        let url = self.url(routes::host::LOGS)?;
        let body = LogMessage {
            level,
            message: message.into(),
        };
        self.send_json(Method::POST, url, &body).await?;
        Ok(())
    }

    /// Plugins currently loaded by the host.
    pub async fn plugins(&self) -> Result<Vec<PluginInformation>> {
        let url = self.url(routes::host::PLUGINS)?;
        let response = self.send(self.request(Method::GET, url)).await?;
        Ok(response.json().await?)
    }

    /// Ask the host to unload a plugin.
    pub async fn unload_plugin(&self, plugin_id: &PluginId) -> Result<()> {
        let url = self.url_with_segments(&["api", "plugins", plugin_id.as_str(), "unload"])?;
        self.send(self.request(Method::POST, url)).await?;
        Ok(())
    }

    /// Ask the host to install and load a plugin package.
    pub async fn install_plugin(&self, uri: &Url) -> Result<PluginInformation> {
        let url = self.url(routes::host::PLUGIN_INSTALLS_BY_URI)?;
        let body = PluginInstallRequest { uri: uri.clone() };
        let response = self.send_json(Method::POST, url, &body).await?;
        Ok(response.json().await?)
    }

    /// Publish the plugin's capability table.
    pub async fn register(&self, registration: &RegistrationRequest) -> Result<()> {
        let url = self.url(routes::host::PLUGIN_REGISTRATIONS)?;
        self.send_json(Method::POST, url, registration).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_uri
            .join(path)
            .map_err(|e| HostClientError::InvalidUri(e.to_string()))
    }

    fn url_with_segments(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_uri.clone();
        url.path_segments_mut()
            .map_err(|_| HostClientError::InvalidUri(self.base_uri.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).header(
            AUTHORIZATION,
            format!("{} {}", AUTHORIZATION_SCHEME, self.token),
        )
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &T,
    ) -> Result<Response> {
        self.send(self.request(method, url).json(body)).await
    }

    async fn get_optional_value(&self, url: Url) -> Result<Option<String>> {
        let response = self.request(Method::GET, url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: SettingValue = check(response).await?.json().await?;
        Ok(Some(value.value))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        check(request.send().await?).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(HostClientError::Status {
        status: status.as_u16(),
        message,
    })
}
