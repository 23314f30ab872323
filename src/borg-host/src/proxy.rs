//! Host-side handle to a loaded plugin.

use std::time::Duration;

use borg_plugin_api::{CommandDescription, PluginId, PluginInformation, routes};
use reqwest::Response;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::boundary::IsolationBoundary;
use crate::error::{PluginError, Result};

/// Thin HTTP client bound to one plugin's base address.
#[derive(Debug, Clone)]
pub struct PluginClient {
    plugin_id: PluginId,
    client: reqwest::Client,
    base_uri: Url,
    call_timeout: Duration,
}

impl PluginClient {
    pub fn new(
        plugin_id: PluginId,
        client: reqwest::Client,
        base_uri: Url,
        call_timeout: Duration,
    ) -> Self {
        Self {
            plugin_id,
            client,
            base_uri,
            call_timeout,
        }
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        let url = self.url(routes::plugin::PING)?;
        let response = self
            .client
            .get(url)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await?;
        Ok(())
    }

    /// Fetch the plugin's published information.
    pub async fn plugin_information(&self) -> Result<PluginInformation> {
        self.get_json(routes::plugin::INFORMATION).await
    }

    /// Fetch the plugin's command list.
    pub async fn commands(&self) -> Result<Vec<CommandDescription>> {
        self.get_json(routes::plugin::COMMANDS).await
    }

    /// POST a JSON body to a plugin-declared endpoint.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<()> {
        let url = self.url(endpoint)?;
        let response = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response).await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self
            .client
            .get(url)
            .timeout(self.call_timeout)
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| self.transport(e))
    }

    fn url(&self, path: &str) -> Result<Url> {
        let path = format!("/{}", path.trim_start_matches('/'));
        self.base_uri
            .join(&path)
            .map_err(|e| PluginError::transport(&self.plugin_id, format!("bad endpoint '{path}': {e}")))
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PluginError::transport(
            &self.plugin_id,
            format!("{status}: {body}"),
        ))
    }

    fn transport(&self, error: reqwest::Error) -> PluginError {
        if error.is_timeout() {
            PluginError::Timeout(format!("plugin '{}': {error}", self.plugin_id))
        } else {
            PluginError::transport(&self.plugin_id, error.to_string())
        }
    }
}

/// A loaded plugin: its boundary plus a client for calling it.
pub struct PluginProxy {
    plugin_id: PluginId,
    client: PluginClient,
    boundary: Mutex<Option<Box<dyn IsolationBoundary>>>,
}

impl PluginProxy {
    pub fn new(
        plugin_id: PluginId,
        boundary: Box<dyn IsolationBoundary>,
        client: PluginClient,
    ) -> Self {
        Self {
            plugin_id,
            client,
            boundary: Mutex::new(Some(boundary)),
        }
    }

    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    pub fn client(&self) -> &PluginClient {
        &self.client
    }

    pub async fn ping(&self) -> Result<()> {
        self.client.ping().await
    }

    pub async fn get_plugin_information(&self) -> Result<PluginInformation> {
        self.client.plugin_information().await
    }

    pub async fn get_commands(&self) -> Result<Vec<CommandDescription>> {
        self.client.commands().await
    }

    /// Whether the boundary is still open and its code running.
    pub async fn is_alive(&self) -> bool {
        self.boundary
            .lock()
            .await
            .as_ref()
            .is_some_and(|b| b.is_alive())
    }

    /// Destroy the boundary. Later calls do nothing.
    pub async fn close(&self) {
        let boundary = self.boundary.lock().await.take();
        match boundary {
            Some(boundary) => {
                boundary.destroy().await;
                debug!(plugin = %self.plugin_id, "Closed plugin proxy");
            }
            None => debug!(plugin = %self.plugin_id, "Plugin proxy already closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::boundary::BoundaryExit;
    use async_trait::async_trait;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingBoundary {
        destroyed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl IsolationBoundary for CountingBoundary {
        fn name(&self) -> &str {
            "counting"
        }

        fn is_alive(&self) -> bool {
            self.destroyed.load(Ordering::SeqCst) == 0
        }

        async fn wait_exit(&self) -> BoundaryExit {
            BoundaryExit::Destroyed
        }

        async fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn client(server: &MockServer) -> PluginClient {
        PluginClient::new(
            PluginId::new("status").unwrap(),
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_metadata_calls() {
        let server = MockServer::start().await;
        let uri = Url::parse(&server.uri()).unwrap();
        Mock::given(method("GET"))
            .and(path("/_plugin/ping"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_plugin/plugin-information"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "status",
                "title": "Status",
                "version": "1.0.0",
                "description": "Answers pings",
                "uri": uri.as_str(),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_plugin/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"regex": "^ping (?<message>.+)$", "help": "pings", "endpoint": "/api/commands/ping"}
            ])))
            .mount(&server)
            .await;

        let client = client(&server);
        client.ping().await.unwrap();
        assert_eq!(client.plugin_information().await.unwrap().title, "Status");
        assert_eq!(client.commands().await.unwrap()[0].help, "pings");
    }

    #[tokio::test]
    async fn test_post_json_to_relative_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/commands/ping"))
            .and(body_json(serde_json::json!({"n": 1})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .post_json(
                "api/commands/ping",
                &serde_json::json!({"n": 1}),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_plugin/ping"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).ping().await.unwrap_err();
        assert!(matches!(err, PluginError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_slow_plugin_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_plugin/ping"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = PluginClient::new(
            PluginId::new("slow").unwrap(),
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            Duration::from_millis(100),
        );
        assert!(matches!(
            client.ping().await.unwrap_err(),
            PluginError::Timeout(_)
        ));
    }

    #[tokio::test]
    async fn test_close_destroys_boundary_once() {
        let server = MockServer::start().await;
        let destroyed = Arc::new(AtomicUsize::new(0));
        let proxy = PluginProxy::new(
            PluginId::new("status").unwrap(),
            Box::new(CountingBoundary {
                destroyed: destroyed.clone(),
            }),
            client(&server),
        );

        assert!(proxy.is_alive().await);
        proxy.close().await;
        proxy.close().await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(!proxy.is_alive().await);
    }
}
