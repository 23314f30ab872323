//! Borg plugin SDK.
//!
//! Everything a plugin executable needs:
//! - [`PluginBootstrapper`]: the start routine a plugin implements
//! - [`PluginRegistration`]: declares identity, endpoints and commands
//! - [`ApiEndpoint`] / [`PluginHttpApi`]: typed HTTP handlers
//! - [`HostClient`]: configuration, settings, messaging and log calls into the host
//! - [`run`] / [`serve`]: the adapter that publishes the plugin and serves it
//!
//! A minimal plugin:
//!
//! ```ignore
//! struct Status;
//!
//! #[async_trait::async_trait]
//! impl PluginBootstrapper for Status {
//!     async fn start(&self, registration: &mut PluginRegistration) -> anyhow::Result<()> {
//!         registration.describe("Status", "1.0.0", "Answers pings")?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     borg_plugin_sdk::run(vec![Box::new(Status)]).await
//! }
//! ```

pub mod adapter;
pub mod bootstrapper;
pub mod endpoint;
pub mod error;
pub mod host_client;
pub mod registration;

pub use adapter::{create_host_http_client, router, run, serve};
pub use bootstrapper::{PluginBootstrapper, resolve_bootstrapper};
pub use endpoint::{
    ApiEndpoint, Body, EndpointHandler, FromApiRequest, HttpMethod, PluginHttpApi,
    RequestContext,
};
pub use error::{AdapterError, HostClientError, RegistrationError, Result};
pub use host_client::HostClient;
pub use registration::{PluginRegistration, PluginRoutes};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
