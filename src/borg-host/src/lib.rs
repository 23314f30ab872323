//! Borg plugin host.
//!
//! This crate provides:
//! - Isolation boundaries that run each plugin as a child process or a
//!   supervised task
//! - The plugin management service: load, unload, list, install, dispatch
//! - The HTTP surface plugins call back into (configuration, settings,
//!   messages, registrations)
//! - The message pump that feeds tenant messages to plugin commands
//! - The built-in `help` and `plugins` plugins

pub mod api;
pub mod boundary;
pub mod builtin;
pub mod collective;
pub mod config;
pub mod error;
pub mod http_client;
pub mod installer;
pub mod manager;
pub mod proxy;
pub mod registry;
pub mod sessions;
pub mod settings;
pub mod tenants;

use std::future::Future;
use std::sync::Arc;

use borg_plugin_api::PluginPath;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use boundary::{
    BoundaryExit, BoundaryFactory, IsolationBoundary, LaunchSpec, ProcessBoundaryFactory,
    TaskBoundaryFactory,
};
pub use builtin::BuiltinPlugin;
pub use collective::{Collective, MessageProcessor};
pub use config::HostConfig;
pub use error::{AppError, AppResult, PluginError, Result};
pub use manager::{HostServices, PluginManager};
pub use registry::PluginState;
pub use tenants::{ConsoleTenant, MessageService, Tenant};

use settings::{FileSettingsStore, MemorySettingsStore, SettingsStore};

/// Inbox capacity between tenants and the message pump.
const INBOX_CAPACITY: usize = 64;

/// Run the host until `shutdown` resolves.
pub async fn run_with_shutdown<F>(config: HostConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let http_client = http_client::create_client().map_err(anyhow::Error::msg)?;

    let settings: Arc<dyn SettingsStore> = if config.persist_settings {
        Arc::new(FileSettingsStore::open(config.settings_path()).await?)
    } else {
        Arc::new(MemorySettingsStore::new())
    };
    let messages = Arc::new(MessageService::new().with_tenant(Arc::new(ConsoleTenant::stdio())));
    let services = HostServices::new(&config, http_client.clone())
        .with_settings(settings)
        .with_messages(messages.clone());

    let manager = PluginManager::new(config.clone(), services);
    let host_uri = manager.initialize().await?;
    info!(uri = %host_uri, "Plugin host started");

    let stop = CancellationToken::new();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            shutdown.await;
            stop.cancel();
        }
    });

    load_startup_plugins(&manager, &config, http_client, &stop).await;

    let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
    tokio::spawn({
        let messages = messages.clone();
        let inbox = inbox.clone();
        let stop = stop.clone();
        async move { messages.connect_all(inbox, stop).await }
    });

    let processors: Vec<Arc<dyn MessageProcessor>> = vec![Arc::new(manager.clone())];
    let collective = Collective::new(processors, messages);
    collective.run(rx, stop.clone()).await;
    drop(inbox);

    manager.shutdown().await;
    info!("Plugin host stopped");
    Ok(())
}

async fn load_startup_plugins(
    manager: &PluginManager,
    config: &HostConfig,
    http_client: reqwest::Client,
    cancel: &CancellationToken,
) {
    let grace = config.timeouts.destroy_grace_duration();
    for name in &config.builtin_plugins {
        let loaded = match BuiltinPlugin::by_name(name, http_client.clone(), grace) {
            Ok(builtin) => manager.load_builtin(&builtin, cancel).await,
            Err(e) => Err(e),
        };
        if let Err(e) = loaded {
            warn!(plugin = %name, error = %e, "Built-in plugin not loaded");
        }
    }

    for path in &config.plugins {
        let path = PluginPath::new(path.clone());
        if let Err(e) = manager.load_plugin(&path, cancel).await {
            warn!(path = %path, error = %e, "Configured plugin not loaded");
        }
    }

    match manager.load_installed_plugins(cancel).await {
        Ok(loaded) => info!(count = loaded.len(), "Loaded installed plugins"),
        Err(e) => warn!(error = %e, "Could not enumerate installed plugins"),
    }
}
