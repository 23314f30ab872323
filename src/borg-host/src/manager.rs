//! Plugin management service.
//!
//! Owns the registry of loaded plugins, the host HTTP surface plugins call
//! back into, and message dispatch to plugin commands.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use borg_plugin_api::{
    ApiError, PluginEnvironment, PluginId, PluginInformation, PluginPackageType, PluginPath,
    ProcessMessageResult, RegistrationRequest, TenantMessage, Token,
};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::api;
use crate::boundary::{BoundaryFactory, IsolationBoundary, LaunchSpec, ProcessBoundaryFactory};
use crate::builtin::BuiltinPlugin;
use crate::collective::MessageProcessor;
use crate::config::HostConfig;
use crate::error::{PluginError, Result};
use crate::installer::{DirectoryInstaller, PackageDownloader, PluginInstaller};
use crate::proxy::{PluginClient, PluginProxy};
use crate::registry::{CompiledCommand, LoadedPlugin, PluginRegistry, PluginState, Reservation};
use crate::sessions::SessionStore;
use crate::settings::{
    ConfigurationReader, MemorySettingsStore, SettingsStore, StaticConfigurationReader,
};
use crate::tenants::MessageService;

/// Collaborators the manager is built from.
#[derive(Clone)]
pub struct HostServices {
    pub http_client: reqwest::Client,
    pub settings: Arc<dyn SettingsStore>,
    pub configuration: Arc<dyn ConfigurationReader>,
    pub messages: Arc<MessageService>,
    pub installer: Arc<dyn PluginInstaller>,
}

impl HostServices {
    /// In-memory settings, configuration from `config`, no tenants, and a
    /// directory installer at the configured install root.
    pub fn new(config: &HostConfig, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            settings: Arc::new(MemorySettingsStore::new()),
            configuration: Arc::new(StaticConfigurationReader::new(
                config.plugin_configuration.clone(),
            )),
            messages: Arc::new(MessageService::new()),
            installer: Arc::new(DirectoryInstaller::new(config.install_root.clone())),
        }
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_configuration(mut self, configuration: Arc<dyn ConfigurationReader>) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_messages(mut self, messages: Arc<MessageService>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn PluginInstaller>) -> Self {
        self.installer = installer;
        self
    }
}

struct ServerHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    config: HostConfig,
    services: HostServices,
    downloader: PackageDownloader,
    process_factory: Arc<dyn BoundaryFactory>,
    registry: PluginRegistry,
    sessions: SessionStore,
    host_uri: OnceLock<Url>,
    server: Mutex<Option<ServerHandle>>,
}

/// Shared handle to the plugin management service.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<Inner>,
}

impl PluginManager {
    pub fn new(config: HostConfig, services: HostServices) -> Self {
        let process_factory = Arc::new(ProcessBoundaryFactory::new(
            config.shadow_copy,
            config.timeouts.destroy_grace_duration(),
        ));
        Self::with_boundary_factory(config, services, process_factory)
    }

    /// Like [`new`](Self::new) with a custom boundary factory for plugin
    /// binaries.
    pub fn with_boundary_factory(
        config: HostConfig,
        services: HostServices,
        process_factory: Arc<dyn BoundaryFactory>,
    ) -> Self {
        let downloader = PackageDownloader::new(services.http_client.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                services,
                downloader,
                process_factory,
                registry: PluginRegistry::new(),
                sessions: SessionStore::new(),
                host_uri: OnceLock::new(),
                server: Mutex::new(None),
            }),
        }
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.inner.services.http_client
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.inner.services.settings
    }

    pub fn configuration(&self) -> &Arc<dyn ConfigurationReader> {
        &self.inner.services.configuration
    }

    pub fn messages(&self) -> &Arc<MessageService> {
        &self.inner.services.messages
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// Address of the host HTTP surface, once initialized.
    pub fn host_uri(&self) -> Result<&Url> {
        self.inner.host_uri.get().ok_or(PluginError::NotInitialized)
    }

    pub fn is_loaded(&self, plugin_id: &PluginId) -> bool {
        self.inner.registry.state(plugin_id) == PluginState::Loaded
    }

    pub fn state(&self, plugin_id: &PluginId) -> PluginState {
        self.inner.registry.state(plugin_id)
    }

    /// Loaded plugin ids in load order.
    pub fn loaded_ids(&self) -> Vec<PluginId> {
        self.inner.registry.loaded_ids()
    }

    // ========== Lifecycle ==========

    /// Start the host HTTP surface. Must run before any plugin is loaded.
    ///
    /// Calling it again returns the address already in use.
    pub async fn initialize(&self) -> Result<Url> {
        if let Some(uri) = self.inner.host_uri.get() {
            return Ok(uri.clone());
        }

        let listener = TcpListener::bind(self.inner.config.listen_addr.as_str()).await?;
        let addr = listener.local_addr()?;
        let uri = Url::parse(&format!("http://{addr}/"))
            .map_err(|e| PluginError::Io(std::io::Error::other(e)))?;

        let shutdown = CancellationToken::new();
        let app = api::router(self.clone());
        let server_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "Host API server failed");
            }
        });

        if self.inner.host_uri.set(uri.clone()).is_err() {
            shutdown.cancel();
            return self.host_uri().cloned();
        }
        *self.inner.server.lock() = Some(ServerHandle { shutdown, task });

        info!(uri = %uri, "Host API listening");
        Ok(uri)
    }

    /// Unload every plugin, then stop the host HTTP surface.
    pub async fn shutdown(&self) {
        let ids = self.loaded_ids();
        info!(count = ids.len(), "Shutting down plugin manager");
        join_all(ids.iter().map(|id| self.unload_plugin(id))).await;

        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.shutdown.cancel();
            let grace = self.inner.config.timeouts.shutdown_duration();
            if tokio::time::timeout(grace, server.task).await.is_err() {
                warn!("Host API did not stop within {}s", grace.as_secs());
            }
        }
    }

    // ========== Loading ==========

    /// Load a plugin executable in its own process.
    pub async fn load_plugin(
        &self,
        path: &PluginPath,
        cancel: &CancellationToken,
    ) -> Result<PluginInformation> {
        let plugin_id = path.plugin_id()?;
        let factory = self.inner.process_factory.clone();
        self.load(plugin_id, Some(path.clone()), factory.as_ref(), cancel)
            .await
    }

    /// Load a plugin compiled into the host.
    pub async fn load_builtin(
        &self,
        builtin: &BuiltinPlugin,
        cancel: &CancellationToken,
    ) -> Result<PluginInformation> {
        self.load(builtin.id().clone(), None, builtin.factory(), cancel)
            .await
    }

    /// Load every plugin found in the install root.
    ///
    /// Failures are logged and skipped so one broken package cannot keep the
    /// rest from loading.
    pub async fn load_installed_plugins(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<PluginInformation>> {
        let paths = self.inner.services.installer.installed_plugins().await?;
        let results = join_all(paths.iter().map(|path| self.load_plugin(path, cancel))).await;

        let mut loaded = Vec::with_capacity(results.len());
        for (path, result) in paths.iter().zip(results) {
            match result {
                Ok(information) => loaded.push(information),
                Err(e) => warn!(path = %path, error = %e, "Failed to load installed plugin"),
            }
        }
        Ok(loaded)
    }

    async fn load(
        &self,
        plugin_id: PluginId,
        binary: Option<PluginPath>,
        factory: &dyn BoundaryFactory,
        cancel: &CancellationToken,
    ) -> Result<PluginInformation> {
        let host_uri = self.host_uri()?.clone();
        let reservation = self.inner.registry.reserve(&plugin_id)?;
        self.load_reserved(reservation, host_uri, binary, factory, cancel)
            .await
    }

    /// Everything created here is released if the future is dropped early:
    /// the reservation, the session token and the boundary all clean up on drop.
    async fn load_reserved(
        &self,
        reservation: Reservation<'_>,
        host_uri: Url,
        binary: Option<PluginPath>,
        factory: &dyn BoundaryFactory,
        cancel: &CancellationToken,
    ) -> Result<PluginInformation> {
        let plugin_id = reservation.id().clone();
        let session = self.inner.sessions.open(&plugin_id);
        let token = session.token().clone();
        let registration = self.inner.sessions.expect_registration(&token);

        info!(plugin = %plugin_id, "Loading plugin");
        let launch = LaunchSpec {
            environment: PluginEnvironment::new(plugin_id.clone(), host_uri, token.clone())?,
            binary,
        };

        match self
            .start(&plugin_id, &token, launch, factory, registration, cancel)
            .await
        {
            Ok(plugin) => {
                session.commit();
                let plugin = reservation.commit(plugin);
                info!(
                    plugin = %plugin_id,
                    version = %plugin.information.version,
                    commands = plugin.commands.len(),
                    "Plugin loaded"
                );
                Ok(plugin.information.clone())
            }
            Err(e) => {
                warn!(plugin = %plugin_id, error = %e, "Plugin failed to load");
                Err(e)
            }
        }
    }

    async fn start(
        &self,
        plugin_id: &PluginId,
        token: &Token,
        launch: LaunchSpec,
        factory: &dyn BoundaryFactory,
        registration: oneshot::Receiver<RegistrationRequest>,
        cancel: &CancellationToken,
    ) -> Result<LoadedPlugin> {
        let boundary = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PluginError::Cancelled(format!("load of '{plugin_id}'")));
            }
            created = factory.create(launch) => created?,
        };
        debug!(plugin = %plugin_id, boundary = boundary.name(), "Boundary created");

        match self
            .handshake(plugin_id, boundary.as_ref(), registration, cancel)
            .await
        {
            Ok((information, commands, client)) => Ok(LoadedPlugin {
                information,
                commands,
                proxy: PluginProxy::new(plugin_id.clone(), boundary, client),
                token: token.clone(),
            }),
            Err(e) => {
                boundary.destroy().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
        plugin_id: &PluginId,
        boundary: &dyn IsolationBoundary,
        registration: oneshot::Receiver<RegistrationRequest>,
        cancel: &CancellationToken,
    ) -> Result<(PluginInformation, Vec<CompiledCommand>, PluginClient)> {
        let timeouts = &self.inner.config.timeouts;
        let load_timeout = timeouts.load_duration();

        let request = tokio::select! {
            received = registration => received.map_err(|_| {
                PluginError::load_error(plugin_id, "registration was abandoned")
            })?,
            exit = boundary.wait_exit() => return Err(exit.into_load_error(plugin_id)),
            _ = tokio::time::sleep(load_timeout) => {
                return Err(PluginError::Timeout(format!(
                    "plugin '{plugin_id}' did not register within {}s",
                    load_timeout.as_secs()
                )));
            }
            _ = cancel.cancelled() => {
                return Err(PluginError::Cancelled(format!("load of '{plugin_id}'")));
            }
        };

        let commands = request
            .commands
            .into_iter()
            .map(CompiledCommand::compile)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| PluginError::configuration(plugin_id, e.to_string()))?;

        let client = PluginClient::new(
            plugin_id.clone(),
            self.inner.services.http_client.clone(),
            request.information.uri.clone(),
            timeouts.ping_duration(),
        );

        let information = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(PluginError::Cancelled(format!("load of '{plugin_id}'")));
            }
            fetched = async {
                client.ping().await?;
                client.plugin_information().await
            } => fetched?,
        };
        if &information.id != plugin_id {
            return Err(PluginError::configuration(
                plugin_id,
                format!("plugin reported id '{}'", information.id),
            ));
        }

        Ok((information, commands, client))
    }

    // ========== Operations ==========

    /// Unload a plugin. Unknown or already unloaded ids are a no-op.
    pub async fn unload_plugin(&self, plugin_id: &PluginId) {
        let Some(plugin) = self.inner.registry.begin_unload(plugin_id) else {
            debug!(plugin = %plugin_id, "Unload requested for plugin that is not loaded");
            return;
        };

        plugin.proxy.close().await;
        self.inner.sessions.revoke(&plugin.token);
        self.inner.registry.finish_unload(plugin_id);
        info!(plugin = %plugin_id, "Plugin unloaded");
    }

    /// Information of every responsive loaded plugin, in load order.
    pub async fn list_plugins(&self) -> Vec<PluginInformation> {
        let plugins = self.inner.registry.snapshot();
        let timeout = self.inner.config.timeouts.list_duration();

        let answers = join_all(plugins.iter().map(|plugin| async move {
            tokio::time::timeout(timeout, plugin.proxy.get_plugin_information()).await
        }))
        .await;

        plugins
            .iter()
            .zip(answers)
            .filter_map(|(plugin, answer)| match answer {
                Ok(Ok(information)) => Some(information),
                Ok(Err(e)) => {
                    warn!(plugin = %plugin.id(), error = %e, "Omitting plugin from listing");
                    None
                }
                Err(_) => {
                    warn!(plugin = %plugin.id(), "Omitting plugin from listing: timed out");
                    None
                }
            })
            .collect()
    }

    /// Liveness check for one loaded plugin.
    pub async fn ping_plugin(&self, plugin_id: &PluginId, cancel: &CancellationToken) -> Result<()> {
        let plugin = self
            .inner
            .registry
            .get(plugin_id)
            .ok_or_else(|| PluginError::NotFound(format!("plugin '{plugin_id}'")))?;
        tokio::select! {
            _ = cancel.cancelled() => Err(PluginError::Cancelled(format!("ping of '{plugin_id}'"))),
            result = plugin.proxy.ping() => result,
        }
    }

    /// Forward `message` to the first plugin command matching its text.
    pub async fn dispatch_message(
        &self,
        message: &TenantMessage,
        cancel: &CancellationToken,
    ) -> Result<ProcessMessageResult> {
        let plugins = self.inner.registry.snapshot();
        let matches = matching_commands(&plugins, &message.text);

        let Some(&(plugin, command)) = matches.first() else {
            debug!(text = %message.text, "No plugin command matched");
            return Ok(ProcessMessageResult::Skipped);
        };

        if matches.len() > 1 {
            let shadowed: Vec<String> = matches[1..]
                .iter()
                .map(|(p, c)| format!("{}:{}", p.id(), c.description.regex))
                .collect();
            warn!(
                plugin = %plugin.id(),
                command = %command.description.regex,
                shadowed = ?shadowed,
                "Message matched several commands, using the first"
            );
        }

        debug!(
            plugin = %plugin.id(),
            endpoint = %command.description.endpoint,
            "Dispatching message"
        );
        let timeout = self.inner.config.timeouts.dispatch_duration();
        tokio::select! {
            _ = cancel.cancelled() => {
                Err(PluginError::Cancelled(format!("dispatch to '{}'", plugin.id())))
            }
            sent = plugin.proxy.client().post_json(&command.description.endpoint, message, timeout) => {
                sent.map_err(|e| PluginError::dispatch(plugin.id(), e.to_string()))?;
                Ok(ProcessMessageResult::Handled)
            }
        }
    }

    // ========== Packages ==========

    /// Download a package, unpack it and load the plugin it contains.
    ///
    /// The source is validated before any download starts.
    pub async fn install_plugin(
        &self,
        uri: &Url,
        cancel: &CancellationToken,
    ) -> Result<PluginInformation> {
        let package_type = PluginPackageType::from_uri(uri)?;
        let plugin_id = PluginPackageType::package_name(uri)
            .ok_or_else(|| ApiError::UnsupportedPackage(uri.to_string()))
            .and_then(PluginId::new)?;
        let host_uri = self.host_uri()?.clone();
        // Held from before the download until the load finishes, so nothing
        // else can load this id while its directory is being replaced.
        let reservation = self.inner.registry.reserve(&plugin_id)?;

        info!(plugin = %plugin_id, uri = %uri, "Installing plugin");
        let package = self.inner.downloader.download(uri, cancel).await?;
        let path = self
            .inner
            .services
            .installer
            .install(&plugin_id, package.path(), package_type)
            .await?;
        drop(package);

        let factory = self.inner.process_factory.clone();
        self.load_reserved(reservation, host_uri, Some(path), factory.as_ref(), cancel)
            .await
    }

    /// Unload a plugin and remove its installed files.
    pub async fn uninstall_plugin(&self, plugin_id: &PluginId) -> Result<()> {
        self.unload_plugin(plugin_id).await;
        self.inner.services.installer.uninstall(plugin_id).await
    }
}

/// Every command matching `text`, in load order then registration order.
fn matching_commands<'a>(
    plugins: &'a [Arc<LoadedPlugin>],
    text: &str,
) -> Vec<(&'a Arc<LoadedPlugin>, &'a CompiledCommand)> {
    let mut matches = Vec::new();
    for plugin in plugins {
        for command in &plugin.commands {
            if command.is_match(text) {
                matches.push((plugin, command));
            }
        }
    }
    matches
}

#[async_trait]
impl MessageProcessor for PluginManager {
    fn name(&self) -> &str {
        "plugins"
    }

    async fn process(
        &self,
        message: &TenantMessage,
        cancel: &CancellationToken,
    ) -> Result<ProcessMessageResult> {
        self.dispatch_message(message, cancel).await
    }
}
