//! Registration builder handed to a bootstrapper's start routine.

use std::collections::HashSet;
use std::sync::Arc;

use borg_plugin_api::{CommandDescription, PluginId, PluginInformation, routes};
use url::Url;

use crate::endpoint::{ApiEndpoint, PluginHttpApi};
use crate::error::RegistrationError;
use crate::host_client::HostClient;

/// Collects a plugin's identity, endpoints and commands during start.
pub struct PluginRegistration {
    plugin_id: PluginId,
    base_uri: Url,
    host: HostClient,
    information: Option<PluginInformation>,
    endpoints: Vec<ApiEndpoint>,
    commands: Vec<CommandDescription>,
}

/// Validated routing table produced by [`PluginRegistration::build`].
#[derive(Debug)]
pub struct PluginRoutes {
    pub information: PluginInformation,
    pub commands: Vec<CommandDescription>,
    pub endpoints: Vec<ApiEndpoint>,
}

impl PluginRegistration {
    pub fn new(plugin_id: PluginId, base_uri: Url, host: HostClient) -> Self {
        Self {
            plugin_id,
            base_uri,
            host,
            information: None,
            endpoints: Vec::new(),
            commands: Vec::new(),
        }
    }

    /// Id the plugin was launched as.
    pub fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    /// Address the plugin's listener is bound to.
    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    /// Client for calling the host.
    pub fn host(&self) -> &HostClient {
        &self.host
    }

    /// Declare the plugin's identity.
    ///
    /// Only the first call is accepted. Later calls fail and leave the first
    /// value in place.
    pub fn set_plugin_information(
        &mut self,
        information: PluginInformation,
    ) -> Result<&mut Self, RegistrationError> {
        if let Some(existing) = &self.information {
            return Err(RegistrationError::InformationAlreadySet(existing.id.clone()));
        }
        if information.id != self.plugin_id {
            return Err(RegistrationError::MismatchedId {
                expected: self.plugin_id.clone(),
                actual: information.id,
            });
        }
        self.information = Some(information);
        Ok(self)
    }

    /// Declare the plugin's identity from its launch id and base address.
    pub fn describe(
        &mut self,
        title: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<&mut Self, RegistrationError> {
        let information = PluginInformation::new(
            self.plugin_id.clone(),
            title,
            version,
            description,
            self.base_uri.clone(),
        );
        self.set_plugin_information(information)
    }

    /// Add every endpoint declared by `api`.
    pub fn register_http_api<A: PluginHttpApi>(&mut self, api: Arc<A>) -> &mut Self {
        for endpoint in api.endpoints() {
            if let Some(command) = &endpoint.command {
                self.commands.push(CommandDescription::new(
                    command.regex.clone(),
                    command.help.clone(),
                    normalize_path(&endpoint.path),
                ));
            }
            self.endpoints.push(endpoint);
        }
        self
    }

    /// Build an API with access to the host client, then register it.
    pub fn register_http_api_with<A, F>(&mut self, factory: F) -> &mut Self
    where
        A: PluginHttpApi,
        F: FnOnce(&HostClient) -> A,
    {
        let api = Arc::new(factory(&self.host));
        self.register_http_api(api)
    }

    /// Register commands not tied to an annotated endpoint.
    pub fn register_commands(
        &mut self,
        commands: impl IntoIterator<Item = CommandDescription>,
    ) -> &mut Self {
        self.commands.extend(commands);
        self
    }

    /// Validate and produce the routing table.
    pub fn build(self) -> Result<PluginRoutes, RegistrationError> {
        let information = self
            .information
            .ok_or(RegistrationError::MissingInformation)?;

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for mut endpoint in self.endpoints {
            let path = normalize_path(&endpoint.path);
            if path == "/" {
                return Err(RegistrationError::invalid_path(&endpoint.path, "empty"));
            }
            if path.starts_with(routes::plugin::RESERVED_PREFIX) {
                return Err(RegistrationError::invalid_path(
                    &endpoint.path,
                    "reserved for the adapter",
                ));
            }
            if path.contains(['{', '}', '*']) {
                return Err(RegistrationError::invalid_path(
                    &endpoint.path,
                    "wildcards are not supported",
                ));
            }
            if !seen.insert((endpoint.method, path.clone())) {
                return Err(RegistrationError::DuplicateEndpoint {
                    method: endpoint.method.to_string(),
                    path,
                });
            }
            endpoint.path = path;
            endpoints.push(endpoint);
        }

        let mut commands = Vec::with_capacity(self.commands.len());
        for mut command in self.commands {
            command.compile()?;
            command.endpoint = normalize_path(&command.endpoint);
            commands.push(command);
        }

        Ok(PluginRoutes {
            information,
            commands,
            endpoints,
        })
    }
}

fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim().trim_matches('/'))
}
