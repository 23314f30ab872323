//! Route paths of both HTTP surfaces.

/// Served by every plugin.
pub mod plugin {
    /// Prefix reserved for adapter routes.
    pub const RESERVED_PREFIX: &str = "/_plugin/";
    pub const PING: &str = "/_plugin/ping";
    pub const INFORMATION: &str = "/_plugin/plugin-information";
    pub const COMMANDS: &str = "/_plugin/commands";
}

/// Served by the host, called by plugins.
pub mod host {
    pub const CONFIGURATION: &str = "/api/plugin-configuration/{key}";
    pub const SETTINGS: &str = "/api/settings/{key}";
    pub const TENANT_MESSAGES: &str = "/api/tenant-messages";
    pub const PLUGINS: &str = "/api/plugins";
    pub const PLUGIN_UNLOAD: &str = "/api/plugins/{id}/unload";
    pub const PLUGIN_INSTALLS_BY_URI: &str = "/api/plugin-installs/by-uri";
    pub const PLUGIN_REGISTRATIONS: &str = "/api/plugin-registrations";
    pub const LOGS: &str = "/api/logs";

    /// Fill a `{param}` placeholder of a route template.
    pub fn path(template: &str, param: &str) -> String {
        match (template.find('{'), template.find('}')) {
            (Some(start), Some(end)) if start < end => {
                format!("{}{}{}", &template[..start], param, &template[end + 1..])
            }
            _ => template.to_string(),
        }
    }
}
