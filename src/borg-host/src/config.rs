//! Host configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Address of the HTTP surface plugins call (port 0 picks a free port).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Directory plugin packages are installed into.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Directory for host state such as persisted settings.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Run plugins from a private copy of their directory.
    #[serde(default = "default_true")]
    pub shadow_copy: bool,

    /// Persist plugin settings to `data_dir/settings.json`.
    #[serde(default = "default_true")]
    pub persist_settings: bool,

    /// Timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Built-in plugins to load at startup.
    #[serde(default = "default_builtin_plugins")]
    pub builtin_plugins: Vec<String>,

    /// Extra plugin executables to load at startup.
    #[serde(default)]
    pub plugins: Vec<PathBuf>,

    /// Plugin configuration values keyed by `"{plugin-id}:{key}"`.
    #[serde(default)]
    pub plugin_configuration: BTreeMap<String, String>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:0".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("borg"))
        .unwrap_or_else(|| PathBuf::from(".borg"))
}

fn default_install_root() -> PathBuf {
    default_data_dir().join("plugins")
}

fn default_builtin_plugins() -> Vec<String> {
    vec!["help".to_string(), "plugins".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            install_root: default_install_root(),
            data_dir: default_data_dir(),
            shadow_copy: true,
            persist_settings: true,
            timeouts: TimeoutConfig::default(),
            builtin_plugins: default_builtin_plugins(),
            plugins: Vec::new(),
            plugin_configuration: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override fields from `BORG_*` variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(addr) = lookup("BORG_LISTEN_ADDR") {
            self.listen_addr = addr;
        }

        if let Some(root) = lookup("BORG_INSTALL_ROOT") {
            self.install_root = PathBuf::from(root);
        }

        if let Some(dir) = lookup("BORG_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Some(shadow) = lookup("BORG_SHADOW_COPY") {
            self.shadow_copy = shadow.parse()?;
        }

        if let Some(level) = lookup("BORG_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(secs) = lookup("BORG_LOAD_TIMEOUT") {
            self.timeouts.load = secs.parse()?;
        }

        Ok(())
    }

    /// Path of the persisted settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }
}

/// Timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// From launch until the plugin has registered and answered a ping.
    #[serde(default = "default_load_timeout")]
    pub load: u64,

    /// Single host to plugin metadata call.
    #[serde(default = "default_ping_timeout")]
    pub ping: u64,

    /// Forwarding one message to a plugin endpoint.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch: u64,

    /// Per-plugin answer while listing plugins.
    #[serde(default = "default_list_timeout")]
    pub list: u64,

    /// Grace period a destroyed plugin gets before it is killed.
    #[serde(default = "default_destroy_grace")]
    pub destroy_grace: u64,

    /// Graceful shutdown of the host.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown: u64,
}

fn default_load_timeout() -> u64 {
    30
}

fn default_ping_timeout() -> u64 {
    5
}

fn default_dispatch_timeout() -> u64 {
    60
}

fn default_list_timeout() -> u64 {
    5
}

fn default_destroy_grace() -> u64 {
    3
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            load: default_load_timeout(),
            ping: default_ping_timeout(),
            dispatch: default_dispatch_timeout(),
            list: default_list_timeout(),
            destroy_grace: default_destroy_grace(),
            shutdown: default_shutdown_timeout(),
        }
    }
}

impl TimeoutConfig {
    pub fn load_duration(&self) -> Duration {
        Duration::from_secs(self.load)
    }

    pub fn ping_duration(&self) -> Duration {
        Duration::from_secs(self.ping)
    }

    pub fn dispatch_duration(&self) -> Duration {
        Duration::from_secs(self.dispatch)
    }

    pub fn list_duration(&self) -> Duration {
        Duration::from_secs(self.list)
    }

    pub fn destroy_grace_duration(&self) -> Duration {
        Duration::from_secs(self.destroy_grace)
    }

    pub fn shutdown_duration(&self) -> Duration {
        Duration::from_secs(self.shutdown)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of pretty output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
