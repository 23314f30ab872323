//! Isolation boundaries: independently failing execution contexts that each
//! host one plugin.
//!
//! - [`ProcessBoundary`]: a child OS process (the default for plugin binaries)
//! - [`TaskBoundary`]: a supervised task inside the host (built-in plugins)

mod process;
mod task;

pub use process::{ProcessBoundary, ProcessBoundaryFactory};
pub use task::{BootstrapperFactory, TaskBoundary, TaskBoundaryFactory};

use std::fmt;

use async_trait::async_trait;
use borg_plugin_api::{CONFIGURATION_EXIT_CODE, PluginEnvironment, PluginId, PluginPath};
use tokio::sync::watch;

use crate::error::{PluginError, Result};

/// What to launch inside a new boundary.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Variables the adapter needs to reach the host.
    pub environment: PluginEnvironment,
    /// Plugin executable, when the boundary runs one.
    pub binary: Option<PluginPath>,
}

impl LaunchSpec {
    pub fn plugin_id(&self) -> &PluginId {
        &self.environment.plugin_id
    }
}

/// Why a boundary stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryExit {
    /// The plugin stopped on its own.
    Exited {
        code: Option<i32>,
        /// Last line the plugin wrote to stderr, if any.
        detail: Option<String>,
    },
    /// The host destroyed the boundary.
    Destroyed,
    /// The boundary's supervisor failed.
    Failed(String),
}

impl BoundaryExit {
    /// Translate an exit observed during load into an error.
    pub fn into_load_error(self, plugin_id: &PluginId) -> PluginError {
        match self {
            Self::Exited {
                code: Some(CONFIGURATION_EXIT_CODE),
                detail,
            } => PluginError::configuration(
                plugin_id,
                detail.unwrap_or_else(|| "plugin reported a configuration error".to_string()),
            ),
            Self::Exited { code, detail } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                let message = match detail {
                    Some(detail) => format!("exited during startup ({code}): {detail}"),
                    None => format!("exited during startup ({code})"),
                };
                PluginError::load_error(plugin_id, message)
            }
            Self::Destroyed => PluginError::load_error(plugin_id, "boundary was destroyed"),
            Self::Failed(message) => PluginError::load_error(plugin_id, message),
        }
    }
}

impl fmt::Display for BoundaryExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code), .. } => write!(f, "exited with code {code}"),
            Self::Exited { code: None, .. } => write!(f, "terminated by signal"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Failed(message) => write!(f, "failed: {message}"),
        }
    }
}

/// A running boundary.
#[async_trait]
pub trait IsolationBoundary: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// OS process id, for boundaries backed by a process.
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Whether the hosted code is still running.
    fn is_alive(&self) -> bool;

    /// Resolves once the hosted code has stopped.
    async fn wait_exit(&self) -> BoundaryExit;

    /// Stop the hosted code and release the boundary's resources.
    ///
    /// Safe to call more than once.
    async fn destroy(&self);
}

/// Creates boundaries.
#[async_trait]
pub trait BoundaryFactory: Send + Sync {
    async fn create(&self, spec: LaunchSpec) -> Result<Box<dyn IsolationBoundary>>;
}

/// Exit slot shared between a boundary and its supervisor task.
#[derive(Debug, Clone)]
pub(crate) struct ExitWatch(watch::Receiver<Option<BoundaryExit>>);

impl ExitWatch {
    pub(crate) fn new() -> (watch::Sender<Option<BoundaryExit>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self(rx))
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub(crate) async fn wait(&self) -> BoundaryExit {
        let mut rx = self.0.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit
                .clone()
                .unwrap_or_else(|| BoundaryExit::Failed("exit not recorded".to_string())),
            Err(_) => BoundaryExit::Failed("supervisor stopped".to_string()),
        }
    }
}
