//! In-process boundary for plugins compiled into the host.
//!
//! The plugin runs the same adapter a plugin executable runs, inside its own
//! tokio task with its own loopback listener. A panic stays inside the task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use borg_plugin_api::CONFIGURATION_EXIT_CODE;
use borg_plugin_sdk::{AdapterError, PluginBootstrapper};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BoundaryExit, BoundaryFactory, ExitWatch, IsolationBoundary, LaunchSpec};
use crate::error::Result;

/// Produces the bootstrapper candidates for one launch.
pub type BootstrapperFactory = Arc<dyn Fn() -> Vec<Box<dyn PluginBootstrapper>> + Send + Sync>;

/// Runs plugins as supervised tasks of the host process.
#[derive(Clone)]
pub struct TaskBoundaryFactory {
    bootstrappers: BootstrapperFactory,
    client: reqwest::Client,
    grace: Duration,
}

impl TaskBoundaryFactory {
    pub fn new<F>(bootstrappers: F, client: reqwest::Client, grace: Duration) -> Self
    where
        F: Fn() -> Vec<Box<dyn PluginBootstrapper>> + Send + Sync + 'static,
    {
        Self {
            bootstrappers: Arc::new(bootstrappers),
            client,
            grace,
        }
    }
}

#[async_trait]
impl BoundaryFactory for TaskBoundaryFactory {
    async fn create(&self, spec: LaunchSpec) -> Result<Box<dyn IsolationBoundary>> {
        let name = spec.plugin_id().to_string();
        let kill = CancellationToken::new();

        let mut handle = tokio::spawn(borg_plugin_sdk::serve(
            spec.environment,
            (self.bootstrappers)(),
            self.client.clone(),
            kill.clone().cancelled_owned(),
        ));

        let (exit_tx, exit) = ExitWatch::new();
        let grace = self.grace;
        let supervisor_kill = kill.clone();
        let supervisor_name = name.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                result = &mut handle => task_exit(result),
                _ = supervisor_kill.cancelled() => {
                    if tokio::time::timeout(grace, &mut handle).await.is_err() {
                        warn!(plugin = %supervisor_name, "Plugin task did not stop in time, aborting it");
                        handle.abort();
                    }
                    BoundaryExit::Destroyed
                }
            };
            let _ = exit_tx.send(Some(outcome));
        });

        debug!(plugin = %name, "Started plugin task");
        Ok(Box::new(TaskBoundary { name, kill, exit }))
    }
}

/// A plugin running as a task of the host.
pub struct TaskBoundary {
    name: String,
    kill: CancellationToken,
    exit: ExitWatch,
}

#[async_trait]
impl IsolationBoundary for TaskBoundary {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_alive(&self) -> bool {
        !self.exit.has_exited()
    }

    async fn wait_exit(&self) -> BoundaryExit {
        self.exit.wait().await
    }

    async fn destroy(&self) {
        self.kill.cancel();
        let exit = self.exit.wait().await;
        debug!(plugin = %self.name, %exit, "Plugin task stopped");
    }
}

impl Drop for TaskBoundary {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

fn task_exit(result: std::result::Result<borg_plugin_sdk::Result<()>, JoinError>) -> BoundaryExit {
    match result {
        Ok(Ok(())) => BoundaryExit::Exited {
            code: Some(0),
            detail: None,
        },
        Ok(Err(e)) => BoundaryExit::Exited {
            code: Some(exit_code(&e)),
            detail: Some(e.to_string()),
        },
        Err(e) if e.is_panic() => BoundaryExit::Failed("plugin task panicked".to_string()),
        Err(_) => BoundaryExit::Destroyed,
    }
}

fn exit_code(error: &AdapterError) -> i32 {
    if error.is_configuration() {
        CONFIGURATION_EXIT_CODE
    } else {
        1
    }
}
