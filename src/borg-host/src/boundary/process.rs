//! Child-process boundary.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use borg_plugin_api::PluginPath;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{BoundaryExit, BoundaryFactory, ExitWatch, IsolationBoundary, LaunchSpec};
use crate::error::{PluginError, Result};

/// How long the supervisor waits for stderr to drain after the child exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Launches plugin executables as child processes.
#[derive(Debug, Clone)]
pub struct ProcessBoundaryFactory {
    shadow_copy: bool,
    destroy_grace: Duration,
}

impl ProcessBoundaryFactory {
    pub fn new(shadow_copy: bool, destroy_grace: Duration) -> Self {
        Self {
            shadow_copy,
            destroy_grace,
        }
    }
}

#[async_trait]
impl BoundaryFactory for ProcessBoundaryFactory {
    async fn create(&self, spec: LaunchSpec) -> Result<Box<dyn IsolationBoundary>> {
        let plugin_id = spec.plugin_id().clone();
        let binary = spec.binary.clone().ok_or_else(|| {
            PluginError::load_error(&plugin_id, "no executable to launch")
        })?;
        if !binary.path().is_file() {
            return Err(PluginError::load_error(
                &plugin_id,
                format!("executable '{binary}' does not exist"),
            ));
        }

        let shadow = if self.shadow_copy {
            Some(shadow_copy(&binary).await.map_err(|e| {
                PluginError::load_error(&plugin_id, format!("shadow copy failed: {e}"))
            })?)
        } else {
            None
        };
        let (program, working_dir) = match &shadow {
            Some((dir, program)) => (program.clone(), Some(dir.path().to_path_buf())),
            None => (
                binary.path().to_path_buf(),
                binary.directory().map(Path::to_path_buf),
            ),
        };

        let mut command = Command::new(&program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &working_dir {
            command.current_dir(dir);
        }
        for (key, value) in spec.environment.to_vars() {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            PluginError::load_error(&plugin_id, format!("failed to spawn '{}': {e}", program.display()))
        })?;
        let pid = child.id();
        info!(plugin = %plugin_id, pid = ?pid, program = %program.display(), "Started plugin process");

        let name = plugin_id.to_string();
        // `Child::wait` closes a stdin it still owns, which the adapter reads as "host gone".
        let control = child.stdin.take();
        let tail = Arc::new(Mutex::new(None));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| forward_stderr(name.clone(), stderr, tail.clone()));

        let kill = CancellationToken::new();
        let (exit_tx, exit) = ExitWatch::new();
        let supervisor = Supervisor {
            name: name.clone(),
            child,
            control,
            kill: kill.clone(),
            grace: self.destroy_grace,
            stderr_task,
            tail,
        };
        tokio::spawn(async move {
            let outcome = supervisor.run().await;
            let _ = exit_tx.send(Some(outcome));
        });

        Ok(Box::new(ProcessBoundary {
            name,
            pid,
            kill,
            exit,
            shadow: Mutex::new(shadow.map(|(dir, _)| dir)),
        }))
    }
}

/// A plugin running in a child process.
pub struct ProcessBoundary {
    name: String,
    pid: Option<u32>,
    kill: CancellationToken,
    exit: ExitWatch,
    shadow: Mutex<Option<TempDir>>,
}

#[async_trait]
impl IsolationBoundary for ProcessBoundary {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> Option<u32> {
        self.pid
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
        debug!(plugin = %self.name, %exit, "Plugin process stopped");
        let shadow = self.shadow.lock().take();
        if let Some(dir) = shadow {
            if let Err(e) = dir.close() {
                warn!(plugin = %self.name, error = %e, "Failed to remove shadow copy");
            }
        }
    }
}

impl Drop for ProcessBoundary {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

struct Supervisor {
    name: String,
    child: Child,
    control: Option<ChildStdin>,
    kill: CancellationToken,
    grace: Duration,
    stderr_task: Option<JoinHandle<()>>,
    tail: Arc<Mutex<Option<String>>>,
}

impl Supervisor {
    async fn run(mut self) -> BoundaryExit {
        let status = tokio::select! {
            status = self.child.wait() => status,
            _ = self.kill.cancelled() => {
                return self.stop().await;
            }
        };

        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
        }

        match status {
            Ok(status) => {
                let exit = exited(status, self.tail.lock().take());
                warn!(plugin = %self.name, %exit, "Plugin process exited");
                exit
            }
            Err(e) => BoundaryExit::Failed(format!("failed to wait for plugin process: {e}")),
        }
    }

    /// Close stdin so the adapter can stop cleanly, kill after the grace period.
    async fn stop(mut self) -> BoundaryExit {
        drop(self.control.take());
        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(plugin = %self.name, "Plugin did not stop in time, killing it");
                if let Err(e) = self.child.kill().await {
                    warn!(plugin = %self.name, error = %e, "Failed to kill plugin process");
                }
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        BoundaryExit::Destroyed
    }
}

fn exited(status: ExitStatus, detail: Option<String>) -> BoundaryExit {
    BoundaryExit::Exited {
        code: status.code(),
        detail,
    }
}

fn forward_stderr(
    name: String,
    stderr: ChildStderr,
    tail: Arc<Mutex<Option<String>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            info!(plugin = %name, "{}", line);
            *tail.lock() = Some(line.to_string());
        }
    })
}

/// Copy the plugin's directory into a private temp dir.
///
/// Returns the temp dir and the path of the executable inside it.
async fn shadow_copy(binary: &PluginPath) -> std::io::Result<(TempDir, PathBuf)> {
    let executable = binary.path().to_path_buf();
    let source = binary.directory().map(Path::to_path_buf);
    let file_name = executable
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"))?;

    tokio::task::spawn_blocking(move || -> std::io::Result<(TempDir, PathBuf)> {
        let target = tempfile::Builder::new().prefix("borg-plugin-").tempdir()?;
        match source {
            Some(source) => copy_tree(&source, target.path())?,
            None => {
                std::fs::copy(&executable, target.path().join(&file_name))?;
            }
        }
        let program = target.path().join(&file_name);
        Ok((target, program))
    })
    .await
    .map_err(std::io::Error::other)?
}

fn copy_tree(source: &Path, target: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}
