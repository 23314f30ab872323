//! Tenants: chat backends that deliver user messages and accept replies.

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

use async_trait::async_trait;
use borg_plugin_api::{Address, TenantKey, TenantMessage};
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PluginError, Result};

/// A chat backend.
#[async_trait]
pub trait Tenant: Send + Sync {
    fn key(&self) -> &TenantKey;

    /// Deliver an outgoing message to the backend.
    async fn send(&self, message: &TenantMessage) -> anyhow::Result<()>;

    /// Push incoming messages into `inbox` until the backend ends or
    /// `shutdown` fires.
    async fn connect(
        &self,
        inbox: mpsc::Sender<TenantMessage>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Routes outgoing messages to the tenant named in their address.
#[derive(Default)]
pub struct MessageService {
    tenants: HashMap<TenantKey, Arc<dyn Tenant>>,
}

impl MessageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant: Arc<dyn Tenant>) -> Self {
        self.register(tenant);
        self
    }

    pub fn register(&mut self, tenant: Arc<dyn Tenant>) {
        let key = tenant.key().clone();
        if self.tenants.insert(key.clone(), tenant).is_some() {
            warn!(tenant = %key, "Replaced existing tenant");
        }
    }

    pub fn tenant_keys(&self) -> Vec<TenantKey> {
        self.tenants.keys().cloned().collect()
    }

    pub async fn send(&self, message: &TenantMessage) -> Result<()> {
        let key = &message.address.tenant_key;
        let tenant = self
            .tenants
            .get(key)
            .ok_or_else(|| PluginError::NotFound(format!("tenant '{key}'")))?;
        tenant
            .send(message)
            .await
            .map_err(|e| PluginError::Dispatch {
                plugin: format!("tenant:{key}"),
                message: e.to_string(),
            })
    }

    /// Connect every tenant and wait until all of them stop.
    pub async fn connect_all(&self, inbox: mpsc::Sender<TenantMessage>, shutdown: CancellationToken) {
        let connections = self.tenants.values().map(|tenant| {
            let inbox = inbox.clone();
            let shutdown = shutdown.clone();
            async move {
                let key = tenant.key().clone();
                info!(tenant = %key, "Connecting tenant");
                if let Err(e) = tenant.connect(inbox, shutdown).await {
                    warn!(tenant = %key, error = %e, "Tenant connection failed");
                } else {
                    debug!(tenant = %key, "Tenant disconnected");
                }
            }
        });
        join_all(connections).await;
    }
}

type Lines = BoxStream<'static, std::io::Result<String>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-oriented tenant over an input and an output, stdio by default.
pub struct ConsoleTenant {
    key: TenantKey,
    user_id: String,
    input: Mutex<Option<Lines>>,
    output: Mutex<Writer>,
}

impl ConsoleTenant {
    pub const KEY: &'static str = "console";

    /// Console on the process's stdin and stdout.
    ///
    /// Stdin is read on a dedicated thread so a pending read never holds up
    /// runtime shutdown.
    pub fn stdio() -> Self {
        let (tx, rx) = mpsc::channel(16);
        let reader = std::thread::Builder::new()
            .name("console-stdin".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = reader {
            warn!(error = %e, "Could not start console reader");
        }
        let lines = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|line| (line, rx))
        });
        Self::from_parts(lines.boxed(), Box::new(tokio::io::stdout()))
    }

    pub fn with_io<R, W>(input: R, output: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let lines = stream::unfold(input.lines(), |mut lines| async move {
            lines.next_line().await.transpose().map(|line| (line, lines))
        });
        Self::from_parts(lines.boxed(), Box::new(output))
    }

    fn from_parts(input: Lines, output: Writer) -> Self {
        let user_id = std::env::var("USER").unwrap_or_else(|_| "console".to_string());
        Self {
            key: TenantKey::new(Self::KEY),
            user_id,
            input: Mutex::new(Some(input)),
            output: Mutex::new(output),
        }
    }

    fn address(&self) -> Address {
        Address::new(self.user_id.clone(), Self::KEY, self.key.clone())
    }
}

#[async_trait]
impl Tenant for ConsoleTenant {
    fn key(&self) -> &TenantKey {
        &self.key
    }

    async fn send(&self, message: &TenantMessage) -> anyhow::Result<()> {
        let mut rendered = format!("{}\n", message.text);
        for attachment in &message.attachments {
            for property in &attachment.properties {
                rendered.push_str(&format!("  {}: {}\n", property.key, property.value));
            }
        }
        let mut output = self.output.lock().await;
        output.write_all(rendered.as_bytes()).await?;
        output.flush().await?;
        Ok(())
    }

    async fn connect(
        &self,
        inbox: mpsc::Sender<TenantMessage>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let Some(mut lines) = self.input.lock().await.take() else {
            anyhow::bail!("console tenant is already connected");
        };
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next() => line,
            };
            let Some(line) = line else { break };
            let line = line?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            let message = TenantMessage::new(text, self.address())?;
            if inbox.send(message).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
