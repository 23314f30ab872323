//! Message pump: tenant messages in, processors tried in order.
//!
//! Every message runs as its own tracked task. A failing or panicking
//! handler is logged and answered; it never stops the receive loop.

use std::sync::Arc;

use async_trait::async_trait;
use borg_plugin_api::{ProcessMessageResult, TenantMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::tenants::MessageService;

/// One stage of message handling.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        message: &TenantMessage,
        cancel: &CancellationToken,
    ) -> Result<ProcessMessageResult>;
}

/// Routes tenant messages through the processors.
pub struct Collective {
    processors: Vec<Arc<dyn MessageProcessor>>,
    messages: Arc<MessageService>,
    tracker: TaskTracker,
}

impl Collective {
    pub fn new(processors: Vec<Arc<dyn MessageProcessor>>, messages: Arc<MessageService>) -> Self {
        Self {
            processors,
            messages,
            tracker: TaskTracker::new(),
        }
    }

    /// Handle messages from `inbox` until it closes or `shutdown` fires,
    /// then wait for in-flight messages.
    pub async fn run(&self, mut inbox: mpsc::Receiver<TenantMessage>, shutdown: CancellationToken) {
        info!(processors = self.processors.len(), "Collective started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                message = inbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.spawn(message, shutdown.child_token());
        }

        self.tracker.close();
        debug!(in_flight = self.tracker.len(), "Waiting for in-flight messages");
        self.tracker.wait().await;
        info!("Collective stopped");
    }

    fn spawn(&self, message: TenantMessage, cancel: CancellationToken) {
        let processors = self.processors.clone();
        let messages = self.messages.clone();
        let handler = {
            let message = message.clone();
            tokio::spawn(async move { handle(&processors, &message, &cancel).await })
        };

        self.tracker.spawn(async move {
            let failure = match handler.await {
                Ok(Ok(result)) => {
                    debug!(result = ?result, "Message processed");
                    None
                }
                Ok(Err(e)) => {
                    warn!(error = %e, text = %message.text, "Message handling failed");
                    Some(e.to_string())
                }
                Err(e) if e.is_panic() => {
                    error!(text = %message.text, "Message handler panicked");
                    Some("internal error".to_string())
                }
                Err(e) => {
                    warn!(error = %e, "Message handler was aborted");
                    None
                }
            };

            if let Some(reason) = failure {
                reply_failure(&messages, &message, &reason).await;
            }
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

async fn handle(
    processors: &[Arc<dyn MessageProcessor>],
    message: &TenantMessage,
    cancel: &CancellationToken,
) -> Result<ProcessMessageResult> {
    for processor in processors {
        if processor.process(message, cancel).await?.is_handled() {
            debug!(processor = processor.name(), "Message handled");
            return Ok(ProcessMessageResult::Handled);
        }
    }
    Ok(ProcessMessageResult::Skipped)
}

async fn reply_failure(messages: &MessageService, message: &TenantMessage, reason: &str) {
    let reply = match message.create_reply(format!("Sorry, something went wrong: {reason}"), Vec::new()) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Could not build failure reply");
            return;
        }
    };
    if let Err(e) = messages.send(&reply).await {
        warn!(error = %e, "Could not deliver failure reply");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::PluginError;
    use crate::tenants::Tenant;
    use borg_plugin_api::{Address, TenantKey};
    use tokio::sync::Mutex;

    struct RecordingTenant {
        key: TenantKey,
        sent: Mutex<Vec<TenantMessage>>,
    }

    #[async_trait]
    impl Tenant for RecordingTenant {
        fn key(&self) -> &TenantKey {
            &self.key
        }

        async fn send(&self, message: &TenantMessage) -> anyhow::Result<()> {
            self.sent.lock().await.push(message.clone());
            Ok(())
        }

        async fn connect(
            &self,
            _inbox: mpsc::Sender<TenantMessage>,
            _shutdown: CancellationToken,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    enum Behaviour {
        Handle,
        Skip,
        Fail,
        Panic,
    }

    struct Stage {
        name: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl Stage {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MessageProcessor for Stage {
        fn name(&self) -> &str {
            self.name
        }

        async fn process(
            &self,
            message: &TenantMessage,
            _cancel: &CancellationToken,
        ) -> Result<ProcessMessageResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Handle => Ok(ProcessMessageResult::Handled),
                Behaviour::Skip => Ok(ProcessMessageResult::Skipped),
                Behaviour::Fail => Err(PluginError::dispatch("broken", "connection refused")),
                Behaviour::Panic => panic!("handler exploded on '{}'", message.text),
            }
        }
    }

    fn message(text: &str) -> TenantMessage {
        TenantMessage::new(text, Address::new("u", "c", TenantKey::new("test"))).unwrap()
    }

    async fn pump(stages: &[&Arc<Stage>], texts: &[&str]) -> Arc<RecordingTenant> {
        let processors: Vec<Arc<dyn MessageProcessor>> = stages
            .iter()
            .map(|stage| Arc::clone(stage) as Arc<dyn MessageProcessor>)
            .collect();
        let tenant = Arc::new(RecordingTenant {
            key: TenantKey::new("test"),
            sent: Mutex::new(Vec::new()),
        });
        let messages = Arc::new(MessageService::new().with_tenant(tenant.clone()));
        let collective = Collective::new(processors, messages);

        let (tx, rx) = mpsc::channel(16);
        for text in texts {
            tx.send(message(text)).await.unwrap();
        }
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), collective.run(rx, CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(collective.in_flight(), 0);
        tenant
    }

    #[tokio::test]
    async fn test_stops_at_first_handler() {
        let first = Stage::new("first", Behaviour::Skip);
        let second = Stage::new("second", Behaviour::Handle);
        let third = Stage::new("third", Behaviour::Handle);

        let tenant = pump(&[&first, &second, &third], &["hi"]).await;

        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.calls.load(Ordering::SeqCst), 0);
        assert!(tenant.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_answered_and_loop_continues() {
        let stage = Stage::new("broken", Behaviour::Fail);

        let tenant = pump(&[&stage], &["one", "two"]).await;

        assert_eq!(stage.calls.load(Ordering::SeqCst), 2);
        let sent = tenant.sent.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.starts_with("Sorry, something went wrong"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let panicky = Stage::new("panicky", Behaviour::Panic);

        let tenant = pump(&[&panicky], &["boom", "again"]).await;

        assert_eq!(panicky.calls.load(Ordering::SeqCst), 2);
        assert_eq!(tenant.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_receiving() {
        let stage = Stage::new("stage", Behaviour::Handle);
        let messages = Arc::new(MessageService::new());
        let collective = Collective::new(vec![stage as Arc<dyn MessageProcessor>], messages);
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), collective.run(rx, shutdown))
            .await
            .unwrap();
    }
}
