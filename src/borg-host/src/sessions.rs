//! Credentials issued to plugins, and registrations the host is waiting for.

use borg_plugin_api::{PluginId, RegistrationRequest, Token};
use dashmap::DashMap;
use tokio::sync::oneshot;

/// Tracks live plugin tokens and pending registrations.
#[derive(Default)]
pub struct SessionStore {
    tokens: DashMap<String, PluginId>,
    pending: DashMap<String, oneshot::Sender<RegistrationRequest>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token for `plugin_id` and accept it from now on.
    pub fn issue(&self, plugin_id: &PluginId) -> Token {
        let token = Token::new_for(plugin_id);
        self.tokens
            .insert(token.as_str().to_string(), plugin_id.clone());
        token
    }

    /// Issue a token that is revoked again unless the guard is committed.
    pub fn open(&self, plugin_id: &PluginId) -> SessionGuard<'_> {
        SessionGuard {
            store: self,
            token: self.issue(plugin_id),
            committed: false,
        }
    }

    /// Stop accepting `token`. Also drops any registration still pending.
    pub fn revoke(&self, token: &Token) {
        self.tokens.remove(token.as_str());
        self.pending.remove(token.as_str());
    }

    /// The plugin a presented credential belongs to.
    pub fn resolve(&self, token: &str) -> Option<PluginId> {
        self.tokens.get(token).map(|entry| entry.value().clone())
    }

    /// Wait for the plugin holding `token` to post its registration.
    pub fn expect_registration(&self, token: &Token) -> oneshot::Receiver<RegistrationRequest> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(token.as_str().to_string(), tx);
        rx
    }

    /// Hand a posted registration to the waiting loader.
    ///
    /// Returns `false` when nobody is waiting, e.g. the plugin registered
    /// twice or the load already gave up.
    pub fn complete(&self, token: &str, registration: RegistrationRequest) -> bool {
        match self.pending.remove(token) {
            Some((_, tx)) => tx.send(registration).is_ok(),
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.tokens.len()
    }
}

/// Token of a load in progress.
///
/// Dropping it uncommitted revokes the token, so an abandoned load leaves
/// no credential behind.
pub struct SessionGuard<'a> {
    store: &'a SessionStore,
    token: Token,
    committed: bool,
}

impl SessionGuard<'_> {
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Keep the token alive past the guard.
    pub fn commit(mut self) -> Token {
        self.committed = true;
        self.token.clone()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.store.revoke(&self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use borg_plugin_api::PluginInformation;
    use url::Url;

    fn registration(id: &PluginId) -> RegistrationRequest {
        RegistrationRequest {
            information: PluginInformation::new(
                id.clone(),
                "Echo",
                "1.0.0",
                "echo",
                Url::parse("http://127.0.0.1:9/").unwrap(),
            ),
            commands: Vec::new(),
        }
    }

    #[test]
    fn test_issue_resolve_revoke() {
        let store = SessionStore::new();
        let id = PluginId::new("echo").unwrap();
        let token = store.issue(&id);

        assert_eq!(token.plugin_id(), &id);
        assert_eq!(store.resolve(token.as_str()), Some(id.clone()));
        assert_eq!(store.resolve("bogus@echo"), None);

        store.revoke(&token);
        assert_eq!(store.resolve(token.as_str()), None);
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn test_tokens_are_unique_per_load() {
        let store = SessionStore::new();
        let id = PluginId::new("echo").unwrap();
        assert_ne!(store.issue(&id), store.issue(&id));
    }

    #[tokio::test]
    async fn test_registration_is_delivered_once() {
        let store = SessionStore::new();
        let id = PluginId::new("echo").unwrap();
        let token = store.issue(&id);
        let rx = store.expect_registration(&token);

        assert!(store.complete(token.as_str(), registration(&id)));
        assert!(!store.complete(token.as_str(), registration(&id)));
        assert_eq!(rx.await.unwrap().information.id, id);
    }

    #[test]
    fn test_revoke_cancels_pending_registration() {
        let store = SessionStore::new();
        let id = PluginId::new("echo").unwrap();
        let token = store.issue(&id);
        let _rx = store.expect_registration(&token);

        store.revoke(&token);
        assert!(!store.complete(token.as_str(), registration(&id)));
    }

    #[test]
    fn test_uncommitted_session_is_revoked() {
        let store = SessionStore::new();
        let id = PluginId::new("echo").unwrap();

        let abandoned = store.open(&id);
        let token = abandoned.token().as_str().to_string();
        let _pending = store.expect_registration(abandoned.token());
        assert_eq!(store.resolve(&token), Some(id.clone()));
        drop(abandoned);
        assert_eq!(store.resolve(&token), None);
        assert_eq!(store.active_count(), 0);

        let kept = store.open(&id).commit();
        assert_eq!(store.resolve(kept.as_str()), Some(id));
    }
}
