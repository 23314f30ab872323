//! HTTP surface plugins call back into.
//!
//! Everything under `/api` requires the calling plugin's token; `/health`
//! is open.

mod auth;
mod handlers;

pub use auth::{PluginIdentity, parse_plugin_token};

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use borg_plugin_api::routes::host;
use tower_http::trace::TraceLayer;

use crate::manager::PluginManager;

/// Build the host API router.
pub fn router(manager: PluginManager) -> Router {
    let api = Router::new()
        .route(host::CONFIGURATION, get(handlers::get_configuration))
        .route(
            host::SETTINGS,
            get(handlers::get_setting)
                .post(handlers::set_setting)
                .put(handlers::set_setting),
        )
        .route(host::TENANT_MESSAGES, post(handlers::send_message))
        .route(host::PLUGINS, get(handlers::list_plugins))
        .route(host::PLUGIN_UNLOAD, post(handlers::unload_plugin))
        .route(host::PLUGIN_INSTALLS_BY_URI, post(handlers::install_plugin))
        .route(host::PLUGIN_REGISTRATIONS, post(handlers::register_plugin))
        .route(host::LOGS, post(handlers::write_log))
        .route_layer(middleware::from_fn_with_state(
            manager.clone(),
            auth::require_plugin,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use borg_plugin_api::{PluginId, PluginInformation};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::config::HostConfig;
    use crate::manager::HostServices;

    fn manager(root: &TempDir) -> PluginManager {
        let config = HostConfig {
            install_root: root.path().join("plugins"),
            data_dir: root.path().to_path_buf(),
            ..HostConfig::default()
        };
        let services = HostServices::new(&config, reqwest::Client::new());
        PluginManager::new(config, services)
    }

    fn authorized(uri: &str, token: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("plugin.id {token}"))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let root = TempDir::new().unwrap();
        let app = router(manager(&root));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_known_token() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        let token = manager.sessions().issue(&PluginId::new("echo").unwrap());
        let app = router(manager.clone());

        let anonymous = app
            .clone()
            .oneshot(Request::get("/api/plugins").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let listed = app
            .clone()
            .oneshot(authorized("/api/plugins", token.as_str()))
            .await
            .unwrap();
        assert_eq!(listed.status(), StatusCode::OK);
        let body = to_bytes(listed.into_body(), usize::MAX).await.unwrap();
        let plugins: Vec<PluginInformation> = serde_json::from_slice(&body).unwrap();
        assert!(plugins.is_empty());

        manager.sessions().revoke(&token);
        let revoked = app
            .oneshot(authorized("/api/plugins", token.as_str()))
            .await
            .unwrap();
        assert_eq!(revoked.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_configuration_is_not_found() {
        let root = TempDir::new().unwrap();
        let manager = manager(&root);
        let token = manager.sessions().issue(&PluginId::new("echo").unwrap());

        let response = router(manager)
            .oneshot(authorized("/api/plugin-configuration/api-key", token.as_str()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
