//! Plugin identity from the `Authorization: plugin.id <token>` header.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use borg_plugin_api::{AUTHORIZATION_SCHEME, PluginId};
use tracing::debug;

use crate::error::AppError;
use crate::manager::PluginManager;

/// The plugin a request was authenticated as.
#[derive(Debug, Clone)]
pub struct PluginIdentity {
    pub plugin_id: PluginId,
    pub token: String,
}

/// Extract the token from an `Authorization` header value.
pub fn parse_plugin_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case(AUTHORIZATION_SCHEME) {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Reject requests without a token the host issued.
pub async fn require_plugin(
    State(manager): State<PluginManager>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_plugin_token)
        .map(str::to_owned);

    let Some(token) = token else {
        return AppError::Authentication("missing plugin credential".to_string()).into_response();
    };
    let Some(plugin_id) = manager.sessions().resolve(&token) else {
        debug!(path = %request.uri().path(), "Rejected unknown plugin token");
        return AppError::Authentication("unknown plugin credential".to_string()).into_response();
    };

    request
        .extensions_mut()
        .insert(PluginIdentity { plugin_id, token });
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plugin_token() {
        assert_eq!(parse_plugin_token("plugin.id abc@echo"), Some("abc@echo"));
        assert_eq!(parse_plugin_token("PLUGIN.ID  abc@echo "), Some("abc@echo"));
        assert_eq!(parse_plugin_token("Bearer abc@echo"), None);
        assert_eq!(parse_plugin_token("plugin.id "), None);
        assert_eq!(parse_plugin_token("plugin.id"), None);
    }
}
