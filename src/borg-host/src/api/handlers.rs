//! Host API handlers.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use borg_plugin_api::{
    LogLevel, LogMessage, PluginId, PluginInformation, PluginInstallRequest, RegistrationRequest,
    SettingKey, SettingValue, TenantMessage,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::auth::PluginIdentity;
use crate::error::{AppError, AppResult};
use crate::manager::PluginManager;

/// Host liveness.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub plugins: usize,
}

pub async fn health(State(manager): State<PluginManager>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        plugins: manager.loaded_ids().len(),
    })
}

// ========== Configuration and settings ==========

pub async fn get_configuration(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Path(key): Path<String>,
) -> AppResult<Json<SettingValue>> {
    let key = SettingKey::new(key)?;
    manager
        .configuration()
        .get(&identity.plugin_id, &key)
        .map(|value| Json(SettingValue { value }))
        .ok_or_else(|| AppError::NotFound(format!("configuration '{}'", key.as_str())))
}

pub async fn get_setting(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Path(key): Path<String>,
) -> AppResult<Json<SettingValue>> {
    let key = SettingKey::new(key)?;
    manager
        .settings()
        .get(&identity.plugin_id, &key)
        .await?
        .map(|value| Json(SettingValue { value }))
        .ok_or_else(|| AppError::NotFound(format!("setting '{}'", key.as_str())))
}

pub async fn set_setting(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Path(key): Path<String>,
    Json(body): Json<SettingValue>,
) -> AppResult<StatusCode> {
    let key = SettingKey::new(key)?;
    if body.value.is_empty() {
        return Err(AppError::BadRequest("setting value must not be empty".to_string()));
    }
    manager
        .settings()
        .set(&identity.plugin_id, &key, body.value)
        .await?;
    debug!(plugin = %identity.plugin_id, key = key.as_str(), "Stored setting");
    Ok(StatusCode::NO_CONTENT)
}

// ========== Messages ==========

pub async fn send_message(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Json(message): Json<TenantMessage>,
) -> AppResult<StatusCode> {
    if message.text.is_empty() {
        return Err(AppError::Validation("message text must not be empty".to_string()));
    }
    debug!(
        plugin = %identity.plugin_id,
        tenant = %message.address.tenant_key,
        "Sending message for plugin"
    );
    manager.messages().send(&message).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn write_log(
    Extension(identity): Extension<PluginIdentity>,
    Json(log): Json<LogMessage>,
) -> StatusCode {
    let plugin = identity.plugin_id.as_str();
    let message = log.message.as_str();
    match log.level {
        LogLevel::Trace => trace!(plugin, "{message}"),
        LogLevel::Debug => debug!(plugin, "{message}"),
        LogLevel::Info => info!(plugin, "{message}"),
        LogLevel::Warn => warn!(plugin, "{message}"),
        LogLevel::Error => tracing::error!(plugin, "{message}"),
    }
    StatusCode::NO_CONTENT
}

// ========== Plugins ==========

pub async fn list_plugins(State(manager): State<PluginManager>) -> Json<Vec<PluginInformation>> {
    Json(manager.list_plugins().await)
}

pub async fn unload_plugin(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let plugin_id = PluginId::new(id)?;
    info!(plugin = %plugin_id, requested_by = %identity.plugin_id, "Unload requested");
    manager.unload_plugin(&plugin_id).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn install_plugin(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Json(request): Json<PluginInstallRequest>,
) -> AppResult<Json<PluginInformation>> {
    info!(uri = %request.uri, requested_by = %identity.plugin_id, "Install requested");
    // A caller that goes away drops this future, which releases the install.
    let cancel = CancellationToken::new();
    let information = manager.install_plugin(&request.uri, &cancel).await?;
    Ok(Json(information))
}

/// Adapter pushes its capability table once its start routine finished.
pub async fn register_plugin(
    State(manager): State<PluginManager>,
    Extension(identity): Extension<PluginIdentity>,
    Json(request): Json<RegistrationRequest>,
) -> AppResult<StatusCode> {
    if request.information.id != identity.plugin_id {
        return Err(AppError::Validation(format!(
            "registration for '{}' sent with credential of '{}'",
            request.information.id, identity.plugin_id
        )));
    }
    for command in &request.commands {
        command.compile()?;
    }

    let commands = request.commands.len();
    if !manager.sessions().complete(&identity.token, request) {
        return Err(AppError::Conflict(format!(
            "no load of '{}' is waiting for a registration",
            identity.plugin_id
        )));
    }
    debug!(plugin = %identity.plugin_id, commands, "Registration received");
    Ok(StatusCode::NO_CONTENT)
}
