//! Borg plugin API - types shared by the host and the plugins it loads.
//!
//! Both sides of the isolation boundary speak JSON over loopback HTTP. This
//! crate holds everything that crosses that boundary:
//! - Identifiers ([`PluginId`], [`PluginPath`], [`Token`], [`TenantKey`])
//! - Plugin metadata ([`PluginInformation`], [`CommandDescription`])
//! - Chat messages ([`TenantMessage`]) and [`ProcessMessageResult`]
//! - The launch contract ([`PluginEnvironment`]) and route constants

pub mod environment;
pub mod error;
pub mod ids;
pub mod information;
pub mod install;
pub mod logging;
pub mod message;
pub mod routes;
pub mod settings;

pub use environment::{CONFIGURATION_EXIT_CODE, PluginEnvironment};
pub use error::{ApiError, Result};
pub use ids::{PluginId, PluginPath, TenantKey, Token};
pub use information::{CommandDescription, PluginInformation, RegistrationRequest};
pub use install::{PluginInstallRequest, PluginPackageType};
pub use logging::{LogLevel, LogMessage};
pub use message::{Address, Attachment, AttachmentProperty, ProcessMessageResult, TenantMessage};
pub use settings::{SettingKey, SettingValue};

/// Authorization scheme plugins use when calling the host.
pub const AUTHORIZATION_SCHEME: &str = "plugin.id";
