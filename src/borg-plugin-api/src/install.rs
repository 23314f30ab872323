//! Plugin package install requests.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ApiError, Result};

/// Supported package formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginPackageType {
    Zip,
}

impl PluginPackageType {
    /// Determine the package type from the source URI.
    ///
    /// Only the URI path is inspected, so this never touches the network.
    pub fn from_uri(uri: &Url) -> Result<Self> {
        let file_name = uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default();
        if file_name.len() > 4 && file_name.to_ascii_lowercase().ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            Err(ApiError::UnsupportedPackage(uri.to_string()))
        }
    }

    /// File name of the package without its extension.
    pub fn package_name(uri: &Url) -> Option<&str> {
        uri.path_segments()
            .and_then(|mut segments| segments.next_back())
            .and_then(|name| name.rsplit_once('.'))
            .map(|(stem, _)| stem)
            .filter(|stem| !stem.is_empty())
    }
}

/// Body of `POST /api/plugin-installs/by-uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInstallRequest {
    pub uri: Url,
}
