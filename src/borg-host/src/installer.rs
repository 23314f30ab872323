//! Plugin packages: download, unpack into the install root, enumerate.
//!
//! Layout: `<root>/<id>/<id><EXE_SUFFIX>` plus whatever else the package
//! carries next to the binary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use borg_plugin_api::{PluginId, PluginPackageType, PluginPath};
use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{PluginError, Result};

/// Where plugin packages are unpacked to and found again.
#[async_trait]
pub trait PluginInstaller: Send + Sync {
    /// Unpack a downloaded package and return the plugin binary path.
    async fn install(
        &self,
        plugin_id: &PluginId,
        package: &Path,
        package_type: PluginPackageType,
    ) -> Result<PluginPath>;

    /// Remove an installed plugin. Unknown ids are a no-op.
    async fn uninstall(&self, plugin_id: &PluginId) -> Result<()>;

    /// Binaries of every installed plugin.
    async fn installed_plugins(&self) -> Result<Vec<PluginPath>>;
}

/// Installs into one directory per plugin under a root.
#[derive(Debug, Clone)]
pub struct DirectoryInstaller {
    root: PathBuf,
}

impl DirectoryInstaller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn plugin_dir(&self, plugin_id: &PluginId) -> PathBuf {
        self.root.join(plugin_id.as_str())
    }
}

fn binary_name(dir_name: &str) -> String {
    format!("{dir_name}{}", std::env::consts::EXE_SUFFIX)
}

#[async_trait]
impl PluginInstaller for DirectoryInstaller {
    async fn install(
        &self,
        plugin_id: &PluginId,
        package: &Path,
        package_type: PluginPackageType,
    ) -> Result<PluginPath> {
        let PluginPackageType::Zip = package_type;
        let dest = self.plugin_dir(plugin_id);
        let binary = dest.join(binary_name(plugin_id.as_str()));
        let package = package.to_path_buf();

        let extracted = {
            let dest = dest.clone();
            let binary = binary.clone();
            tokio::task::spawn_blocking(move || -> Result<()> {
                if dest.exists() {
                    std::fs::remove_dir_all(&dest)?;
                }
                std::fs::create_dir_all(&dest)?;

                let file = std::fs::File::open(&package)?;
                let mut archive = zip::ZipArchive::new(file)
                    .map_err(|e| PluginError::Install(format!("unreadable package: {e}")))?;
                archive
                    .extract(&dest)
                    .map_err(|e| PluginError::Install(format!("extraction failed: {e}")))?;

                if !binary.is_file() {
                    let _ = std::fs::remove_dir_all(&dest);
                    return Err(PluginError::Install(format!(
                        "package does not contain {}",
                        binary
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default()
                    )));
                }
                Ok(())
            })
            .await
            .map_err(|e| PluginError::Install(format!("install task failed: {e}")))?
        };
        extracted?;

        info!(plugin = %plugin_id, path = %binary.display(), "Installed plugin package");
        Ok(PluginPath::new(binary))
    }

    async fn uninstall(&self, plugin_id: &PluginId) -> Result<()> {
        let dir = self.plugin_dir(plugin_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(plugin = %plugin_id, "Uninstalled plugin");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn installed_plugins(&self) -> Result<Vec<PluginPath>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let binary = entry.path().join(binary_name(&name));
            if binary.is_file() {
                found.push(PluginPath::new(binary));
            } else {
                debug!(dir = %entry.path().display(), "Skipping directory without plugin binary");
            }
        }
        found.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(found)
    }
}

/// Fetches packages over HTTP into temporary files.
#[derive(Debug, Clone)]
pub struct PackageDownloader {
    client: reqwest::Client,
}

impl PackageDownloader {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn download(&self, uri: &Url, cancel: &CancellationToken) -> Result<NamedTempFile> {
        tokio::select! {
            _ = cancel.cancelled() => Err(PluginError::Cancelled(format!("download of {uri}"))),
            result = self.fetch(uri) => result,
        }
    }

    async fn fetch(&self, uri: &Url) -> Result<NamedTempFile> {
        let response = self
            .client
            .get(uri.clone())
            .send()
            .await
            .map_err(|e| PluginError::Install(format!("download of {uri} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PluginError::Install(format!(
                "download of {uri} failed: HTTP {}",
                response.status()
            )));
        }

        let temp = NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(temp.reopen()?);
        let mut stream = response.bytes_stream();
        let mut downloaded = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| PluginError::Install(format!("download of {uri} failed: {e}")))?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len();
        }
        file.flush().await?;
        if downloaded == 0 {
            warn!(uri = %uri, "Downloaded package is empty");
        }
        debug!(uri = %uri, bytes = downloaded, "Downloaded plugin package");
        Ok(temp)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::write::SimpleFileOptions;

    fn package(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            let options = SimpleFileOptions::default().unix_permissions(0o755);
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            writer.finish().unwrap();
        }
        buffer.into_inner()
    }

    fn write_package(dir: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join("package.zip");
        std::fs::write(&path, package(entries)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_install_lays_out_plugin_directory() {
        let work = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let installer = DirectoryInstaller::new(root.path());
        let id = PluginId::new("status").unwrap();
        let binary = binary_name("status");
        let archive = write_package(
            work.path(),
            &[(binary.as_str(), b"#!/bin/sh\n"), ("README.md", b"docs")],
        );

        let installed = installer
            .install(&id, &archive, PluginPackageType::Zip)
            .await
            .unwrap();

        assert_eq!(installed.path(), root.path().join("status").join(&binary));
        assert!(root.path().join("status").join("README.md").is_file());
        assert_eq!(installer.installed_plugins().await.unwrap(), vec![installed]);
    }

    #[tokio::test]
    async fn test_install_without_binary_fails_clean() {
        let work = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let installer = DirectoryInstaller::new(root.path());
        let archive = write_package(work.path(), &[("other", b"x")]);

        let err = installer
            .install(&PluginId::new("status").unwrap(), &archive, PluginPackageType::Zip)
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::Install(_)));
        assert!(!root.path().join("status").exists());
    }

    #[tokio::test]
    async fn test_reinstall_replaces_previous_files() {
        let work = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let installer = DirectoryInstaller::new(root.path());
        let id = PluginId::new("status").unwrap();
        let binary = binary_name("status");

        let first = write_package(work.path(), &[(binary.as_str(), b"v1"), ("old.txt", b"old")]);
        installer.install(&id, &first, PluginPackageType::Zip).await.unwrap();
        let second = write_package(work.path(), &[(binary.as_str(), b"v2")]);
        installer.install(&id, &second, PluginPackageType::Zip).await.unwrap();

        assert!(!root.path().join("status").join("old.txt").exists());
    }

    #[tokio::test]
    async fn test_uninstall_and_listing() {
        let root = TempDir::new().unwrap();
        let installer = DirectoryInstaller::new(root.path());
        std::fs::create_dir_all(root.path().join("empty")).unwrap();
        std::fs::create_dir_all(root.path().join("echo")).unwrap();
        std::fs::write(root.path().join("echo").join(binary_name("echo")), b"x").unwrap();

        let installed = installer.installed_plugins().await.unwrap();
        assert_eq!(installed.len(), 1);
        assert_eq!(installed[0].plugin_id().unwrap().as_str(), "echo");

        installer.uninstall(&PluginId::new("echo").unwrap()).await.unwrap();
        installer.uninstall(&PluginId::new("ghost").unwrap()).await.unwrap();
        assert!(installer.installed_plugins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let installer = DirectoryInstaller::new("/nonexistent/borg/plugins");
        assert!(installer.installed_plugins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-bytes".to_vec()))
            .mount(&server)
            .await;

        let uri = Url::parse(&format!("{}/status.zip", server.uri())).unwrap();
        let file = PackageDownloader::new(reqwest::Client::new())
            .download(&uri, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"PK-bytes");
    }

    #[tokio::test]
    async fn test_download_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let uri = Url::parse(&format!("{}/missing.zip", server.uri())).unwrap();
        let err = PackageDownloader::new(reqwest::Client::new())
            .download(&uri, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Install(_)));
    }
}
