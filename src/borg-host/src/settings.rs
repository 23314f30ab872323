//! Read-only plugin configuration and per-plugin settings storage.
//!
//! Keys are scoped as `"{plugin_id}:{key}"` so plugins never see each
//! other's values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use borg_plugin_api::{PluginId, SettingKey};
use dashmap::DashMap;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{PluginError, Result};

/// Operator-provided values plugins may read but not change.
pub trait ConfigurationReader: Send + Sync {
    fn get(&self, plugin_id: &PluginId, key: &SettingKey) -> Option<String>;
}

/// Configuration from a fixed map of scoped keys.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigurationReader {
    values: BTreeMap<String, String>,
}

impl StaticConfigurationReader {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

impl ConfigurationReader for StaticConfigurationReader {
    fn get(&self, plugin_id: &PluginId, key: &SettingKey) -> Option<String> {
        self.values.get(&key.scoped(plugin_id)).cloned()
    }
}

/// Mutable per-plugin key/value storage.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, plugin_id: &PluginId, key: &SettingKey) -> Result<Option<String>>;
    async fn set(&self, plugin_id: &PluginId, key: &SettingKey, value: String) -> Result<()>;
}

/// Settings that live as long as the host process.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: DashMap<String, String>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, plugin_id: &PluginId, key: &SettingKey) -> Result<Option<String>> {
        Ok(self
            .values
            .get(&key.scoped(plugin_id))
            .map(|v| v.value().clone()))
    }

    async fn set(&self, plugin_id: &PluginId, key: &SettingKey, value: String) -> Result<()> {
        self.values.insert(key.scoped(plugin_id), value);
        Ok(())
    }
}

/// Settings persisted to a JSON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettingsStore {
    /// Open the store at `path`. A missing file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                PluginError::Settings(format!("corrupt settings file {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened settings store");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, plugin_id: &PluginId, key: &SettingKey) -> Result<Option<String>> {
        Ok(self.values.lock().await.get(&key.scoped(plugin_id)).cloned())
    }

    async fn set(&self, plugin_id: &PluginId, key: &SettingKey, value: String) -> Result<()> {
        let mut values = self.values.lock().await;
        let scoped = key.scoped(plugin_id);
        let previous = values.insert(scoped.clone(), value);

        let content = serde_json::to_string_pretty(&*values)
            .map_err(|e| PluginError::Settings(e.to_string()))?;
        if let Err(e) = atomic_write(&self.path, content.as_bytes()).await {
            match previous {
                Some(previous) => values.insert(scoped, previous),
                None => values.remove(&scoped),
            };
            return Err(e.into());
        }
        Ok(())
    }
}

async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).await?;

    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("settings"),
        std::process::id()
    ));
    fs::write(&temp_path, content).await?;
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(value: &str) -> PluginId {
        PluginId::new(value).unwrap()
    }

    fn key(value: &str) -> SettingKey {
        SettingKey::new(value).unwrap()
    }

    #[test]
    fn test_static_configuration_is_scoped() {
        let mut values = BTreeMap::new();
        values.insert("status:greeting".to_string(), "hi".to_string());
        let reader = StaticConfigurationReader::new(values);

        assert_eq!(reader.get(&id("status"), &key("greeting")).as_deref(), Some("hi"));
        assert_eq!(reader.get(&id("echo"), &key("greeting")), None);
    }

    #[tokio::test]
    async fn test_memory_store_isolates_plugins() {
        let store = MemorySettingsStore::new();
        store.set(&id("a"), &key("k"), "1".into()).await.unwrap();

        assert_eq!(store.get(&id("a"), &key("k")).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get(&id("b"), &key("k")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = FileSettingsStore::open(&path).await.unwrap();
        store
            .set(&id("status"), &key("last-ping-message"), "hello".into())
            .await
            .unwrap();
        drop(store);

        let reopened = FileSettingsStore::open(&path).await.unwrap();
        assert_eq!(
            reopened
                .get(&id("status"), &key("last-ping-message"))
                .await
                .unwrap()
                .as_deref(),
            Some("hello")
        );
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("status:last-ping-message"));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileSettingsStore::open(&path).await.unwrap_err();
        assert!(matches!(err, PluginError::Settings(_)));
    }
}
