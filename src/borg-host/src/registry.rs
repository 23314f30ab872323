//! In-memory table of plugins by id.
//!
//! A slot moves `Loading -> Loaded -> Unloading -> (removed)`. Only
//! `Loaded` entries are visible to listing and dispatch, so a caller can never
//! observe a half-registered plugin.

use std::sync::Arc;

use borg_plugin_api::{CommandDescription, PluginId, PluginInformation, Token};
use indexmap::IndexMap;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;

use crate::error::{PluginError, Result};
use crate::proxy::PluginProxy;

/// A command with its pattern compiled once at load.
#[derive(Debug, Clone)]
pub struct CompiledCommand {
    pub description: CommandDescription,
    pub regex: Regex,
}

impl CompiledCommand {
    pub fn compile(description: CommandDescription) -> Result<Self> {
        let regex = description.compile()?;
        Ok(Self { description, regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Everything the host keeps about a running plugin.
pub struct LoadedPlugin {
    pub information: PluginInformation,
    pub commands: Vec<CompiledCommand>,
    pub proxy: PluginProxy,
    pub token: Token,
}

impl LoadedPlugin {
    pub fn id(&self) -> &PluginId {
        &self.information.id
    }
}

/// Externally visible lifecycle state of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Absent,
    Loading,
    Loaded,
    Unloading,
}

enum Slot {
    Loading,
    Loaded(Arc<LoadedPlugin>),
    Unloading,
}

/// Registry keyed by plugin id, preserving load order.
#[derive(Default)]
pub struct PluginRegistry {
    slots: RwLock<IndexMap<PluginId, Slot>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for loading.
    ///
    /// Fails with [`PluginError::Busy`] while another load or an unload of
    /// the same id is in flight.
    pub fn reserve(&self, id: &PluginId) -> Result<Reservation<'_>> {
        let mut slots = self.slots.write();
        match slots.get(id) {
            Some(Slot::Loaded(_)) => Err(PluginError::AlreadyLoaded(id.clone())),
            Some(Slot::Loading | Slot::Unloading) => Err(PluginError::Busy(id.clone())),
            None => {
                slots.insert(id.clone(), Slot::Loading);
                Ok(Reservation {
                    registry: self,
                    id: id.clone(),
                    committed: false,
                })
            }
        }
    }

    /// Move a loaded plugin to `Unloading` and hand it to the caller.
    pub fn begin_unload(&self, id: &PluginId) -> Option<Arc<LoadedPlugin>> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(id)?;
        match std::mem::replace(slot, Slot::Unloading) {
            Slot::Loaded(plugin) => Some(plugin),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Drop the entry for an id whose unload has finished.
    pub fn finish_unload(&self, id: &PluginId) {
        let mut slots = self.slots.write();
        if matches!(slots.get(id), Some(Slot::Unloading)) {
            slots.shift_remove(id);
        }
    }

    pub fn get(&self, id: &PluginId) -> Option<Arc<LoadedPlugin>> {
        match self.slots.read().get(id) {
            Some(Slot::Loaded(plugin)) => Some(plugin.clone()),
            _ => None,
        }
    }

    pub fn state(&self, id: &PluginId) -> PluginState {
        match self.slots.read().get(id) {
            None => PluginState::Absent,
            Some(Slot::Loading) => PluginState::Loading,
            Some(Slot::Loaded(_)) => PluginState::Loaded,
            Some(Slot::Unloading) => PluginState::Unloading,
        }
    }

    /// Loaded plugins in load order.
    pub fn snapshot(&self) -> Vec<Arc<LoadedPlugin>> {
        self.slots
            .read()
            .values()
            .filter_map(|slot| match slot {
                Slot::Loaded(plugin) => Some(plugin.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn loaded_ids(&self) -> Vec<PluginId> {
        self.snapshot().iter().map(|p| p.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

/// Exclusive claim on an id during load. Dropping it without
/// [`commit`](Self::commit) frees the id again.
pub struct Reservation<'a> {
    registry: &'a PluginRegistry,
    id: PluginId,
    committed: bool,
}

impl Reservation<'_> {
    pub fn id(&self) -> &PluginId {
        &self.id
    }

    /// Publish the plugin. It becomes visible to listing and dispatch.
    pub fn commit(mut self, plugin: LoadedPlugin) -> Arc<LoadedPlugin> {
        let plugin = Arc::new(plugin);
        self.registry
            .slots
            .write()
            .insert(self.id.clone(), Slot::Loaded(plugin.clone()));
        self.committed = true;
        plugin
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.registry.slots.write();
        if matches!(slots.get(&self.id), Some(Slot::Loading)) {
            slots.shift_remove(&self.id);
        }
    }
}
