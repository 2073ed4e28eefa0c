//! The ordered plugin list.
//!
//! Insertion order is processing order. Every mutation is a targeted
//! splice on the underlying vector so instances that are not touched keep
//! their identity, which lets the executors keep their DSP state.

use crate::error::ValidationError;
use crate::plugin::{PluginId, PluginInstance, PluginSnapshot, effective_plugins};
use serde::Deserialize;

use crate::preset::{self, PluginState, Preset, ShortPluginState};

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    plugins: Vec<PluginInstance>,
    master_bypass: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn plugins(&self) -> &[PluginInstance] {
        &self.plugins
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginInstance> {
        self.plugins.iter()
    }

    pub fn master_bypass(&self) -> bool {
        self.master_bypass
    }

    pub fn set_master_bypass(&mut self, bypass: bool) {
        self.master_bypass = bypass;
    }

    pub fn position(&self, id: PluginId) -> Option<usize> {
        self.plugins.iter().position(|p| p.id() == id)
    }

    pub fn get(&self, id: PluginId) -> Option<&PluginInstance> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: PluginId) -> Option<&mut PluginInstance> {
        self.plugins.iter_mut().find(|p| p.id() == id)
    }

    /// Append at the end and return the new plugin's id.
    pub fn push(&mut self, plugin: PluginInstance) -> PluginId {
        let id = plugin.id();
        self.plugins.push(plugin);
        id
    }

    /// Insert at `index`, clamped to the list length.
    pub fn insert(&mut self, index: usize, plugin: PluginInstance) -> PluginId {
        let id = plugin.id();
        let index = index.min(self.plugins.len());
        self.plugins.insert(index, plugin);
        id
    }

    /// Insert several plugins starting at `index` (paste, preset merge).
    pub fn insert_many(&mut self, index: usize, plugins: Vec<PluginInstance>) {
        let index = index.min(self.plugins.len());
        self.plugins.splice(index..index, plugins);
    }

    pub fn remove(&mut self, id: PluginId) -> Option<PluginInstance> {
        let index = self.position(id)?;
        Some(self.plugins.remove(index))
    }

    /// Move a plugin one slot earlier. Returns false at the top or if absent.
    pub fn move_up(&mut self, id: PluginId) -> bool {
        match self.position(id) {
            Some(index) if index > 0 => {
                self.plugins.swap(index, index - 1);
                true
            }
            _ => false,
        }
    }

    /// Move a plugin one slot later. Returns false at the bottom or if absent.
    pub fn move_down(&mut self, id: PluginId) -> bool {
        match self.position(id) {
            Some(index) if index + 1 < self.plugins.len() => {
                self.plugins.swap(index, index + 1);
                true
            }
            _ => false,
        }
    }

    /// Drag-reorder: move a plugin to `target`, clamped to the last slot.
    pub fn move_to(&mut self, id: PluginId, target: usize) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        let target = target.min(self.plugins.len() - 1);
        if index == target {
            return false;
        }
        let plugin = self.plugins.remove(index);
        self.plugins.insert(target, plugin);
        true
    }

    pub fn set_enabled(&mut self, id: PluginId, enabled: bool) -> bool {
        match self.get_mut(id) {
            Some(plugin) => {
                plugin.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Replace the whole list (preset load, undo/redo).
    pub fn replace_all(&mut self, plugins: Vec<PluginInstance>) {
        self.plugins = plugins;
    }

    pub fn clear(&mut self) {
        self.plugins.clear();
    }

    /// Immutable copy of every plugin for an executor.
    pub fn snapshot(&self) -> Vec<PluginSnapshot> {
        self.plugins.iter().map(PluginInstance::snapshot).collect()
    }

    /// Plugins that actually process audio: enabled, not a Section marker,
    /// and not inside a disabled Section.
    pub fn active_plugins(&self) -> Vec<PluginSnapshot> {
        let all = self.snapshot();
        effective_plugins(&all).cloned().collect()
    }

    pub fn to_short_states(&self) -> Vec<ShortPluginState> {
        self.plugins.iter().map(ShortPluginState::from_instance).collect()
    }

    /// Build a pipeline from serialized states, skipping invalid entries.
    pub fn from_states<'a, I>(states: I) -> (Self, Vec<ValidationError>)
    where
        I: IntoIterator<Item = &'a ShortPluginState>,
    {
        let (plugins, errors) = preset::load_states(states);
        (
            Self {
                plugins,
                master_bypass: false,
            },
            errors,
        )
    }

    /// Load a pipeline from JSON: a preset in either shape, or a bare
    /// array of plugin states in either shape.
    pub fn from_json(json: &str) -> Result<(Self, Vec<ValidationError>), ValidationError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            Preset(Preset),
            States(Vec<PluginState>),
        }

        let states: Vec<ShortPluginState> = match serde_json::from_str(json)? {
            Document::Preset(p) => p.short_states(),
            Document::States(s) => s.iter().map(PluginState::to_short).collect(),
        };
        Ok(Self::from_states(&states))
    }
}
