//! Serialized plugin and preset state.
//!
//! Two equivalent shapes exist for a plugin's persisted state:
//!
//! - short: `{ nm, en, ib?, ob?, ch?, ...parameters }`, used for URLs,
//!   the clipboard, undo history and old presets;
//! - long: `{ name, enabled, parameters, inputBus?, outputBus?, channel? }`,
//!   used for newer presets and saved application state.
//!
//! Conversions between them are lossless. Loading either form into live
//! [`PluginInstance`]s validates names, buses and channel selectors and
//! skips entries that fail, reporting them alongside the loaded pipeline.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::plugin::{BusIndex, ChannelSelector, ParamSet, PluginInstance};

// ── Plugin state ────────────────────────────────────────────

/// Short plugin state: `{ nm, en, ib?, ob?, ch?, ...parameters }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortPluginState {
    pub nm: String,
    #[serde(default = "default_enabled")]
    pub en: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ib: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ob: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ch: Option<String>,
    #[serde(flatten)]
    pub params: ParamSet,
}

/// Long plugin state: `{ name, enabled, parameters, inputBus?, outputBus?, channel? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LongPluginState {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub parameters: ParamSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_bus: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bus: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Either plugin state shape, told apart by its name key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginState {
    Short(ShortPluginState),
    Long(LongPluginState),
}

impl ShortPluginState {
    pub fn to_long(&self) -> LongPluginState {
        LongPluginState {
            name: self.nm.clone(),
            enabled: self.en,
            parameters: self.params.clone(),
            input_bus: self.ib,
            output_bus: self.ob,
            channel: self.ch.clone(),
        }
    }

    /// Capture a live instance.
    pub fn from_instance(plugin: &PluginInstance) -> Self {
        Self {
            nm: plugin.name().to_string(),
            en: plugin.enabled,
            ib: plugin.input_bus.to_option(),
            ob: plugin.output_bus.to_option(),
            ch: plugin.channel.as_str().map(str::to_string),
            params: plugin.params().clone(),
        }
    }
}

impl LongPluginState {
    pub fn to_short(&self) -> ShortPluginState {
        ShortPluginState {
            nm: self.name.clone(),
            en: self.enabled,
            ib: self.input_bus,
            ob: self.output_bus,
            ch: self.channel.clone(),
            params: self.parameters.clone(),
        }
    }

    pub fn from_instance(plugin: &PluginInstance) -> Self {
        ShortPluginState::from_instance(plugin).to_long()
    }
}

impl PluginState {
    pub fn to_short(&self) -> ShortPluginState {
        match self {
            PluginState::Short(s) => s.clone(),
            PluginState::Long(l) => l.to_short(),
        }
    }

    pub fn to_long(&self) -> LongPluginState {
        match self {
            PluginState::Short(s) => s.to_long(),
            PluginState::Long(l) => l.clone(),
        }
    }

    /// Build a live instance with a fresh id.
    pub fn instantiate(&self) -> Result<PluginInstance, ValidationError> {
        self.to_short().instantiate()
    }
}

impl ShortPluginState {
    /// Build a live instance with a fresh id.
    ///
    /// Parameters are layered over the kind's defaults, so a state saved
    /// before a parameter existed still loads with a usable value.
    pub fn instantiate(&self) -> Result<PluginInstance, ValidationError> {
        if self.nm.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        let mut plugin = PluginInstance::create(&self.nm)?;
        plugin.enabled = self.en;
        plugin.input_bus = BusIndex::from_option(self.ib)?;
        plugin.output_bus = BusIndex::from_option(self.ob)?;
        plugin.channel = ChannelSelector::parse(self.ch.as_deref())?;
        plugin.params_mut().merge(&self.params);
        Ok(plugin)
    }
}

/// Convert a plugin state JSON value to the requested shape.
pub fn convert_state(value: serde_json::Value, to_long: bool) -> Result<serde_json::Value, ValidationError> {
    let state: PluginState = serde_json::from_value(value)?;
    let converted = if to_long {
        serde_json::to_value(state.to_long())?
    } else {
        serde_json::to_value(state.to_short())?
    };
    Ok(converted)
}

// ── Presets ─────────────────────────────────────────────────

const CONVERTED_PRESET_NAME: &str = "Converted Preset";

/// Old preset shape: `{ name, plugins: [short...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortPreset {
    #[serde(default)]
    pub name: String,
    pub plugins: Vec<ShortPluginState>,
}

/// Current preset shape: `{ name, pipeline: [long...], timestamp }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongPreset {
    #[serde(default)]
    pub name: String,
    pub pipeline: Vec<LongPluginState>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

/// A preset in either shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Preset {
    Long(LongPreset),
    Short(ShortPreset),
}

fn preset_name(name: &str) -> String {
    if name.is_empty() {
        CONVERTED_PRESET_NAME.to_string()
    } else {
        name.to_string()
    }
}

impl ShortPreset {
    pub fn to_long(&self, timestamp: u64) -> LongPreset {
        LongPreset {
            name: preset_name(&self.name),
            pipeline: self.plugins.iter().map(ShortPluginState::to_long).collect(),
            timestamp,
        }
    }
}

impl LongPreset {
    pub fn to_short(&self) -> ShortPreset {
        ShortPreset {
            name: preset_name(&self.name),
            plugins: self.pipeline.iter().map(LongPluginState::to_short).collect(),
        }
    }
}

impl Preset {
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn name(&self) -> &str {
        match self {
            Preset::Long(p) => &p.name,
            Preset::Short(p) => &p.name,
        }
    }

    /// Plugin states in short form, in pipeline order.
    pub fn short_states(&self) -> Vec<ShortPluginState> {
        match self {
            Preset::Long(p) => p.pipeline.iter().map(LongPluginState::to_short).collect(),
            Preset::Short(p) => p.plugins.clone(),
        }
    }
}

/// Instantiate every valid entry, skipping and reporting the rest.
pub fn load_states<'a, I>(states: I) -> (Vec<PluginInstance>, Vec<ValidationError>)
where
    I: IntoIterator<Item = &'a ShortPluginState>,
{
    let mut plugins = Vec::new();
    let mut errors = Vec::new();
    for (index, state) in states.into_iter().enumerate() {
        match state.instantiate() {
            Ok(plugin) => plugins.push(plugin),
            Err(e) => {
                log::warn!("Skipping plugin entry {index} ('{}'): {e}", state.nm);
                errors.push(e);
            }
        }
    }
    (plugins, errors)
}
