//! Plugin instances, identities and routing addresses.
//!
//! A plugin instance is the cheap, serializable half of an effect: its
//! kind, enable flag, bus routing, channel selector and parameter values.
//! The DSP state lives separately in the engine, keyed by [`PluginId`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::ValidationError;

// ── Identity ────────────────────────────────────────────────

static NEXT_PLUGIN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique plugin id, allocated from a monotonic counter and
/// never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginId(u64);

impl PluginId {
    /// Allocate the next id.
    pub fn next() -> Self {
        PluginId(NEXT_PLUGIN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap an id received in a control message.
    pub fn from_raw(raw: u64) -> Self {
        PluginId(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Kind registry ───────────────────────────────────────────

/// Every effect type the engine knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Volume,
    DcOffset,
    PolarityInversion,
    Mute,
    StereoBalance,
    RsReverb,
    Delay,
    Compressor,
    HiPassFilter,
    LoPassFilter,
    FiveBandPeq,
    /// Groups the plugins after it; carries no DSP.
    Section,
}

struct KindEntry {
    kind: PluginKind,
    /// Display name, used in serialized state (`nm` / `name`).
    name: &'static str,
    /// Stable type identifier, used in control messages (`type`).
    type_id: &'static str,
}

const REGISTRY: &[KindEntry] = &[
    KindEntry { kind: PluginKind::Volume, name: "Volume", type_id: "VolumePlugin" },
    KindEntry { kind: PluginKind::DcOffset, name: "DC Offset", type_id: "DCOffsetPlugin" },
    KindEntry {
        kind: PluginKind::PolarityInversion,
        name: "Polarity Inversion",
        type_id: "PolarityInversionPlugin",
    },
    KindEntry { kind: PluginKind::Mute, name: "Mute", type_id: "MutePlugin" },
    KindEntry {
        kind: PluginKind::StereoBalance,
        name: "Stereo Balance",
        type_id: "StereoBalancePlugin",
    },
    KindEntry { kind: PluginKind::RsReverb, name: "RS Reverb", type_id: "RSReverbPlugin" },
    KindEntry { kind: PluginKind::Delay, name: "Delay", type_id: "DelayPlugin" },
    KindEntry { kind: PluginKind::Compressor, name: "Compressor", type_id: "CompressorPlugin" },
    KindEntry {
        kind: PluginKind::HiPassFilter,
        name: "Hi Pass Filter",
        type_id: "HiPassFilterPlugin",
    },
    KindEntry {
        kind: PluginKind::LoPassFilter,
        name: "Lo Pass Filter",
        type_id: "LoPassFilterPlugin",
    },
    KindEntry { kind: PluginKind::FiveBandPeq, name: "5Band PEQ", type_id: "FiveBandPEQPlugin" },
    KindEntry { kind: PluginKind::Section, name: "Section", type_id: "SectionPlugin" },
];

impl PluginKind {
    fn entry(self) -> &'static KindEntry {
        // The registry lists every variant.
        REGISTRY
            .iter()
            .find(|e| e.kind == self)
            .unwrap_or(&REGISTRY[0])
    }

    /// Look up a kind by display name ("RS Reverb").
    pub fn from_name(name: &str) -> Option<Self> {
        REGISTRY.iter().find(|e| e.name == name).map(|e| e.kind)
    }

    /// Look up a kind by type id ("RSReverbPlugin").
    pub fn from_type_id(type_id: &str) -> Option<Self> {
        REGISTRY.iter().find(|e| e.type_id == type_id).map(|e| e.kind)
    }

    /// Accept either a display name or a type id.
    pub fn lookup(s: &str) -> Option<Self> {
        Self::from_name(s).or_else(|| Self::from_type_id(s))
    }

    pub fn name(self) -> &'static str {
        self.entry().name
    }

    pub fn type_id(self) -> &'static str {
        self.entry().type_id
    }

    pub fn is_section(self) -> bool {
        self == PluginKind::Section
    }

    /// All registered kinds, in registry order.
    pub fn all() -> impl Iterator<Item = PluginKind> {
        REGISTRY.iter().map(|e| e.kind)
    }

    /// Factory defaults for this kind's parameters.
    pub fn default_params(self) -> ParamSet {
        let pairs: &[(&str, f64)] = match self {
            PluginKind::Volume => &[("vl", 0.0)],
            PluginKind::DcOffset => &[("of", 0.0)],
            PluginKind::StereoBalance => &[("bl", 0.0)],
            PluginKind::RsReverb => &[
                ("pd", 10.0),
                ("rs", 10.0),
                ("rt", 2.4),
                ("ds", 8.0),
                ("df", 0.7),
                ("dp", 80.0),
                ("hd", 2000.0),
                ("ld", 200.0),
                ("mx", 16.0),
            ],
            PluginKind::Delay => &[
                ("pd", 0.0),
                ("ds", 150.0),
                ("dp", 50.0),
                ("hd", 5000.0),
                ("ld", 100.0),
                ("mx", 16.0),
                ("fb", 50.0),
                ("pp", 0.0),
            ],
            PluginKind::Compressor => &[
                ("th", -24.0),
                ("rt", 2.0),
                ("at", 10.0),
                ("rl", 100.0),
                ("kn", 3.0),
                ("gn", 0.0),
            ],
            PluginKind::HiPassFilter | PluginKind::LoPassFilter => &[("fr", 1000.0), ("sl", -24.0)],
            PluginKind::FiveBandPeq => &[
                ("f0", 100.0),
                ("g0", 0.0),
                ("q0", 1.0),
                ("f1", 316.0),
                ("g1", 0.0),
                ("q1", 1.0),
                ("f2", 1000.0),
                ("g2", 0.0),
                ("q2", 1.0),
                ("f3", 3160.0),
                ("g3", 0.0),
                ("q3", 1.0),
                ("f4", 10_000.0),
                ("g4", 0.0),
                ("q4", 1.0),
            ],
            PluginKind::PolarityInversion | PluginKind::Mute | PluginKind::Section => &[],
        };
        let mut params = ParamSet::new();
        for &(key, value) in pairs {
            params.set(key, value);
        }
        if self == PluginKind::FiveBandPeq {
            for key in ["t0", "t1", "t2", "t3", "t4"] {
                params.set(key, "pk");
            }
        }
        params
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for PluginKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_id())
    }
}

impl<'de> Deserialize<'de> for PluginKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PluginKind::lookup(&raw)
            .ok_or_else(|| serde::de::Error::custom(ValidationError::UnknownPlugin(raw)))
    }
}

// ── Bus addressing ──────────────────────────────────────────

/// Number of auxiliary buses next to Main.
pub const AUX_BUS_COUNT: u8 = 4;

/// A signal bus address. Index 0 is Main; 1..=4 are auxiliary buses.
///
/// Serialized as a nullable integer where `null` (and `0`) mean Main.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BusIndex(u8);

impl BusIndex {
    pub const MAIN: BusIndex = BusIndex(0);

    /// Auxiliary bus `n` (1-based).
    pub fn aux(n: u8) -> Result<Self, ValidationError> {
        if n == 0 || n > AUX_BUS_COUNT {
            return Err(ValidationError::InvalidBus(n));
        }
        Ok(BusIndex(n))
    }

    pub fn from_option(raw: Option<u8>) -> Result<Self, ValidationError> {
        match raw {
            None | Some(0) => Ok(BusIndex::MAIN),
            Some(n) => BusIndex::aux(n),
        }
    }

    /// `None` for Main, `Some(n)` for auxiliary buses.
    pub fn to_option(self) -> Option<u8> {
        if self.is_main() { None } else { Some(self.0) }
    }

    pub fn is_main(self) -> bool {
        self.0 == 0
    }

    /// Slot in the router's bus table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Serialize for BusIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BusIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<u8>::deserialize(deserializer)?;
        BusIndex::from_option(raw).map_err(serde::de::Error::custom)
    }
}

// ── Channel selector ────────────────────────────────────────

const NUMERIC_CHANNELS: [&str; 6] = ["3", "4", "5", "6", "7", "8"];

/// Which channels of its input a plugin processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelSelector {
    /// Every channel (`null` or `"A"`).
    #[default]
    All,
    /// Channel 0 only (`"L"`).
    Left,
    /// Channel 1 only (`"R"`).
    Right,
    /// A multichannel slot; holds the zero-based index 2..=7 (`"3"`..`"8"`).
    Channel(u8),
}

impl ChannelSelector {
    /// Parse a selector, accepting the legacy spellings "Left", "Right"
    /// and "All" as well as the empty string.
    pub fn parse(raw: Option<&str>) -> Result<Self, ValidationError> {
        match raw.map(str::trim) {
            None | Some("") | Some("A") | Some("All") => Ok(ChannelSelector::All),
            Some("L") | Some("Left") => Ok(ChannelSelector::Left),
            Some("R") | Some("Right") => Ok(ChannelSelector::Right),
            Some(s) => match s.parse::<u8>() {
                Ok(n @ 3..=8) => Ok(ChannelSelector::Channel(n - 1)),
                _ => Err(ValidationError::InvalidChannel(s.to_string())),
            },
        }
    }

    /// Canonical serialized form; `All` serializes as `null`.
    pub fn as_str(self) -> Option<&'static str> {
        match self {
            ChannelSelector::All => None,
            ChannelSelector::Left => Some("L"),
            ChannelSelector::Right => Some("R"),
            ChannelSelector::Channel(0) => Some("L"),
            ChannelSelector::Channel(1) => Some("R"),
            ChannelSelector::Channel(idx) => NUMERIC_CHANNELS.get(idx as usize - 2).copied(),
        }
    }

    /// The single channel this selector isolates, if any.
    pub fn channel_index(self) -> Option<usize> {
        match self {
            ChannelSelector::All => None,
            ChannelSelector::Left => Some(0),
            ChannelSelector::Right => Some(1),
            ChannelSelector::Channel(idx) => Some(idx as usize),
        }
    }
}

impl Serialize for ChannelSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ChannelSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        ChannelSelector::parse(raw.as_deref()).map_err(serde::de::Error::custom)
    }
}

// ── Parameters ──────────────────────────────────────────────

/// Named parameter values of one plugin.
///
/// Values are kept as JSON so that unknown or plugin-specific shapes
/// survive a serialization round trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, Value>);

impl ParamSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric value of `key`. Numeric strings are accepted.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// String value of `key`, e.g. a band type code.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    /// Numeric value of `key` clamped to `[min, max]`, or `default` when
    /// missing or not a finite number.
    pub fn number_clamped(&self, key: &str, default: f64, min: f64, max: f64) -> f64 {
        match self.number(key) {
            Some(v) if v.is_finite() => v.clamp(min, max),
            _ => default,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Overwrite values with those present in `other`.
    pub fn merge(&mut self, other: &ParamSet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }

    pub(crate) fn from_inner(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

// ── Instances ───────────────────────────────────────────────

/// One effect in the pipeline, as the control side sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginInstance {
    id: PluginId,
    kind: PluginKind,
    pub enabled: bool,
    pub input_bus: BusIndex,
    pub output_bus: BusIndex,
    pub channel: ChannelSelector,
    params: ParamSet,
}

impl PluginInstance {
    /// Create a fresh instance with a new id and default parameters.
    pub fn new(kind: PluginKind) -> Self {
        Self {
            id: PluginId::next(),
            kind,
            enabled: true,
            input_bus: BusIndex::MAIN,
            output_bus: BusIndex::MAIN,
            channel: ChannelSelector::All,
            params: kind.default_params(),
        }
    }

    /// Factory keyed by display name or type id.
    pub fn create(name: &str) -> Result<Self, ValidationError> {
        PluginKind::lookup(name)
            .map(Self::new)
            .ok_or_else(|| ValidationError::UnknownPlugin(name.to_string()))
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.set(key, value);
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.set(key, value);
        self
    }

    pub fn with_routing(mut self, input_bus: BusIndex, output_bus: BusIndex) -> Self {
        self.input_bus = input_bus;
        self.output_bus = output_bus;
        self
    }

    pub fn with_channel(mut self, channel: ChannelSelector) -> Self {
        self.channel = channel;
        self
    }

    /// Immutable copy sent to an executor.
    pub fn snapshot(&self) -> PluginSnapshot {
        PluginSnapshot {
            id: self.id,
            kind: self.kind,
            enabled: self.enabled,
            parameters: self.params.clone(),
            input_bus: self.input_bus,
            output_bus: self.output_bus,
            channel: self.channel,
        }
    }
}

/// A plugin as carried in control messages to the executors.
///
/// Wire shape: `{ id, type, enabled, parameters, inputBus, outputBus, channel }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSnapshot {
    pub id: PluginId,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    pub enabled: bool,
    #[serde(default)]
    pub parameters: ParamSet,
    #[serde(default)]
    pub input_bus: BusIndex,
    #[serde(default)]
    pub output_bus: BusIndex,
    #[serde(default)]
    pub channel: ChannelSelector,
}

/// Section-aware effective plugin list: drops Section markers, disabled
/// plugins, and plugins inside a disabled Section.
pub fn effective_plugins<'a, I>(plugins: I) -> impl Iterator<Item = &'a PluginSnapshot>
where
    I: IntoIterator<Item = &'a PluginSnapshot>,
{
    let mut section_enabled = true;
    plugins.into_iter().filter(move |p| {
        if p.kind.is_section() {
            section_enabled = p.enabled;
            return false;
        }
        p.enabled && section_enabled
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = PluginInstance::new(PluginKind::Volume);
        let b = PluginInstance::new(PluginKind::Volume);
        assert!(b.id() > a.id());
    }

    #[test]
    fn registry_lookup_by_name_and_type() {
        assert_eq!(PluginKind::from_name("RS Reverb"), Some(PluginKind::RsReverb));
        assert_eq!(PluginKind::from_type_id("RSReverbPlugin"), Some(PluginKind::RsReverb));
        assert_eq!(PluginKind::lookup("DCOffsetPlugin"), Some(PluginKind::DcOffset));
        assert_eq!(PluginKind::lookup("Reverb 9000"), None);
        for kind in PluginKind::all() {
            assert_eq!(PluginKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn create_unknown_plugin_fails() {
        let err = PluginInstance::create("Nope").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownPlugin(ref n) if n == "Nope"));
    }

    #[test]
    fn bus_index_range() {
        assert_eq!(BusIndex::from_option(None).unwrap(), BusIndex::MAIN);
        assert_eq!(BusIndex::from_option(Some(0)).unwrap(), BusIndex::MAIN);
        assert_eq!(BusIndex::from_option(Some(4)).unwrap().index(), 4);
        assert!(BusIndex::from_option(Some(5)).is_err());
        assert_eq!(BusIndex::MAIN.to_option(), None);
    }

    #[test]
    fn channel_selector_legacy_values() {
        assert_eq!(ChannelSelector::parse(Some("Left")).unwrap(), ChannelSelector::Left);
        assert_eq!(ChannelSelector::parse(Some("Right")).unwrap(), ChannelSelector::Right);
        assert_eq!(ChannelSelector::parse(Some("All")).unwrap(), ChannelSelector::All);
        assert_eq!(ChannelSelector::parse(Some("")).unwrap(), ChannelSelector::All);
        assert_eq!(ChannelSelector::parse(Some("A")).unwrap(), ChannelSelector::All);
        assert_eq!(ChannelSelector::parse(None).unwrap(), ChannelSelector::All);
        assert_eq!(ChannelSelector::parse(Some("5")).unwrap(), ChannelSelector::Channel(4));
        assert!(ChannelSelector::parse(Some("9")).is_err());
        assert!(ChannelSelector::parse(Some("X")).is_err());
    }

    #[test]
    fn channel_selector_canonical_text() {
        let canonical = |raw| ChannelSelector::parse(Some(raw)).unwrap().as_str();
        assert_eq!(canonical("Left"), Some("L"));
        assert_eq!(canonical("All"), None);
        assert_eq!(canonical("8"), Some("8"));
        assert_eq!(ChannelSelector::Channel(7).channel_index(), Some(7));
    }

    #[test]
    fn low_channel_slots_serialize_as_left_and_right() {
        assert_eq!(ChannelSelector::Channel(0).as_str(), Some("L"));
        assert_eq!(ChannelSelector::Channel(1).as_str(), Some("R"));
        assert_eq!(ChannelSelector::Channel(2).as_str(), Some("3"));
        assert_eq!(ChannelSelector::Channel(9).as_str(), None);
        let json = serde_json::to_value(ChannelSelector::Channel(1)).unwrap();
        assert_eq!(json, "R");
    }

    #[test]
    fn eq_defaults_include_band_types() {
        let p = PluginKind::FiveBandPeq.default_params();
        assert_eq!(p.number("f3"), Some(3160.0));
        assert_eq!(p.text("t0"), Some("pk"));
        assert_eq!(p.text("f0"), None);
        assert_eq!(PluginKind::lookup("HiPassFilterPlugin"), Some(PluginKind::HiPassFilter));
        assert_eq!(PluginKind::from_name("5Band PEQ"), Some(PluginKind::FiveBandPeq));
    }

    #[test]
    fn param_numbers_accept_strings_and_clamp() {
        let mut p = ParamSet::new();
        p.set("a", 3.5);
        p.set("b", "12");
        p.set("c", "abc");
        assert_eq!(p.number("a"), Some(3.5));
        assert_eq!(p.number("b"), Some(12.0));
        assert_eq!(p.number("c"), None);
        assert_eq!(p.number_clamped("b", 0.0, 0.0, 10.0), 10.0);
        assert_eq!(p.number_clamped("missing", 4.0, 0.0, 10.0), 4.0);
    }

    #[test]
    fn snapshot_wire_shape() {
        let p = PluginInstance::new(PluginKind::Volume)
            .with_param("vl", -6.0)
            .with_routing(BusIndex::MAIN, BusIndex::aux(2).unwrap())
            .with_channel(ChannelSelector::Left);
        let json = serde_json::to_value(p.snapshot()).unwrap();
        assert_eq!(json["type"], "VolumePlugin");
        assert_eq!(json["inputBus"], Value::Null);
        assert_eq!(json["outputBus"], 2);
        assert_eq!(json["channel"], "L");
        assert_eq!(json["parameters"]["vl"], -6.0);

        let back: PluginSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, p.snapshot());
    }

    #[test]
    fn effective_plugins_respect_sections() {
        let mut s1 = PluginInstance::new(PluginKind::Section);
        s1.enabled = false;
        let a = PluginInstance::new(PluginKind::Volume);
        let b = PluginInstance::new(PluginKind::Volume);
        let s2 = PluginInstance::new(PluginKind::Section);
        let c = PluginInstance::new(PluginKind::Mute);
        let mut d = PluginInstance::new(PluginKind::Mute);
        d.enabled = false;
        let before = PluginInstance::new(PluginKind::Volume);

        let list: Vec<PluginSnapshot> = [&before, &s1, &a, &b, &s2, &c, &d]
            .iter()
            .map(|p| p.snapshot())
            .collect();
        let ids: Vec<PluginId> = effective_plugins(&list).map(|p| p.id).collect();
        assert_eq!(ids, vec![before.id(), c.id()]);
    }
}
