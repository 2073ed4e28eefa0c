//! Audio Engine — runs the ordered plugin list over one block.
//!
//! The engine owns the bus router and one context (processing unit plus
//! fade state) per plugin id. Plugins are visited strictly in pipeline
//! order: each reads a snapshot of its input bus, transforms it, and writes
//! the result to its output bus. A plugin that fails is replaced by its
//! input for that block, so one broken unit never silences the pipeline.
//!
//! The realtime executor and the offline renderer each own a separate
//! engine, so their DSP states never mix.

use std::cell::Cell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Once;

use crate::error::ProcessingError;
use crate::plugin::{ParamSet, PluginId, PluginKind, PluginSnapshot, effective_plugins};

use super::bus::BusRouter;
use super::fade::FadeBank;
use super::{BlockContext, DspUnit, create_unit};

/// Log the first failure of a plugin and then every this many.
const FAILURE_LOG_INTERVAL: u64 = 1000;

thread_local! {
    /// Set while a unit runs on this thread.
    static IN_UNIT: Cell<bool> = const { Cell::new(false) };
}

static QUIET_UNIT_PANICS: Once = Once::new();

/// Wrap the process panic hook so panics raised inside a unit print
/// nothing. The engine already counts them and logs at a bounded rate;
/// every other panic still reaches the previous hook.
fn install_quiet_unit_panics() {
    QUIET_UNIT_PANICS.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if !IN_UNIT.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Which executor an engine belongs to; only used to tag log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Realtime,
    Offline,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Realtime => f.write_str("realtime"),
            ExecutionMode::Offline => f.write_str("offline"),
        }
    }
}

/// DSP state bound to one plugin id and the kind it was built for.
struct PluginContext {
    kind: PluginKind,
    unit: Box<dyn DspUnit>,
    fades: FadeBank,
    failures: u64,
}

impl PluginContext {
    fn new(kind: PluginKind, unit: Box<dyn DspUnit>, fade_secs: f64) -> Self {
        Self {
            kind,
            unit,
            fades: FadeBank::new(fade_secs),
            failures: 0,
        }
    }

    /// Run the unit, turning errors, panics and non-finite samples into a
    /// `ProcessingError`. A panic leaves the unit's state suspect, so the
    /// unit and its fades start over on the next block.
    fn run(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        let unit_name = self.unit.name();
        let unit = &mut self.unit;
        let fades = &mut self.fades;
        IN_UNIT.with(|flag| flag.set(true));
        let outcome = catch_unwind(AssertUnwindSafe(|| unit.process(ctx, params, fades, data)));
        IN_UNIT.with(|flag| flag.set(false));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                self.unit.reset();
                self.fades.clear();
                return Err(ProcessingError::Panicked { unit: unit_name });
            }
        }
        match data.iter().position(|s| !s.is_finite()) {
            Some(index) => Err(ProcessingError::MalformedOutput {
                unit: unit_name,
                index,
            }),
            None => Ok(()),
        }
    }
}

/// DSP state removed from an engine.
///
/// Dropping it frees the unit's buffers (delay lines can hold seconds of
/// audio), so the realtime executor hands it to the control side instead.
pub struct RetiredState(PluginContext);

impl RetiredState {
    /// The kind the retired unit was built for.
    pub fn kind(&self) -> PluginKind {
        self.0.kind
    }
}

impl fmt::Debug for RetiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RetiredState").field(&self.0.kind).finish()
    }
}

/// The per-block pipeline engine.
///
/// Constructing the first engine wraps the process panic hook so that a
/// panic inside a unit prints nothing from the audio thread.
pub struct AudioEngine {
    mode: ExecutionMode,
    sample_rate: f64,
    fade_secs: f64,
    router: BusRouter,
    contexts: HashMap<PluginId, PluginContext>,
    /// Ids queued for removal by `retain`; reused across calls.
    stale: Vec<PluginId>,
    /// Snapshot of the bus a plugin reads.
    input: Vec<f32>,
    /// Working copy the plugin transforms.
    work: Vec<f32>,
    /// Single-channel buffer for channel-isolated plugins.
    channel: Vec<f32>,
}

impl AudioEngine {
    pub fn new(mode: ExecutionMode, sample_rate: f64, fade_secs: f64) -> Self {
        install_quiet_unit_panics();
        AudioEngine {
            mode,
            sample_rate,
            fade_secs,
            router: BusRouter::new(),
            contexts: HashMap::new(),
            stale: Vec::new(),
            input: Vec::new(),
            work: Vec::new(),
            channel: Vec::new(),
        }
    }

    /// Preallocate buffers for blocks of the given shape.
    pub fn allocate(&mut self, channels: usize, block_size: usize) {
        self.router.allocate(channels, block_size);
        self.input.resize(channels * block_size, 0.0);
        self.work.resize(channels * block_size, 0.0);
        self.channel.resize(block_size, 0.0);
    }

    /// Full teardown: drop every plugin's DSP state and reallocate buses.
    pub fn reset(&mut self, sample_rate: f64, channels: usize, block_size: usize) {
        self.sample_rate = sample_rate;
        self.contexts.clear();
        self.allocate(channels, block_size);
    }

    /// Remove the DSP state of plugins no longer in `plugins`, or whose id
    /// now names a different kind, passing each removed state to `retire`.
    /// Everything else keeps its state untouched.
    pub fn retain(&mut self, plugins: &[PluginSnapshot], mut retire: impl FnMut(RetiredState)) {
        self.stale.clear();
        for (id, context) in &self.contexts {
            if !plugins.iter().any(|p| p.id == *id && p.kind == context.kind) {
                self.stale.push(*id);
            }
        }
        for id in self.stale.drain(..) {
            if let Some(context) = self.contexts.remove(&id) {
                retire(RetiredState(context));
            }
        }
    }

    pub fn has_context(&self, id: PluginId) -> bool {
        self.contexts.contains_key(&id)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn router(&self) -> &BusRouter {
        &self.router
    }

    /// Process one block.
    ///
    /// `input` and `output` hold `channels * block_size` samples in
    /// channel-segment layout. `time` is the block's start in seconds.
    pub fn process_block(
        &mut self,
        plugins: &[PluginSnapshot],
        input: &[f32],
        output: &mut [f32],
        channels: usize,
        block_size: usize,
        time: f64,
    ) {
        let len = channels * block_size;
        if self.work.len() < len || self.channel.len() < block_size {
            self.allocate(channels, block_size);
        }
        self.router.begin_block(input, channels, block_size);

        let full = BlockContext {
            sample_rate: self.sample_rate,
            channels,
            block_size,
            time,
        };

        for plugin in effective_plugins(plugins) {
            let context = match self.contexts.entry(plugin.id) {
                Entry::Occupied(e) if e.get().kind == plugin.kind => e.into_mut(),
                entry => {
                    let Some(unit) = create_unit(plugin.kind, plugin.id.get()) else {
                        continue;
                    };
                    let fresh = PluginContext::new(plugin.kind, unit, self.fade_secs);
                    match entry {
                        // Same id, new kind: the old unit is dropped here.
                        Entry::Occupied(mut e) => {
                            e.insert(fresh);
                            e.into_mut()
                        }
                        Entry::Vacant(e) => e.insert(fresh),
                    }
                }
            };

            let snapshot = &mut self.input[..len];
            let work = &mut self.work[..len];
            self.router.read_into(plugin.input_bus, snapshot);
            work.copy_from_slice(snapshot);

            let result = match plugin.channel.channel_index() {
                Some(ch) if ch < channels => {
                    let segment = ch * block_size..(ch + 1) * block_size;
                    let single = &mut self.channel[..block_size];
                    single.copy_from_slice(&work[segment.clone()]);
                    let ctx = BlockContext { channels: 1, ..full };
                    let result = context.run(&ctx, &plugin.parameters, single);
                    work[segment].copy_from_slice(single);
                    result
                }
                // A selector naming a channel the block lacks, or none at
                // all, processes every channel.
                _ => context.run(&full, &plugin.parameters, work),
            };

            if let Err(e) = result {
                context.failures += 1;
                if context.failures % FAILURE_LOG_INTERVAL == 1 {
                    log::warn!(
                        "[{}] plugin {} ({}) failed, passing input through ({} failures): {e}",
                        self.mode,
                        plugin.id,
                        plugin.kind,
                        context.failures
                    );
                }
                work.copy_from_slice(snapshot);
            }

            self.router
                .write(plugin.output_bus, work, plugin.input_bus == plugin.output_bus);
        }

        output[..len].copy_from_slice(self.router.main());
    }

    /// Bind a specific unit to a plugin, replacing any existing state.
    #[cfg(test)]
    pub(crate) fn install_unit(
        &mut self,
        plugin: &crate::plugin::PluginInstance,
        unit: Box<dyn DspUnit>,
    ) {
        self.contexts.insert(
            plugin.id(),
            PluginContext::new(plugin.kind(), unit, self.fade_secs),
        );
    }
}


#[cfg(test)]
mod tests {
    use super::test_units::*;
    use super::*;
    use crate::dsp::db_to_linear;
    use crate::plugin::{BusIndex, ChannelSelector, PluginInstance, PluginKind};

    const BS: usize = 128;

    fn engine() -> AudioEngine {
        AudioEngine::new(ExecutionMode::Offline, 48_000.0, 0.01)
    }

    fn volume(db: f64) -> PluginInstance {
        PluginInstance::new(PluginKind::Volume).with_param("vl", db)
    }

    fn snap(plugins: &[&PluginInstance]) -> Vec<PluginSnapshot> {
        plugins.iter().map(|p| p.snapshot()).collect()
    }

    fn ramp(channels: usize) -> Vec<f32> {
        (0..channels * BS).map(|i| ((i as f32) * 0.01).sin() * 0.5).collect()
    }

    fn aux(n: u8) -> BusIndex {
        BusIndex::aux(n).unwrap()
    }

    #[test]
    fn opposite_gains_cancel() {
        let mut e = engine();
        let up = volume(6.0);
        let down = volume(-6.0);
        let input = vec![1.0f32; BS];
        let mut out = vec![0.0f32; BS];

        e.process_block(&snap(&[&up, &down]), &input, &mut out, 1, BS, 0.0);
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-5), "got {}", out[0]);

        let mut up_disabled = up.clone();
        up_disabled.enabled = false;
        e.process_block(&snap(&[&up_disabled, &down]), &input, &mut out, 1, BS, 0.0);
        let expected = db_to_linear(-6.0) as f32;
        assert!(out.iter().all(|&s| (s - expected).abs() < 1e-6));
        assert!((out[0] - 0.501).abs() < 1e-3);
    }

    #[test]
    fn aux_bus_sums_exactly() {
        let mut e = engine();
        let a = volume(-6.0).with_routing(BusIndex::MAIN, aux(1));
        let b = volume(-12.0).with_routing(BusIndex::MAIN, aux(1));
        let input = ramp(2);
        let mut out = vec![0.0f32; 2 * BS];
        e.process_block(&snap(&[&a, &b]), &input, &mut out, 2, BS, 0.0);

        let ga = db_to_linear(-6.0) as f32;
        let gb = db_to_linear(-12.0) as f32;
        let expected: Vec<f32> = input.iter().map(|&x| 0.0 + x * ga + x * gb).collect();
        assert_eq!(e.router().bus(aux(1)), expected.as_slice());
        assert_eq!(out, input, "sends leave Main untouched");
    }

    #[test]
    fn left_selector_leaves_right_identical() {
        let mut e = engine();
        let p = volume(-6.0).with_channel(ChannelSelector::Left);
        let input = ramp(2);
        let mut out = vec![0.0f32; 2 * BS];
        e.process_block(&snap(&[&p]), &input, &mut out, 2, BS, 0.0);

        assert_eq!(&out[BS..], &input[BS..]);
        let g = db_to_linear(-6.0) as f32;
        for i in 0..BS {
            assert_eq!(out[i], input[i] * g);
        }
        assert_ne!(&out[..BS], &input[..BS]);
    }

    #[test]
    fn missing_channel_processes_all() {
        let mut e = engine();
        let p = volume(-6.0).with_channel(ChannelSelector::Channel(4));
        let input = vec![1.0f32; 2 * BS];
        let mut out = vec![0.0f32; 2 * BS];
        e.process_block(&snap(&[&p]), &input, &mut out, 2, BS, 0.0);
        let g = db_to_linear(-6.0) as f32;
        assert!(out.iter().all(|&s| s == g));
    }

    fn assert_fails_open(unit: Box<dyn DspUnit>) {
        let mut e = engine();
        let pre = volume(-6.0);
        let broken = PluginInstance::new(PluginKind::Volume);
        e.install_unit(&broken, unit);

        let input = ramp(2);
        let mut out = vec![0.0f32; 2 * BS];
        e.process_block(&snap(&[&pre, &broken]), &input, &mut out, 2, BS, 0.0);

        let mut expected = vec![0.0f32; 2 * BS];
        engine().process_block(&snap(&[&pre]), &input, &mut expected, 2, BS, 0.0);
        assert_eq!(out, expected);
    }

    #[test]
    fn failing_unit_passes_input_through() {
        assert_fails_open(Box::new(Failing));
    }

    #[test]
    fn panicking_unit_passes_input_through() {
        assert_fails_open(Box::new(Panicking));
    }

    #[test]
    fn non_finite_output_passes_input_through() {
        assert_fails_open(Box::new(NanOutput));
    }

    #[test]
    fn mix_midpoint_has_full_dry_and_wet() {
        let mut e = engine();
        let p = PluginInstance::new(PluginKind::Volume).with_param("mx", 50.0);
        e.install_unit(&p, Box::new(InvertMix));
        let input = ramp(1);
        let mut out = vec![1.0f32; BS];
        e.process_block(&snap(&[&p]), &input, &mut out, 1, BS, 0.0);
        // dry 1.0 + wet 1.0 of an inverted signal cancels exactly.
        assert!(out.iter().all(|&s| s == 0.0));

        let p = p.with_param("mx", 25.0);
        e.process_block(&snap(&[&p]), &input, &mut out, 1, BS, 0.0);
        for (o, x) in out.iter().zip(&input) {
            assert!((o - 0.5 * x).abs() < 1e-7);
        }
    }

    #[test]
    fn same_bus_in_and_out_replaces_from_snapshot() {
        let mut e = engine();
        let send = PluginInstance::new(PluginKind::Volume).with_routing(BusIndex::MAIN, aux(3));
        let trim = volume(-6.0).with_routing(aux(3), aux(3));
        let input = vec![1.0f32; BS];
        let mut out = vec![0.0f32; BS];
        e.process_block(&snap(&[&send, &trim]), &input, &mut out, 1, BS, 0.0);
        let g = db_to_linear(-6.0) as f32;
        assert!(e.router().bus(aux(3)).iter().all(|&s| s == g));
    }

    #[test]
    fn reorder_keeps_unrelated_state() {
        let reverb = PluginSnapshot {
            id: PluginId::from_raw(9_001),
            ..PluginInstance::new(PluginKind::RsReverb)
                .with_param("mx", 100.0)
                .with_routing(BusIndex::MAIN, aux(1))
                .snapshot()
        };
        let gain = PluginSnapshot {
            id: PluginId::from_raw(9_002),
            ..volume(-3.0).with_routing(BusIndex::MAIN, aux(2)).snapshot()
        };

        let mut steady = engine();
        let mut reordered = engine();
        let mut out = vec![0.0f32; 2 * BS];
        for block in 0..12 {
            let input = ramp(2);
            let t = block as f64 * BS as f64 / 48_000.0;
            steady.process_block(&[reverb.clone(), gain.clone()], &input, &mut out, 2, BS, t);
            let order = if block < 4 {
                [reverb.clone(), gain.clone()]
            } else {
                [gain.clone(), reverb.clone()]
            };
            reordered.process_block(&order, &input, &mut out, 2, BS, t);
            assert_eq!(
                steady.router().bus(aux(1)),
                reordered.router().bus(aux(1)),
                "block {block}"
            );
        }
    }

    #[test]
    fn retain_drops_removed_plugins_only() {
        let mut e = engine();
        let a = volume(0.0);
        let b = PluginInstance::new(PluginKind::Delay);
        let input = ramp(1);
        let mut out = vec![0.0f32; BS];
        e.process_block(&snap(&[&a, &b]), &input, &mut out, 1, BS, 0.0);
        assert_eq!(e.context_count(), 2);

        let mut retired = Vec::new();
        e.retain(&snap(&[&b]), |state| retired.push(state.kind()));
        assert!(!e.has_context(a.id()));
        assert!(e.has_context(b.id()));
        assert_eq!(retired, vec![PluginKind::Volume]);
    }

    fn with_id(raw: u64, plugin: PluginInstance) -> PluginSnapshot {
        PluginSnapshot {
            id: PluginId::from_raw(raw),
            ..plugin.snapshot()
        }
    }

    #[test]
    fn same_id_new_kind_rebuilds_unit() {
        let mut e = engine();
        let input = vec![1.0f32; 2 * BS];
        let mut out = vec![0.0f32; 2 * BS];
        e.process_block(&[with_id(77, volume(-60.0))], &input, &mut out, 2, BS, 0.0);
        assert!((out[0] - 0.001).abs() < 1e-6);

        let inverted = with_id(77, PluginInstance::new(PluginKind::PolarityInversion));
        e.process_block(&[inverted], &input, &mut out, 2, BS, 0.0);
        assert!(out.iter().all(|&s| s == -1.0), "got {}", out[0]);
    }

    #[test]
    fn retain_retires_state_whose_kind_changed() {
        let mut e = engine();
        let input = ramp(1);
        let mut out = vec![0.0f32; BS];
        e.process_block(&[with_id(78, volume(0.0))], &input, &mut out, 1, BS, 0.0);

        let delay = with_id(78, PluginInstance::new(PluginKind::Delay));
        let mut retired = Vec::new();
        e.retain(std::slice::from_ref(&delay), |state| retired.push(state.kind()));
        assert_eq!(retired, vec![PluginKind::Volume]);
        assert_eq!(e.context_count(), 0);

        e.process_block(&[delay], &input, &mut out, 1, BS, 0.0);
        let mut kept = Vec::new();
        e.retain(&[with_id(78, PluginInstance::new(PluginKind::Delay))], |state| {
            kept.push(state.kind())
        });
        assert!(kept.is_empty());
        assert_eq!(e.context_count(), 1);
    }

    #[test]
    fn panic_resets_unit_and_stays_quiet() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let resets = Arc::new(AtomicUsize::new(0));
        let mut e = engine();
        let p = PluginInstance::new(PluginKind::Volume);
        e.install_unit(&p, Box::new(PanicsOnce { armed: true, resets: resets.clone() }));

        let input = ramp(1);
        let mut out = vec![0.0f32; BS];
        e.process_block(&snap(&[&p]), &input, &mut out, 1, BS, 0.0);
        assert_eq!(out, input);
        assert_eq!(resets.load(Ordering::Relaxed), 1);
        assert!(!IN_UNIT.with(Cell::get));

        e.process_block(&snap(&[&p]), &input, &mut out, 1, BS, 0.0);
        assert!(out.iter().zip(&input).all(|(o, x)| *o == -x));
        assert_eq!(resets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn disabled_section_skips_its_plugins() {
        let mut e = engine();
        let mut section = PluginInstance::new(PluginKind::Section);
        section.enabled = false;
        let muted = PluginInstance::new(PluginKind::Mute);
        let input = ramp(1);
        let mut out = vec![0.0f32; BS];
        e.process_block(&snap(&[&section, &muted]), &input, &mut out, 1, BS, 0.0);
        assert_eq!(out, input);
        assert_eq!(e.context_count(), 0);
    }
}
