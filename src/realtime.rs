//! Realtime executor — the audio-callback side of the pipeline.
//!
//! The control side owns a [`PipelineController`] and pushes immutable
//! [`Command`]s into a lock-free SPSC ring. The audio callback owns the
//! [`RealtimeExecutor`], drains the ring at the start of every block, and
//! then runs the block through its own [`AudioEngine`]. Commands are never
//! applied mid-block, so every block sees one consistent plugin list.
//!
//! Status notifications (state transitions, sleep mode) travel back on a
//! second ring and are polled by the control side. A third ring returns
//! replaced plugin lists and removed DSP state, so their memory is freed
//! on the control side rather than in the audio callback.

use rtrb::{Consumer, Producer, PushError, RingBuffer};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dsp::engine::{AudioEngine, ExecutionMode, RetiredState};
use crate::error::DeviceError;
use crate::plugin::PluginSnapshot;

/// Highest channel count a channel selector can address.
pub const MAX_CHANNELS: usize = 8;
const MAX_SAMPLE_RATE: u32 = 768_000;
const STATUS_QUEUE_CAPACITY: usize = 64;
const RETIRED_QUEUE_CAPACITY: usize = 256;

// ── Commands ────────────────────────────────────────────────

/// A mutation sent from the control side, applied at a block boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace the whole plugin list. DSP state of plugins whose id is
    /// still present is kept.
    UpdatePlugins {
        plugins: Vec<PluginSnapshot>,
        master_bypass: bool,
    },
    /// Update one plugin in place, matched by id.
    UpdatePlugin(PluginSnapshot),
    SetMasterBypass(bool),
    /// The user touched the UI; resets the inactivity timer.
    UserActivity,
}

/// Control message as it appears on the wire.
///
/// Either `{ plugins: [...], masterBypass }` or `{ plugin: {...} }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlMessage {
    Plugins {
        plugins: Vec<PluginSnapshot>,
        #[serde(rename = "masterBypass", default)]
        master_bypass: bool,
    },
    Plugin { plugin: PluginSnapshot },
}

impl ControlMessage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<ControlMessage> for Command {
    fn from(msg: ControlMessage) -> Self {
        match msg {
            ControlMessage::Plugins {
                plugins,
                master_bypass,
            } => Command::UpdatePlugins {
                plugins,
                master_bypass,
            },
            ControlMessage::Plugin { plugin } => Command::UpdatePlugin(plugin),
        }
    }
}

// ── Status ──────────────────────────────────────────────────

/// Lifecycle of the realtime executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// No device open.
    Idle,
    /// Device open and buses allocated, but no plugins yet.
    Connected,
    /// Processing blocks through the plugin list.
    Running,
    /// Master bypass: input goes straight to output.
    Bypassed,
}

/// Notification from the audio side to the control side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    StateChanged(ExecutorState),
    SleepModeChanged(bool),
}

/// Heap data the audio side is done with.
#[derive(Debug)]
pub enum Retired {
    /// A plugin list replaced by `UpdatePlugins`.
    Plugins(Vec<PluginSnapshot>),
    /// A plugin replaced by `UpdatePlugin`.
    Plugin(PluginSnapshot),
    /// DSP state of a removed plugin, or of an id that changed kind.
    State(RetiredState),
}

// ── Device ──────────────────────────────────────────────────

/// Shape of the audio device the executor is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: usize,
    /// Nominal callback block size. Callbacks may deliver shorter blocks.
    pub block_size: usize,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.sample_rate == 0 || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(DeviceError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(DeviceError::InvalidChannelCount(self.channels));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(DeviceError::InvalidBlockSize(self.block_size));
        }
        Ok(())
    }
}

// ── Sleep mode ──────────────────────────────────────────────

/// Tracks input silence, output silence and user inactivity.
///
/// Sleep starts once all three exceed the configured duration. Input
/// signal above the threshold, or user activity, ends it.
#[derive(Debug, Clone)]
struct ActivityMonitor {
    threshold: f32,
    after_secs: f64,
    input_silent_secs: f64,
    output_silent_secs: f64,
    inactive_secs: f64,
    sleeping: bool,
}

fn peak(block: &[f32]) -> f32 {
    block.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

impl ActivityMonitor {
    fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.sleep_threshold(),
            after_secs: config.sleep_after_secs,
            input_silent_secs: 0.0,
            output_silent_secs: 0.0,
            inactive_secs: 0.0,
            sleeping: false,
        }
    }

    fn reset(&mut self) {
        self.input_silent_secs = 0.0;
        self.output_silent_secs = 0.0;
        self.inactive_secs = 0.0;
        self.sleeping = false;
    }

    /// Returns `Some(false)` when signal on the input wakes the executor.
    fn observe_input(&mut self, input: &[f32], dt: f64) -> Option<bool> {
        self.inactive_secs += dt;
        if peak(input) > self.threshold {
            self.input_silent_secs = 0.0;
            if self.sleeping {
                self.sleeping = false;
                self.output_silent_secs = 0.0;
                return Some(false);
            }
        } else {
            self.input_silent_secs += dt;
        }
        None
    }

    /// Returns `Some(true)` when the executor should go to sleep.
    fn observe_output(&mut self, output: &[f32], dt: f64) -> Option<bool> {
        if peak(output) > self.threshold {
            self.output_silent_secs = 0.0;
        } else {
            self.output_silent_secs += dt;
        }
        if !self.sleeping
            && self.input_silent_secs > self.after_secs
            && self.output_silent_secs > self.after_secs
            && self.inactive_secs > self.after_secs
        {
            self.sleeping = true;
            return Some(true);
        }
        None
    }

    fn user_activity(&mut self) -> Option<bool> {
        self.inactive_secs = 0.0;
        if self.sleeping {
            self.sleeping = false;
            self.input_silent_secs = 0.0;
            self.output_silent_secs = 0.0;
            return Some(false);
        }
        None
    }
}

// ── Endpoints ───────────────────────────────────────────────

/// Create the control-side and audio-side endpoints of one pipeline.
pub fn realtime_channel(config: &EngineConfig) -> (PipelineController, RealtimeExecutor) {
    let (command_tx, command_rx) = RingBuffer::new(config.command_queue_capacity.max(1));
    let (status_tx, status_rx) = RingBuffer::new(STATUS_QUEUE_CAPACITY);
    let (retired_tx, retired_rx) = RingBuffer::new(RETIRED_QUEUE_CAPACITY);
    let controller = PipelineController {
        commands: command_tx,
        status: status_rx,
        retired: retired_rx,
    };
    let executor = RealtimeExecutor {
        state: ExecutorState::Idle,
        device: None,
        engine: AudioEngine::new(ExecutionMode::Realtime, 0.0, config.fade_secs()),
        plugins: Vec::new(),
        master_bypass: false,
        commands: command_rx,
        status: status_tx,
        retired: retired_tx,
        activity: ActivityMonitor::new(config),
        time: 0.0,
    };
    (controller, executor)
}

/// Control-side handle. Never blocks.
pub struct PipelineController {
    commands: Producer<Command>,
    status: Consumer<StatusEvent>,
    retired: Consumer<Retired>,
}

impl PipelineController {
    /// Queue a command. A full ring hands the command back.
    ///
    /// Frees whatever the audio side has retired since the last call.
    pub fn send(&mut self, command: Command) -> Result<(), PushError<Command>> {
        self.collect_retired();
        self.commands.push(command)
    }

    /// Drop everything the audio side has handed back; returns the count.
    pub fn collect_retired(&mut self) -> usize {
        std::iter::from_fn(|| self.retired.pop().ok()).count()
    }

    pub fn send_message(&mut self, msg: ControlMessage) -> Result<(), PushError<Command>> {
        self.send(msg.into())
    }

    pub fn update_plugins(
        &mut self,
        plugins: Vec<PluginSnapshot>,
        master_bypass: bool,
    ) -> Result<(), PushError<Command>> {
        self.send(Command::UpdatePlugins {
            plugins,
            master_bypass,
        })
    }

    pub fn update_plugin(&mut self, plugin: PluginSnapshot) -> Result<(), PushError<Command>> {
        self.send(Command::UpdatePlugin(plugin))
    }

    pub fn set_master_bypass(&mut self, bypass: bool) -> Result<(), PushError<Command>> {
        self.send(Command::SetMasterBypass(bypass))
    }

    pub fn user_activity(&mut self) -> Result<(), PushError<Command>> {
        self.send(Command::UserActivity)
    }

    /// Next pending status notification, if any.
    pub fn poll_status(&mut self) -> Option<StatusEvent> {
        self.status.pop().ok()
    }
}

/// Audio-side executor. Owned by the audio callback.
pub struct RealtimeExecutor {
    state: ExecutorState,
    device: Option<DeviceConfig>,
    engine: AudioEngine,
    plugins: Vec<PluginSnapshot>,
    master_bypass: bool,
    commands: Consumer<Command>,
    status: Producer<StatusEvent>,
    retired: Producer<Retired>,
    activity: ActivityMonitor,
    /// Stream time of the next block, in seconds.
    time: f64,
}

impl RealtimeExecutor {
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn device(&self) -> Option<DeviceConfig> {
        self.device
    }

    pub fn plugins(&self) -> &[PluginSnapshot] {
        &self.plugins
    }

    pub fn master_bypass(&self) -> bool {
        self.master_bypass
    }

    pub fn is_sleeping(&self) -> bool {
        self.activity.sleeping
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    /// Open the device. A different shape than the current device tears
    /// down every bus and every plugin's DSP state.
    ///
    /// On error the executor is left `Idle`.
    pub fn connect(&mut self, device: DeviceConfig) -> Result<(), DeviceError> {
        if let Err(e) = device.validate() {
            log::error!("Device connection failed: {e}");
            self.teardown();
            return Err(e);
        }
        if self.device == Some(device) {
            return Ok(());
        }
        if self.device.is_some() {
            log::info!("Device changed, resetting all DSP state");
        }
        self.engine
            .reset(device.sample_rate as f64, device.channels, device.block_size);
        self.activity.reset();
        self.time = 0.0;
        self.device = Some(device);
        log::info!(
            "Connected: {} Hz, {} channels, {} frames",
            device.sample_rate,
            device.channels,
            device.block_size
        );
        self.refresh_state();
        Ok(())
    }

    /// Close the device and drop all DSP state. The plugin list is kept.
    pub fn disconnect(&mut self) {
        if self.device.is_some() {
            log::info!("Disconnected");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.device = None;
        self.engine.reset(0.0, 0, 0);
        self.activity.reset();
        self.refresh_state();
    }

    fn notify(&mut self, event: StatusEvent) {
        // A full status ring drops the event; the audio side never waits.
        let _ = self.status.push(event);
    }

    fn retire(&mut self, item: Retired) {
        // A full ring frees the item here instead.
        let _ = self.retired.push(item);
    }

    /// Drop DSP state no longer matching the plugin list.
    fn retain_states(&mut self) {
        let retired = &mut self.retired;
        self.engine.retain(&self.plugins, |state| {
            let _ = retired.push(Retired::State(state));
        });
    }

    fn refresh_state(&mut self) {
        let next = match self.device {
            None => ExecutorState::Idle,
            Some(_) if self.plugins.is_empty() => ExecutorState::Connected,
            Some(_) if self.master_bypass => ExecutorState::Bypassed,
            Some(_) => ExecutorState::Running,
        };
        if next != self.state {
            log::debug!("Executor state {:?} -> {:?}", self.state, next);
            self.state = next;
            self.notify(StatusEvent::StateChanged(next));
        }
    }

    fn set_bypass(&mut self, bypass: bool) {
        if bypass != self.master_bypass {
            log::info!("Master bypass {}", if bypass { "on" } else { "off" });
            self.master_bypass = bypass;
        }
    }

    fn set_sleeping(&mut self, change: Option<bool>) {
        if let Some(sleeping) = change {
            log::info!("Sleep mode {}", if sleeping { "entered" } else { "exited" });
            self.notify(StatusEvent::SleepModeChanged(sleeping));
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::UpdatePlugins {
                plugins,
                master_bypass,
            } => {
                let previous = std::mem::replace(&mut self.plugins, plugins);
                if previous.capacity() > 0 {
                    self.retire(Retired::Plugins(previous));
                }
                self.retain_states();
                self.set_bypass(master_bypass);
            }
            Command::UpdatePlugin(plugin) => {
                let Some(slot) = self.plugins.iter_mut().find(|p| p.id == plugin.id) else {
                    return;
                };
                let previous = std::mem::replace(slot, plugin);
                let kind_changed = previous.kind != slot.kind;
                self.retire(Retired::Plugin(previous));
                if kind_changed {
                    self.retain_states();
                }
            }
            Command::SetMasterBypass(bypass) => self.set_bypass(bypass),
            Command::UserActivity => {
                let change = self.activity.user_activity();
                self.set_sleeping(change);
            }
        }
    }

    /// Apply every queued command. Called at the top of each block.
    pub fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply(command);
        }
        self.refresh_state();
    }

    /// Process one callback block in channel-segment layout.
    ///
    /// `input` and `output` must have the same length, a multiple of the
    /// device channel count. Without a device the input is copied through.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.drain_commands();
        let len = input.len().min(output.len());
        let Some(device) = self.device else {
            output[..len].copy_from_slice(&input[..len]);
            return;
        };
        let channels = device.channels;
        let block_size = len / channels;
        let len = block_size * channels;
        let dt = block_size as f64 / device.sample_rate as f64;

        let woke = self.activity.observe_input(&input[..len], dt);
        self.set_sleeping(woke);

        let pass_through = self.master_bypass || self.activity.sleeping || self.plugins.is_empty();
        if pass_through {
            output[..len].copy_from_slice(&input[..len]);
        } else {
            self.engine.process_block(
                &self.plugins,
                &input[..len],
                &mut output[..len],
                channels,
                block_size,
                self.time,
            );
        }

        let slept = self.activity.observe_output(&output[..len], dt);
        self.set_sleeping(slept);
        self.time += dt;
    }
}
