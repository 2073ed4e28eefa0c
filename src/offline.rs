//! Offline renderer — block-stepped processing of a whole buffer.
//!
//! Runs the same [`AudioEngine`] as the realtime path over a fixed-length
//! input, 128 samples at a time, with its own DSP state. Progress is
//! reported through a throttled callback and the render can be cancelled
//! between blocks from another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineConfig;
use crate::dsp::AudioBuffer;
use crate::dsp::engine::{AudioEngine, ExecutionMode};
use crate::dsp::renderer::encode_wav_24;
use crate::error::FileProcessingError;
use crate::plugin::{PluginSnapshot, effective_plugins};

/// Result of a render that did not fail.
///
/// `Cancelled` means no output was produced; it is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome<T = AudioBuffer> {
    Completed(T),
    Cancelled,
}

impl<T> RenderOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            RenderOutcome::Completed(value) => Some(value),
            RenderOutcome::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RenderOutcome<U> {
        match self {
            RenderOutcome::Completed(value) => RenderOutcome::Completed(f(value)),
            RenderOutcome::Cancelled => RenderOutcome::Cancelled,
        }
    }
}

/// Cloneable, thread-safe cancellation flag for a renderer.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Limits progress callbacks to one per interval.
///
/// `Instant` is unavailable on wasm32, where the throttle falls back to
/// reporting only when the percentage changes.
struct ProgressThrottle {
    #[cfg(not(target_arch = "wasm32"))]
    last: Option<std::time::Instant>,
    #[cfg(not(target_arch = "wasm32"))]
    interval: std::time::Duration,
    last_percent: Option<u8>,
}

impl ProgressThrottle {
    fn new(config: &EngineConfig) -> Self {
        #[cfg(target_arch = "wasm32")]
        let _ = config;
        Self {
            #[cfg(not(target_arch = "wasm32"))]
            last: None,
            #[cfg(not(target_arch = "wasm32"))]
            interval: config.progress_interval(),
            last_percent: None,
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn due(&mut self, percent: u8) -> bool {
        let now = std::time::Instant::now();
        let due = self
            .last
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
            self.last_percent = Some(percent);
        }
        due
    }

    #[cfg(target_arch = "wasm32")]
    fn due(&mut self, percent: u8) -> bool {
        let due = self.last_percent != Some(percent);
        self.last_percent = Some(percent);
        due
    }
}

/// Renders buffers through a plugin list, independent of any realtime
/// executor running the same plugins.
pub struct OfflineRenderer {
    config: EngineConfig,
    cancel: CancelHandle,
}

impl OfflineRenderer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cancel: CancelHandle::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle that cancels the render in progress.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Render `input` through the effective subset of `plugins`.
    ///
    /// `progress` receives percentages in `0..=100`, throttled, and always
    /// a final 100 on completion. A cancellation observed at a block
    /// boundary returns [`RenderOutcome::Cancelled`]. Each render starts
    /// with the cancel flag cleared, so only a cancel issued while it runs
    /// stops it.
    pub fn render(
        &self,
        input: &AudioBuffer,
        plugins: &[PluginSnapshot],
        progress: &mut dyn FnMut(u8),
    ) -> Result<RenderOutcome, FileProcessingError> {
        self.cancel.clear();
        self.render_blocks(input, plugins, progress)
    }

    /// Render without clearing the cancel flag first; a batch clears it
    /// once so that a cancel between two files still counts.
    pub(crate) fn render_blocks(
        &self,
        input: &AudioBuffer,
        plugins: &[PluginSnapshot],
        progress: &mut dyn FnMut(u8),
    ) -> Result<RenderOutcome, FileProcessingError> {
        let channels = input.channel_count();
        let frames = input.frames();
        if channels == 0 || input.sample_rate == 0 {
            return Err(FileProcessingError::UnsupportedFormat(format!(
                "{channels} channels at {} Hz",
                input.sample_rate
            )));
        }
        if frames == 0 {
            return Err(FileProcessingError::Render("input buffer is empty".into()));
        }

        let active: Vec<PluginSnapshot> = effective_plugins(plugins).cloned().collect();
        if active.is_empty() {
            log::info!("No enabled plugins, passing {frames} frames through");
            progress(100);
            return Ok(RenderOutcome::Completed(input.clone()));
        }

        log::info!(
            "Offline render: {frames} frames, {channels} channels, {} plugins",
            active.len()
        );
        let block_size = self.config.block_size;
        let sample_rate = input.sample_rate as f64;
        let mut engine = AudioEngine::new(ExecutionMode::Offline, sample_rate, self.config.fade_secs());
        engine.allocate(channels, block_size);

        let mut output = AudioBuffer::silent(input.sample_rate, channels, frames);
        let mut block_in = vec![0.0f32; channels * block_size];
        let mut block_out = vec![0.0f32; channels * block_size];
        let mut throttle = ProgressThrottle::new(&self.config);
        let yield_every = self.config.yield_every_blocks.max(1);

        for (block, offset) in (0..frames).step_by(block_size).enumerate() {
            if self.cancel.is_cancelled() {
                log::info!("Offline render cancelled at frame {offset}");
                return Ok(RenderOutcome::Cancelled);
            }
            let n = block_size.min(frames - offset);
            for (c, channel) in input.channels.iter().enumerate() {
                block_in[c * n..(c + 1) * n].copy_from_slice(&channel[offset..offset + n]);
            }

            engine.process_block(
                &active,
                &block_in[..channels * n],
                &mut block_out[..channels * n],
                channels,
                n,
                offset as f64 / sample_rate,
            );

            for (c, channel) in output.channels.iter_mut().enumerate() {
                channel[offset..offset + n].copy_from_slice(&block_out[c * n..(c + 1) * n]);
            }

            let done = offset + n;
            if done < frames {
                let percent = (done * 100 / frames).min(99) as u8;
                if throttle.due(percent) {
                    progress(percent);
                }
            }
            if (block + 1) % yield_every == 0 {
                std::thread::yield_now();
            }
        }

        progress(100);
        log::info!("Offline render finished");
        Ok(RenderOutcome::Completed(output))
    }

    /// Render and encode as 24-bit WAV.
    pub fn render_wav(
        &self,
        input: &AudioBuffer,
        plugins: &[PluginSnapshot],
        progress: &mut dyn FnMut(u8),
    ) -> Result<RenderOutcome<Vec<u8>>, FileProcessingError> {
        Ok(self
            .render(input, plugins, progress)?
            .map(|buffer| encode_wav_24(&buffer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::db_to_linear;
    use crate::plugin::{BusIndex, PluginInstance, PluginKind};
    use crate::realtime::{DeviceConfig, realtime_channel};

    fn sine(channels: usize, frames: usize) -> AudioBuffer {
        AudioBuffer {
            sample_rate: 48_000,
            channels: (0..channels)
                .map(|c| {
                    (0..frames)
                        .map(|i| ((i as f32 * 0.05) + c as f32).sin() * 0.5)
                        .collect()
                })
                .collect(),
        }
    }

    fn immediate() -> EngineConfig {
        EngineConfig {
            progress_interval_ms: 0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn no_enabled_plugins_passes_through() {
        let input = sine(2, 1000);
        let mut section = PluginInstance::new(PluginKind::Section);
        section.enabled = false;
        let plugins = vec![section.snapshot(), PluginInstance::new(PluginKind::Mute).snapshot()];

        let mut calls = Vec::new();
        let out = OfflineRenderer::new(EngineConfig::default())
            .render(&input, &plugins, &mut |p| calls.push(p))
            .unwrap();
        assert_eq!(out, RenderOutcome::Completed(input));
        assert_eq!(calls, vec![100]);
    }

    #[test]
    fn partial_last_block_is_processed() {
        let input = sine(2, 300);
        let vol = PluginInstance::new(PluginKind::Volume).with_param("vl", -6.0);
        let out = OfflineRenderer::new(EngineConfig::default())
            .render(&input, &[vol.snapshot()], &mut |_| {})
            .unwrap()
            .completed()
            .unwrap();
        let g = db_to_linear(-6.0) as f32;
        assert_eq!(out.frames(), 300);
        for c in 0..2 {
            assert_eq!(out.channels[c][299], input.channels[c][299] * g);
        }
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let input = sine(1, 128 * 20);
        let vol = PluginInstance::new(PluginKind::Volume);
        let mut calls = Vec::new();
        OfflineRenderer::new(immediate())
            .render(&input, &[vol.snapshot()], &mut |p| calls.push(p))
            .unwrap();
        assert_eq!(calls.last(), Some(&100));
        assert_eq!(calls.iter().filter(|&&p| p == 100).count(), 1);
        assert!(calls.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(calls.len(), 20);
    }

    #[test]
    fn cancellation_returns_no_output() {
        let input = sine(2, 128 * 50);
        let delay = PluginInstance::new(PluginKind::Delay);
        let renderer = OfflineRenderer::new(immediate());
        let handle = renderer.cancel_handle();
        let mut last = 0;
        let outcome = renderer
            .render(&input, &[delay.snapshot()], &mut |p| {
                last = p;
                if p >= 10 {
                    handle.cancel();
                }
            })
            .unwrap();
        assert!(outcome.is_cancelled());
        assert!(last < 100);
    }

    #[test]
    fn stale_cancel_does_not_abort_next_render() {
        let input = sine(1, 128 * 4);
        let vol = PluginInstance::new(PluginKind::Volume);
        let renderer = OfflineRenderer::new(EngineConfig::default());
        let first = renderer.render(&input, &[vol.snapshot()], &mut |_| {}).unwrap();

        renderer.cancel_handle().cancel();
        let second = renderer.render(&input, &[vol.snapshot()], &mut |_| {}).unwrap();
        assert_eq!(second, first);
        assert!(!second.is_cancelled());
    }

    #[test]
    fn empty_input_is_an_error() {
        let input = AudioBuffer::silent(48_000, 2, 0);
        let vol = PluginInstance::new(PluginKind::Volume);
        let err = OfflineRenderer::new(EngineConfig::default())
            .render(&input, &[vol.snapshot()], &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, FileProcessingError::Render(_)));
    }

    #[test]
    fn matches_realtime_block_for_block() {
        let input = sine(2, 128 * 16);
        let plugins = vec![
            PluginInstance::new(PluginKind::Delay).with_param("fb", 70.0).snapshot(),
            PluginInstance::new(PluginKind::RsReverb)
                .with_routing(BusIndex::MAIN, BusIndex::aux(1).unwrap())
                .snapshot(),
            PluginInstance::new(PluginKind::Compressor).snapshot(),
        ];

        let offline = OfflineRenderer::new(EngineConfig::default())
            .render(&input, &plugins, &mut |_| {})
            .unwrap()
            .completed()
            .unwrap();

        let (mut ctl, mut exec) = realtime_channel(&EngineConfig::default());
        exec.connect(DeviceConfig {
            sample_rate: 48_000,
            channels: 2,
            block_size: 128,
        })
        .unwrap();
        ctl.update_plugins(plugins, false).unwrap();
        let mut realtime = AudioBuffer::silent(48_000, 2, 128 * 16);
        let mut block_in = vec![0.0f32; 256];
        let mut block_out = vec![0.0f32; 256];
        for offset in (0..128 * 16).step_by(128) {
            for c in 0..2 {
                block_in[c * 128..(c + 1) * 128]
                    .copy_from_slice(&input.channels[c][offset..offset + 128]);
            }
            exec.process(&block_in, &mut block_out);
            for c in 0..2 {
                realtime.channels[c][offset..offset + 128]
                    .copy_from_slice(&block_out[c * 128..(c + 1) * 128]);
            }
        }
        assert_eq!(offline, realtime);
    }

    #[test]
    fn render_wav_encodes_completed_output() {
        let input = sine(2, 500);
        let vol = PluginInstance::new(PluginKind::Volume);
        let wav = OfflineRenderer::new(EngineConfig::default())
            .render_wav(&input, &[vol.snapshot()], &mut |_| {})
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(wav.len(), 44 + 500 * 2 * 3);
    }
}
