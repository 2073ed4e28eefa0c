//! DSP engine — processing units, bus routing and block execution.
//!
//! The same code drives both the realtime executor and the offline
//! renderer. Blocks use channel-segment layout: channel `c` occupies
//! `[c * block_size, (c + 1) * block_size)`.

pub mod basics;
pub mod bus;
pub mod compressor;
pub mod delay;
pub mod engine;
pub mod eq;
pub mod fade;
pub mod filter;
pub mod renderer;
pub mod reverb;

use crate::error::ProcessingError;
use crate::plugin::{ParamSet, PluginKind};

use self::fade::FadeBank;

/// What a unit needs to know about the block it is processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockContext {
    pub sample_rate: f64,
    /// Channels in this call's block. A channel-isolated plugin sees 1.
    pub channels: usize,
    pub block_size: usize,
    /// Time of the block's first sample, in seconds.
    pub time: f64,
}

impl BlockContext {
    /// Time of sample `i` within this block.
    #[inline]
    pub fn sample_time(&self, i: usize) -> f64 {
        self.time + i as f64 / self.sample_rate
    }
}

/// A processing unit: private per-channel state plus a block transform.
///
/// Units initialize lazily on the first call and reinitialize themselves
/// whenever the sample rate or channel count in [`BlockContext`] changes.
pub trait DspUnit: Send {
    fn name(&self) -> &'static str;

    /// Transform `data` (`channels * block_size` samples) in place.
    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError>;

    /// Drop all internal state; the next call starts from silence. The
    /// engine calls this after a unit panics mid-block.
    fn reset(&mut self);
}

/// Build the unit bound to `kind`. `seed` feeds any randomized topology
/// so the same plugin builds the same unit in every executor.
/// Section markers have no unit.
pub fn create_unit(kind: PluginKind, seed: u64) -> Option<Box<dyn DspUnit>> {
    let unit: Box<dyn DspUnit> = match kind {
        PluginKind::Volume => Box::new(basics::Volume),
        PluginKind::DcOffset => Box::new(basics::DcOffset),
        PluginKind::PolarityInversion => Box::new(basics::PolarityInversion),
        PluginKind::Mute => Box::new(basics::Mute),
        PluginKind::StereoBalance => Box::new(basics::StereoBalance),
        PluginKind::RsReverb => Box::new(reverb::RsReverb::new(seed)),
        PluginKind::Delay => Box::new(delay::Delay::new()),
        PluginKind::Compressor => Box::new(compressor::Compressor::new()),
        PluginKind::HiPassFilter => Box::new(eq::PassFilter::high()),
        PluginKind::LoPassFilter => Box::new(eq::PassFilter::low()),
        PluginKind::FiveBandPeq => Box::new(eq::FiveBandPeq::new()),
        PluginKind::Section => return None,
    };
    Some(unit)
}

/// Dry and wet gains for a mix percentage.
///
/// Both gains are 1.0 at 50%: below it the dry signal stays at full gain
/// while the wet rises, above it the wet stays full while the dry falls.
#[inline]
pub fn mix_gains(mix_percent: f64) -> (f32, f32) {
    let wet = mix_percent * 0.01;
    if wet <= 0.5 {
        (1.0, (2.0 * wet) as f32)
    } else {
        ((2.0 * (1.0 - wet)) as f32, 1.0)
    }
}

#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// A fixed-length multichannel buffer, one vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn silent(sample_rate: u32, channels: usize, frames: usize) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; channels],
        }
    }

    /// Split a channel-segment buffer (`channels` equal segments).
    pub fn from_segments(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let frames = if channels == 0 { 0 } else { samples.len() / channels };
        let channels = (0..channels)
            .map(|c| samples[c * frames..(c + 1) * frames].to_vec())
            .collect();
        Self {
            sample_rate,
            channels,
        }
    }

    /// Split an interleaved buffer (`L R L R ...`).
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let mut buffer = Self::silent(sample_rate, channels, 0);
        if channels == 0 {
            return buffer;
        }
        for frame in samples.chunks_exact(channels) {
            for (ch, &s) in buffer.channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        buffer
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel (the shortest channel if they disagree).
    pub fn frames(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_law_midpoint_is_full_gain() {
        assert_eq!(mix_gains(50.0), (1.0, 1.0));
        assert_eq!(mix_gains(0.0), (1.0, 0.0));
        assert_eq!(mix_gains(100.0), (0.0, 1.0));
        let (dry, wet) = mix_gains(25.0);
        assert_eq!(dry, 1.0);
        assert!((wet - 0.5).abs() < 1e-7);
        let (dry, wet) = mix_gains(75.0);
        assert!((dry - 0.5).abs() < 1e-7);
        assert_eq!(wet, 1.0);
    }

    #[test]
    fn section_has_no_unit() {
        assert!(create_unit(PluginKind::Section, 1).is_none());
        for kind in PluginKind::all().filter(|k| !k.is_section()) {
            let unit = create_unit(kind, 1).unwrap();
            assert_eq!(unit.name(), kind.name());
        }
    }

    #[test]
    fn buffer_layout_conversions() {
        let seg = AudioBuffer::from_segments(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 48_000);
        assert_eq!(seg.channels, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let il = AudioBuffer::from_interleaved(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0], 2, 48_000);
        assert_eq!(il, seg);
        assert_eq!(seg.frames(), 3);
    }
}
