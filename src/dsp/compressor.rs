//! Compressor effect — feed-forward dynamics processing.
//!
//! Each channel runs its own peak envelope follower with separate attack
//! and release times. Gain reduction follows a soft-knee curve around the
//! threshold, then makeup gain is applied.

use crate::error::ProcessingError;
use crate::plugin::ParamSet;

use super::fade::FadeBank;
use super::{BlockContext, DspUnit, db_to_linear};

const MIN_ENVELOPE: f32 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct Compressor {
    envelopes: Vec<f32>,
}

/// Per-block curve parameters.
struct Curve {
    threshold: f64,
    half_knee: f64,
    knee: f64,
    slope: f64,
    makeup: f64,
}

impl Curve {
    fn from_params(params: &ParamSet) -> Self {
        let ratio = params.number_clamped("rt", 2.0, 1.0, 20.0);
        let knee = params.number_clamped("kn", 3.0, 0.0, 12.0);
        Self {
            threshold: params.number_clamped("th", -24.0, -60.0, 0.0),
            half_knee: knee * 0.5,
            knee,
            slope: if ratio == 1.0 { 0.0 } else { 1.0 - 1.0 / ratio },
            makeup: params.number_clamped("gn", 0.0, -12.0, 12.0),
        }
    }

    /// Gain reduction in dB (non-negative) for an envelope level in dB.
    #[inline]
    fn reduction(&self, level_db: f64) -> f64 {
        let diff = level_db - self.threshold;
        if diff <= -self.half_knee {
            0.0
        } else if diff >= self.half_knee {
            diff * self.slope
        } else {
            let t = (diff + self.half_knee) / self.knee;
            self.slope * self.knee * t * t * 0.5
        }
    }
}

#[inline]
fn linear_to_db(linear: f32) -> f64 {
    20.0 * (linear.max(MIN_ENVELOPE) as f64).log10()
}

/// One-pole coefficient reaching half the target in `ms` milliseconds.
fn half_life_coeff(ms: f64, sample_rate: f64) -> f32 {
    let samples = (ms * sample_rate / 1000.0).max(1.0);
    (-std::f64::consts::LN_2 / samples).exp() as f32
}

impl Compressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DspUnit for Compressor {
    fn name(&self) -> &'static str {
        "Compressor"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        if self.envelopes.len() != ctx.channels {
            self.envelopes = vec![MIN_ENVELOPE; ctx.channels];
        }
        let curve = Curve::from_params(params);
        let attack = half_life_coeff(params.number_clamped("at", 10.0, 0.1, 100.0), ctx.sample_rate);
        let release =
            half_life_coeff(params.number_clamped("rl", 100.0, 10.0, 1000.0), ctx.sample_rate);

        for (ch, envelope) in self.envelopes.iter_mut().enumerate() {
            let segment = &mut data[ch * ctx.block_size..(ch + 1) * ctx.block_size];
            for sample in segment.iter_mut() {
                let level = sample.abs();
                let coeff = if level > *envelope { attack } else { release };
                *envelope = *envelope * coeff + level * (1.0 - coeff);

                let reduction = curve.reduction(linear_to_db(*envelope));
                *sample *= db_to_linear(curve.makeup - reduction) as f32;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelopes.clear();
    }
}
