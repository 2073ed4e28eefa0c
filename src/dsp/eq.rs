//! EQ units: cascaded Butterworth pass filters and a five band parametric
//! equalizer, built from biquad sections.
//!
//! Section state is kept per channel and rebuilt whenever the sample rate
//! or channel count changes (or, for the pass filters, the slope).

use std::f64::consts::FRAC_1_SQRT_2;

use crate::error::ProcessingError;
use crate::plugin::ParamSet;

use super::fade::FadeBank;
use super::filter::{BiquadCoeffs, BiquadKind, BiquadState};
use super::{BlockContext, DspUnit};

/// Slopes in dB/oct; each 12 dB step is one Butterworth section.
const SLOPES: [i64; 9] = [0, -12, -24, -36, -48, -60, -72, -84, -96];
const DEFAULT_SLOPE: i64 = -24;

/// Sections needed for the `sl` parameter. Off-grid slopes use the default.
fn stage_count(params: &ParamSet) -> usize {
    let slope = params
        .number("sl")
        .filter(|v| v.is_finite())
        .map(|v| v as i64)
        .filter(|s| SLOPES.contains(s))
        .unwrap_or(DEFAULT_SLOPE);
    (slope.unsigned_abs() / 12) as usize
}

/// Hi Pass / Lo Pass filter: cutoff `fr` (1..=40000 Hz) and slope `sl`.
#[derive(Debug, Clone)]
pub struct PassFilter {
    name: &'static str,
    response: BiquadKind,
    sample_rate: f64,
    channels: usize,
    stages: usize,
    /// `channels * stages` states, channel-major.
    states: Vec<BiquadState>,
}

impl PassFilter {
    pub fn high() -> Self {
        Self::new("Hi Pass Filter", BiquadKind::Highpass)
    }

    pub fn low() -> Self {
        Self::new("Lo Pass Filter", BiquadKind::Lowpass)
    }

    fn new(name: &'static str, response: BiquadKind) -> Self {
        Self {
            name,
            response,
            sample_rate: 0.0,
            channels: 0,
            stages: 0,
            states: Vec::new(),
        }
    }

    fn ensure_state(&mut self, ctx: &BlockContext, stages: usize) {
        if self.sample_rate != ctx.sample_rate
            || self.channels != ctx.channels
            || self.stages != stages
        {
            self.sample_rate = ctx.sample_rate;
            self.channels = ctx.channels;
            self.stages = stages;
            self.states = vec![BiquadState::default(); ctx.channels * stages];
        }
    }
}

impl DspUnit for PassFilter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        let stages = stage_count(params);
        self.ensure_state(ctx, stages);
        if stages == 0 || ctx.block_size == 0 {
            return Ok(());
        }
        let cutoff = params.number_clamped("fr", 1000.0, 1.0, 40_000.0);
        let coeffs =
            BiquadCoeffs::design(self.response, cutoff, FRAC_1_SQRT_2, 0.0, ctx.sample_rate);

        for (segment, sections) in data
            .chunks_exact_mut(ctx.block_size)
            .zip(self.states.chunks_exact_mut(stages))
        {
            for sample in segment {
                let mut x = *sample as f64;
                for section in sections.iter_mut() {
                    x = section.process(&coeffs, x);
                }
                *sample = x as f32;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sample_rate = 0.0;
        self.channels = 0;
        self.states.clear();
    }
}

const BANDS: usize = 5;
const BAND_KEYS: [[&str; 4]; BANDS] = [
    ["f0", "g0", "q0", "t0"],
    ["f1", "g1", "q1", "t1"],
    ["f2", "g2", "q2", "t2"],
    ["f3", "g3", "q3", "t3"],
    ["f4", "g4", "q4", "t4"],
];
const BAND_HZ: [f64; BANDS] = [100.0, 316.0, 1000.0, 3160.0, 10_000.0];

/// 5 Band PEQ. Band `n` reads frequency `fn` (20..=20000 Hz), gain `gn`
/// (±18 dB), Q `qn` (0.1..=10) and type `tn` (`pk lp hp ls hs bp`; unknown
/// codes act as peaking).
#[derive(Debug, Clone, Default)]
pub struct FiveBandPeq {
    sample_rate: f64,
    states: Vec<[BiquadState; BANDS]>,
}

impl FiveBandPeq {
    pub fn new() -> Self {
        Self::default()
    }

    fn band(params: &ParamSet, band: usize, sample_rate: f64) -> BiquadCoeffs {
        let [f, g, q, t] = BAND_KEYS[band];
        let kind = params
            .text(t)
            .and_then(BiquadKind::from_code)
            .unwrap_or(BiquadKind::Peaking);
        BiquadCoeffs::design(
            kind,
            params.number_clamped(f, BAND_HZ[band], 20.0, 20_000.0),
            params.number_clamped(q, 1.0, 0.1, 10.0),
            params.number_clamped(g, 0.0, -18.0, 18.0),
            sample_rate,
        )
    }
}

impl DspUnit for FiveBandPeq {
    fn name(&self) -> &'static str {
        "5Band PEQ"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        if self.sample_rate != ctx.sample_rate || self.states.len() != ctx.channels {
            self.sample_rate = ctx.sample_rate;
            self.states = vec![[BiquadState::default(); BANDS]; ctx.channels];
        }
        if ctx.block_size == 0 {
            return Ok(());
        }
        let coeffs: [BiquadCoeffs; BANDS] =
            std::array::from_fn(|band| Self::band(params, band, ctx.sample_rate));

        for (segment, sections) in data.chunks_exact_mut(ctx.block_size).zip(&mut self.states) {
            for sample in segment {
                let mut x = *sample as f64;
                for (section, c) in sections.iter_mut().zip(&coeffs) {
                    x = section.process(c, x);
                }
                *sample = x as f32;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sample_rate = 0.0;
        self.states.clear();
    }
}
