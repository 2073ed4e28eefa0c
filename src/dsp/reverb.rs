//! RS Reverb — random scattering reverb.
//!
//! Parallel comb filters with randomized delay lengths feed two cascaded
//! allpass diffusers; a two-stage damping filter shapes both the comb
//! feedback and the diffused output. The random delay lengths are drawn
//! once per unit from a seed and survive every reinitialization.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::ProcessingError;
use crate::plugin::ParamSet;

use super::fade::FadeBank;
use super::filter::{Damping, DampingCoeffs};
use super::{BlockContext, DspUnit, mix_gains};

/// Base comb delays in milliseconds, before randomization.
const BASE_DELAYS_MS: [f32; 8] = [19.1, 29.3, 41.5, 47.7, 23.9, 31.1, 37.3, 43.5];
const COMB_COUNT: usize = BASE_DELAYS_MS.len();
const MAX_PRE_DELAY_SECS: f64 = 0.05;
const ALLPASS_SECS: f64 = 0.005;

/// Samples needed to hold `secs` at `sample_rate`, rounded up.
fn buffer_len(secs: f64, sample_rate: f64) -> usize {
    ((secs * sample_rate).ceil() as usize).max(1)
}

/// A feedback delay line read before it is written.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn current(&self) -> f32 {
        self.buffer[self.index]
    }

    #[inline]
    fn push(&mut self, value: f32) {
        self.buffer[self.index] = value;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
    }
}

/// Allpass diffuser with output feedback.
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
    last_output: f32,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            last_output: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, diffusion: f32) -> f32 {
        let delayed = self.buffer[self.index];
        let output = -(1.0 - diffusion) * input + delayed + diffusion * self.last_output;
        self.buffer[self.index] = input;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        self.last_output = output;
        output * (1.0 - diffusion * diffusion)
    }
}

/// All state of one channel.
#[derive(Debug, Clone)]
struct ChannelState {
    pre_delay: Vec<f32>,
    pre_pos: usize,
    combs: Vec<CombFilter>,
    allpasses: [AllpassFilter; 2],
    damping: Damping,
}

impl ChannelState {
    fn new(sample_rate: f64, delays_ms: &[f32; COMB_COUNT]) -> Self {
        let allpass_len = buffer_len(ALLPASS_SECS, sample_rate);
        Self {
            pre_delay: vec![0.0; buffer_len(MAX_PRE_DELAY_SECS, sample_rate)],
            pre_pos: 0,
            combs: delays_ms
                .iter()
                .map(|&ms| CombFilter::new(buffer_len(ms as f64 * 0.001, sample_rate)))
                .collect(),
            allpasses: [AllpassFilter::new(allpass_len), AllpassFilter::new(allpass_len)],
            damping: Damping::default(),
        }
    }

    /// Write `input` and read it back `delay` samples later.
    #[inline]
    fn pre_delay(&mut self, input: f32, delay: usize) -> f32 {
        let len = self.pre_delay.len();
        self.pre_delay[self.pre_pos] = input;
        let out = self.pre_delay[(self.pre_pos + len - delay) % len];
        self.pre_pos += 1;
        if self.pre_pos == len {
            self.pre_pos = 0;
        }
        out
    }
}

/// Per-block values derived from parameters.
struct Coeffs {
    pre_delay: usize,
    active_combs: usize,
    normalization: f32,
    diffusion: f32,
    damping: DampingCoeffs,
    feedback: [f32; COMB_COUNT],
    dry: f32,
    wet: f32,
}

#[derive(Debug, Clone)]
pub struct RsReverb {
    delays_ms: [f32; COMB_COUNT],
    sample_rate: f64,
    channels: Vec<ChannelState>,
}

impl RsReverb {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut delays_ms = BASE_DELAYS_MS;
        for d in &mut delays_ms {
            *d += rng.random::<f32>();
        }
        Self {
            delays_ms,
            sample_rate: 0.0,
            channels: Vec::new(),
        }
    }

    /// Comb delay lengths in milliseconds.
    pub fn delays_ms(&self) -> &[f32; COMB_COUNT] {
        &self.delays_ms
    }

    fn ensure_state(&mut self, ctx: &BlockContext) {
        if self.sample_rate != ctx.sample_rate || self.channels.len() != ctx.channels {
            self.sample_rate = ctx.sample_rate;
            self.channels = (0..ctx.channels)
                .map(|_| ChannelState::new(ctx.sample_rate, &self.delays_ms))
                .collect();
        }
    }

    fn coeffs(&self, params: &ParamSet) -> Coeffs {
        let pd = params.number_clamped("pd", 10.0, 0.0, 50.0);
        let rs = params.number_clamped("rs", 10.0, 2.0, 50.0);
        let rt = params.number_clamped("rt", 2.4, 0.1, 10.0);
        let ds = params.number_clamped("ds", 8.0, 4.0, 8.0).floor() as usize;
        let df = params.number_clamped("df", 0.7, 0.2, 0.8) as f32;
        let dp = params.number_clamped("dp", 80.0, 0.0, 100.0);
        let hd = params.number_clamped("hd", 2000.0, 1000.0, 20_000.0);
        let ld = params.number_clamped("ld", 200.0, 20.0, 500.0);
        let mx = params.number_clamped("mx", 16.0, 0.0, 100.0);

        let max_pre = self.channels.first().map_or(1, |c| c.pre_delay.len());
        let pre_delay = ((pd * 0.001 * self.sample_rate) as usize).min(max_pre - 1);

        let active_combs = ds.min(COMB_COUNT);
        let room_scale = rs * 0.1;
        let mut feedback = [0.0f32; COMB_COUNT];
        for (gain, &ms) in feedback.iter_mut().zip(&self.delays_ms) {
            let decay = 0.001_f64.powf(ms as f64 * 0.001 / rt);
            *gain = (decay * room_scale).clamp(-0.9, 0.9) as f32;
        }
        let (dry, wet) = mix_gains(mx);

        Coeffs {
            pre_delay,
            active_combs,
            normalization: if active_combs > 0 { 0.4 / active_combs as f32 } else { 0.0 },
            diffusion: df,
            damping: DampingCoeffs::guarded(hd, ld, dp, self.sample_rate),
            feedback,
            dry,
            wet,
        }
    }
}

impl DspUnit for RsReverb {
    fn name(&self) -> &'static str {
        "RS Reverb"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        self.ensure_state(ctx);
        let c = self.coeffs(params);
        let damp = c.damping.is_active();

        for (ch, state) in self.channels.iter_mut().enumerate() {
            let segment = &mut data[ch * ctx.block_size..(ch + 1) * ctx.block_size];
            for sample in segment.iter_mut() {
                let input = *sample;
                let delayed_input = state.pre_delay(input, c.pre_delay);

                let mut comb_sum = 0.0f32;
                for (comb, &gain) in state.combs[..c.active_combs].iter_mut().zip(&c.feedback) {
                    let delayed = comb.current();
                    let fed_back = if damp {
                        state.damping.smooth(delayed, &c.damping)
                    } else {
                        delayed
                    };
                    comb.push(delayed_input + fed_back * gain);
                    comb_sum += delayed;
                }

                let mut wet = comb_sum * c.normalization;
                for ap in &mut state.allpasses {
                    wet = ap.process(wet, c.diffusion);
                }
                if damp {
                    wet = state.damping.smooth(wet, &c.damping);
                }

                *sample = input * c.dry + wet * c.wet;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sample_rate = 0.0;
        self.channels.clear();
    }
}
