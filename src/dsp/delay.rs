//! Delay effect — multichannel feedback delay with damping and ping-pong.
//!
//! Each channel owns a pre-delay line (up to 100 ms) and a main delay line
//! (up to 5 s). The feedback path runs through the one-pole damping chain.
//! For stereo blocks the feedback source of the first two channels can be
//! blended from independent, through mono, to fully crossed (ping-pong).

use crate::error::ProcessingError;
use crate::plugin::ParamSet;

use super::fade::FadeBank;
use super::filter::{Damping, DampingCoeffs};
use super::{BlockContext, DspUnit, mix_gains};

const MAX_PRE_DELAY_SECS: f64 = 0.1;
const MAX_DELAY_SECS: f64 = 5.0;

#[derive(Debug, Clone)]
struct DelayLine {
    pre: Vec<f32>,
    pre_pos: usize,
    line: Vec<f32>,
    pos: usize,
    damping: Damping,
}

impl DelayLine {
    fn new(sample_rate: f64) -> Self {
        let pre_len = ((sample_rate * MAX_PRE_DELAY_SECS).ceil() as usize).max(1);
        let line_len = ((sample_rate * MAX_DELAY_SECS).ceil() as usize).max(1);
        Self {
            pre: vec![0.0; pre_len],
            pre_pos: 0,
            line: vec![0.0; line_len],
            pos: 0,
            damping: Damping::default(),
        }
    }

    /// Store `input` and return it `delay` samples later.
    #[inline]
    fn pre_delay(&mut self, input: f32, delay: usize) -> f32 {
        let len = self.pre.len();
        self.pre[self.pre_pos] = input;
        let out = self.pre[(self.pre_pos + len - delay) % len];
        self.pre_pos += 1;
        if self.pre_pos == len {
            self.pre_pos = 0;
        }
        out
    }

    /// Sample written `delay` samples ago (1..=len).
    #[inline]
    fn read(&self, delay: usize) -> f32 {
        let len = self.line.len();
        self.line[(self.pos + len - delay) % len]
    }

    #[inline]
    fn write(&mut self, value: f32) {
        self.line[self.pos] = value;
        self.pos += 1;
        if self.pos == self.line.len() {
            self.pos = 0;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Delay {
    sample_rate: f64,
    lines: Vec<DelayLine>,
}

impl Delay {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_state(&mut self, ctx: &BlockContext) {
        if self.sample_rate != ctx.sample_rate || self.lines.len() != ctx.channels {
            self.sample_rate = ctx.sample_rate;
            self.lines = (0..ctx.channels)
                .map(|_| DelayLine::new(ctx.sample_rate))
                .collect();
        }
    }
}

/// Feedback sources for a stereo pair at ping-pong amount `pp` in `[0, 1]`.
#[inline]
fn ping_pong(left: f32, right: f32, pp: f32) -> (f32, f32) {
    let mono = (left + right) * 0.5;
    if pp <= 0.5 {
        let r = pp * 2.0;
        (left * (1.0 - r) + mono * r, right * (1.0 - r) + mono * r)
    } else {
        let r = (pp - 0.5) * 2.0;
        (mono * (1.0 - r) + right * r, mono * (1.0 - r) + left * r)
    }
}

impl DspUnit for Delay {
    fn name(&self) -> &'static str {
        "Delay"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        self.ensure_state(ctx);
        let Some(first) = self.lines.first() else {
            return Ok(());
        };
        let sr = ctx.sample_rate;
        let pd = params.number_clamped("pd", 0.0, 0.0, 100.0);
        let ds = params.number_clamped("ds", 150.0, 1.0, 5000.0);
        let dp = params.number_clamped("dp", 50.0, 0.0, 100.0);
        let hd = params.number_clamped("hd", 5000.0, 1000.0, 20_000.0);
        let ld = params.number_clamped("ld", 100.0, 20.0, 1000.0);
        let mx = params.number_clamped("mx", 16.0, 0.0, 100.0);
        let fb = params.number_clamped("fb", 50.0, 0.0, 99.0);
        let pp = params.number_clamped("pp", 0.0, 0.0, 100.0) as f32 * 0.01;

        let pre_samples = ((pd * sr * 0.001).floor() as usize).min(first.pre.len() - 1);
        let delay_samples = ((ds * sr * 0.001).floor() as usize).clamp(1, first.line.len());
        let damping = DampingCoeffs::floored(hd, ld, dp, sr);
        let feedback = (fb * 0.01) as f32;
        let (dry, wet) = mix_gains(mx);
        let stereo = ctx.channels == 2;
        let bs = ctx.block_size;

        for i in 0..bs {
            // Damped feedback for the stereo pair, computed before either
            // line advances.
            let mut pair = [(0.0f32, 0.0f32); 2];
            if stereo {
                let d0 = self.lines[0].read(delay_samples);
                let d1 = self.lines[1].read(delay_samples);
                let (s0, s1) = ping_pong(d0, d1, pp);
                pair[0] = (d0, self.lines[0].damping.feedback(s0, &damping));
                pair[1] = (d1, self.lines[1].damping.feedback(s1, &damping));
            }

            for (ch, line) in self.lines.iter_mut().enumerate() {
                let idx = ch * bs + i;
                let input = data[idx];
                let pre = line.pre_delay(input, pre_samples);

                let (delayed, damped) = if stereo {
                    pair[ch]
                } else {
                    let d = line.read(delay_samples);
                    (d, line.damping.feedback(d, &damping))
                };

                line.write(pre + damped * feedback);
                data[idx] = input * dry + delayed * wet;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.sample_rate = 0.0;
        self.lines.clear();
    }
}
