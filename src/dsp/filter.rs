//! Filters shared by the effect units.
//!
//! - Biquad sections (Audio EQ Cookbook, R. Bristow-Johnson) for the EQ
//!   family: low/high pass, band pass, peaking and shelving responses.
//! - One-pole damping used in reverb and delay feedback paths: a low-pass
//!   ("high damp") followed by a high-pass-derived stage ("low damp"),
//!   blended against the undamped signal by an amount in `[0, 1]`.

use std::f64::consts::{PI, TAU};

/// Per-block damping coefficients, recomputed from parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampingCoeffs {
    /// Low-pass pole for the high-damp stage.
    pub hd: f32,
    /// High-pass coefficient for the low-damp stage.
    pub ld: f32,
    /// Blend amount, 0 = undamped.
    pub amount: f32,
}

impl DampingCoeffs {
    /// Coefficients for the reverb flavour. A cutoff at or beyond Nyquist
    /// (or non-positive) disables that stage.
    pub fn guarded(high_hz: f64, low_hz: f64, damp_percent: f64, sample_rate: f64) -> Self {
        let sr = if sample_rate > 0.0 { sample_rate } else { 44_100.0 };
        let nyquist = sr * 0.5;
        let hd = if high_hz <= 0.0 || high_hz >= nyquist {
            0.0
        } else {
            (-TAU * high_hz / sr).exp()
        };
        let ld = if low_hz <= 0.0 || low_hz >= nyquist {
            0.0
        } else {
            1.0 - (-TAU * low_hz / sr).exp()
        };
        Self {
            hd: hd as f32,
            ld: ld as f32,
            amount: (damp_percent * 0.01) as f32,
        }
    }

    /// Coefficients for the delay flavour; cutoffs are floored at 1 Hz.
    pub fn floored(high_hz: f64, low_hz: f64, damp_percent: f64, sample_rate: f64) -> Self {
        let hd = (-TAU * high_hz.max(1.0) / sample_rate).exp();
        let ld = 1.0 - (-TAU * low_hz.max(1.0) / sample_rate).exp();
        Self {
            hd: hd as f32,
            ld: ld as f32,
            amount: (damp_percent * 0.01) as f32,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.amount > 1e-6
    }
}

/// State of one damping chain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Damping {
    hd_state: f32,
    ld_state: f32,
}

impl Damping {
    /// Smoothing form: both stages pull the signal toward their state.
    #[inline]
    pub fn smooth(&mut self, x: f32, c: &DampingCoeffs) -> f32 {
        let hd = x + c.hd * (self.hd_state - x);
        let ld = hd + c.ld * (self.ld_state - hd);
        self.hd_state = hd;
        self.ld_state = ld;
        x * (1.0 - c.amount) + ld * c.amount
    }

    /// Feedback form: one-pole low-pass, then a one-pole high-pass on the
    /// difference between the low-passed and raw signal.
    #[inline]
    pub fn feedback(&mut self, x: f32, c: &DampingCoeffs) -> f32 {
        self.hd_state = x * (1.0 - c.hd) + self.hd_state * c.hd;
        self.ld_state = c.ld * (self.ld_state + self.hd_state - x);
        x * (1.0 - c.amount) + self.ld_state * c.amount
    }
}

// ── Biquad ──────────────────────────────────────────────────

/// Response shape of one biquad section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    Lowpass,
    Highpass,
    Bandpass,
    Peaking,
    LowShelf,
    HighShelf,
}

impl BiquadKind {
    /// Parse a band type code (`pk`, `lp`, `hp`, `ls`, `hs`, `bp`).
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "pk" => Some(BiquadKind::Peaking),
            "lp" => Some(BiquadKind::Lowpass),
            "hp" => Some(BiquadKind::Highpass),
            "ls" => Some(BiquadKind::LowShelf),
            "hs" => Some(BiquadKind::HighShelf),
            "bp" => Some(BiquadKind::Bandpass),
            _ => None,
        }
    }
}

/// Normalized biquad coefficients (`a0 == 1`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    pub const IDENTITY: BiquadCoeffs = BiquadCoeffs {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Design a section. `gain_db` only affects the peaking and shelving
    /// shapes. The frequency is kept just below Nyquist.
    pub fn design(kind: BiquadKind, frequency: f64, q: f64, gain_db: f64, sample_rate: f64) -> Self {
        let frequency = frequency.clamp(1.0, sample_rate * 0.499);
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match kind {
            BiquadKind::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            BiquadKind::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            BiquadKind::Bandpass => (alpha, 0.0, -alpha, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha),
            BiquadKind::Peaking => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            BiquadKind::LowShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + beta),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - beta),
                    (a + 1.0) + (a - 1.0) * cos_w0 + beta,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - beta,
                )
            }
            BiquadKind::HighShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + beta),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - beta),
                    (a + 1.0) - (a - 1.0) * cos_w0 + beta,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - beta,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// State of one biquad section on one channel (Direct Form II Transposed).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, c: &BiquadCoeffs, input: f64) -> f64 {
        let output = c.b0 * input + self.z1;
        self.z1 = c.b1 * input - c.a1 * output + self.z2;
        self.z2 = c.b2 * input - c.a2 * output;
        output
    }
}
