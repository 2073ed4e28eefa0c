//! Basic stateless units: gain, offset, polarity, mute and balance.

use crate::error::ProcessingError;
use crate::plugin::ParamSet;

use super::fade::FadeBank;
use super::{BlockContext, DspUnit, db_to_linear};

/// Gain in dB (`vl`, -60..=24), faded in the linear domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct Volume;

impl DspUnit for Volume {
    fn name(&self) -> &'static str {
        "Volume"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        let db = params.number_clamped("vl", 0.0, -60.0, 24.0);
        let fade = fades.observe("vl", db_to_linear(db), ctx.time);

        if fade.is_settled(ctx.time) {
            let gain = fade.target as f32;
            data.iter_mut().for_each(|s| *s *= gain);
            return Ok(());
        }
        for i in 0..ctx.block_size {
            let gain = fade.value_at(ctx.sample_time(i)) as f32;
            for ch in 0..ctx.channels {
                data[ch * ctx.block_size + i] *= gain;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

/// Adds a constant (`of`, -1..=1), faded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcOffset;

impl DspUnit for DcOffset {
    fn name(&self) -> &'static str {
        "DC Offset"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        let offset = params.number_clamped("of", 0.0, -1.0, 1.0);
        let fade = fades.observe("of", offset, ctx.time);
        for i in 0..ctx.block_size {
            let value = fade.value_at(ctx.sample_time(i)) as f32;
            for ch in 0..ctx.channels {
                data[ch * ctx.block_size + i] += value;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PolarityInversion;

impl DspUnit for PolarityInversion {
    fn name(&self) -> &'static str {
        "Polarity Inversion"
    }

    fn process(
        &mut self,
        _ctx: &BlockContext,
        _params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        data.iter_mut().for_each(|s| *s = -*s);
        Ok(())
    }

    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Mute;

impl DspUnit for Mute {
    fn name(&self) -> &'static str {
        "Mute"
    }

    fn process(
        &mut self,
        _ctx: &BlockContext,
        _params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        data.fill(0.0);
        Ok(())
    }

    fn reset(&mut self) {}
}

/// Left/right balance (`bl`, -1 = full left, +1 = full right).
/// Only acts on blocks with at least two channels.
#[derive(Debug, Clone, Copy, Default)]
pub struct StereoBalance;

impl DspUnit for StereoBalance {
    fn name(&self) -> &'static str {
        "Stereo Balance"
    }

    fn process(
        &mut self,
        ctx: &BlockContext,
        params: &ParamSet,
        _fades: &mut FadeBank,
        data: &mut [f32],
    ) -> Result<(), ProcessingError> {
        if ctx.channels < 2 {
            return Ok(());
        }
        let balance = params.number_clamped("bl", 0.0, -1.0, 1.0) as f32;
        let left_gain = if balance <= 0.0 { 1.0 } else { 1.0 - balance };
        let right_gain = if balance >= 0.0 { 1.0 } else { 1.0 + balance };

        let (left, rest) = data.split_at_mut(ctx.block_size);
        left.iter_mut().for_each(|s| *s *= left_gain);
        // Every channel past the first follows the right gain.
        rest.iter_mut().for_each(|s| *s *= right_gain);
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(channels: usize, block_size: usize, time: f64) -> BlockContext {
        BlockContext {
            sample_rate: 48_000.0,
            channels,
            block_size,
            time,
        }
    }

    fn params(key: &str, value: f64) -> ParamSet {
        let mut p = ParamSet::new();
        p.set(key, value);
        p
    }

    #[test]
    fn volume_applies_db_gain() {
        let mut unit = Volume;
        let mut fades = FadeBank::new(0.01);
        let mut data = vec![1.0f32; 256];
        unit.process(&ctx(2, 128, 0.0), &params("vl", -6.0), &mut fades, &mut data)
            .unwrap();
        let expected = db_to_linear(-6.0) as f32;
        assert!(data.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn volume_change_fades_over_block() {
        let mut unit = Volume;
        let mut fades = FadeBank::new(0.01);
        let mut data = vec![1.0f32; 128];
        unit.process(&ctx(1, 128, 0.0), &params("vl", 0.0), &mut fades, &mut data)
            .unwrap();

        let mut data = vec![1.0f32; 1024];
        unit.process(&ctx(1, 1024, 1.0), &params("vl", -60.0), &mut fades, &mut data)
            .unwrap();
        assert!((data[0] - 1.0).abs() < 1e-6, "ramp starts at the old gain");
        assert!(data.windows(2).all(|w| w[1] <= w[0]));
        assert!((data[1000] - 0.001).abs() < 1e-6, "ramp lands after 10 ms");
    }

    #[test]
    fn dc_offset_adds() {
        let mut unit = DcOffset;
        let mut fades = FadeBank::new(0.01);
        let mut data = vec![0.25f32; 8];
        unit.process(&ctx(2, 4, 0.0), &params("of", 0.5), &mut fades, &mut data)
            .unwrap();
        assert!(data.iter().all(|&s| (s - 0.75).abs() < 1e-7));
    }

    #[test]
    fn balance_right_attenuates_left() {
        let mut unit = StereoBalance;
        let mut fades = FadeBank::new(0.01);
        let mut data = vec![1.0f32; 8];
        unit.process(&ctx(2, 4, 0.0), &params("bl", 0.25), &mut fades, &mut data)
            .unwrap();
        assert_eq!(&data[..4], &[0.75; 4]);
        assert_eq!(&data[4..], &[1.0; 4]);
    }

    #[test]
    fn balance_ignores_mono() {
        let mut unit = StereoBalance;
        let mut fades = FadeBank::new(0.01);
        let mut data = vec![1.0f32; 4];
        unit.process(&ctx(1, 4, 0.0), &params("bl", -1.0), &mut fades, &mut data)
            .unwrap();
        assert_eq!(data, vec![1.0; 4]);
    }

    #[test]
    fn polarity_and_mute() {
        let mut fades = FadeBank::new(0.01);
        let mut data = vec![0.5f32, -0.25];
        PolarityInversion
            .process(&ctx(1, 2, 0.0), &ParamSet::new(), &mut fades, &mut data)
            .unwrap();
        assert_eq!(data, vec![-0.5, 0.25]);
        Mute.process(&ctx(1, 2, 0.0), &ParamSet::new(), &mut fades, &mut data)
            .unwrap();
        assert_eq!(data, vec![0.0, 0.0]);
    }
}
