//! Parameter fades — linear ramps between discrete parameter values.
//!
//! A step change in a parameter would produce a click, so units ramp from
//! the previous value to the new target over a short fixed window.

/// Fade state of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeState {
    pub prev: f64,
    pub target: f64,
    /// Time (seconds) the current ramp started.
    pub start: f64,
    /// Ramp length in seconds.
    pub duration: f64,
}

impl FadeState {
    /// State for a value seen for the first time: no ramp.
    pub fn settled(value: f64, now: f64, duration: f64) -> Self {
        Self {
            prev: value,
            target: value,
            start: now,
            duration,
        }
    }

    /// Faded value at time `now`.
    #[inline]
    pub fn value_at(&self, now: f64) -> f64 {
        if self.prev == self.target || self.duration <= 0.0 {
            return self.target;
        }
        let progress = ((now - self.start) / self.duration).clamp(0.0, 1.0);
        if progress >= 1.0 {
            self.target
        } else {
            self.prev + (self.target - self.prev) * progress
        }
    }

    /// True once the ramp is over at `now`.
    pub fn is_settled(&self, now: f64) -> bool {
        self.prev == self.target || now - self.start >= self.duration
    }

    /// Feed the latest raw value. A changed target restarts the ramp from
    /// the old target.
    fn retarget(&mut self, value: f64, now: f64) {
        if value != self.target {
            self.prev = self.target;
            self.target = value;
            self.start = now;
        }
    }
}

/// Fade states of one plugin, keyed by parameter name.
///
/// Plugins have a handful of fadeable parameters, so a linear scan over a
/// small vector beats hashing.
#[derive(Debug, Clone, Default)]
pub struct FadeBank {
    states: Vec<(&'static str, FadeState)>,
    duration: f64,
}

impl FadeBank {
    pub fn new(duration: f64) -> Self {
        Self {
            states: Vec::new(),
            duration,
        }
    }

    /// Observe `value` for `key` at block time `now` and return the state
    /// to interpolate with for this block.
    pub fn observe(&mut self, key: &'static str, value: f64, now: f64) -> FadeState {
        if let Some((_, state)) = self.states.iter_mut().find(|(k, _)| *k == key) {
            state.retarget(value, now);
            return *state;
        }
        let state = FadeState::settled(value, now, self.duration);
        self.states.push((key, state));
        state
    }

    /// Forget every fade (DSP state reinit).
    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS10: f64 = 0.010;

    #[test]
    fn first_observation_has_no_fade_in() {
        let mut bank = FadeBank::new(MS10);
        let state = bank.observe("vl", 0.5, 1.0);
        assert_eq!(state.value_at(1.0), 0.5);
        assert_eq!(state.prev, state.target);
    }

    #[test]
    fn step_change_ramps_monotonically_and_lands_exactly() {
        let mut bank = FadeBank::new(MS10);
        bank.observe("vl", 0.0, 0.0);
        let state = bank.observe("vl", 1.0, 0.5);

        let sr = 48_000.0;
        let mut last = state.value_at(0.5);
        assert_eq!(last, 0.0);
        for i in 1..=480 {
            let v = state.value_at(0.5 + i as f64 / sr);
            assert!(v >= last, "fade went backwards at sample {i}");
            last = v;
        }
        assert_eq!(state.value_at(0.5 + MS10), 1.0);
        assert_eq!(state.value_at(0.6), 1.0);
    }

    #[test]
    fn retarget_starts_from_old_target() {
        let mut bank = FadeBank::new(MS10);
        bank.observe("of", 1.0, 0.0);
        bank.observe("of", 2.0, 1.0);
        let state = bank.observe("of", 3.0, 2.0);
        assert_eq!(state.prev, 2.0);
        assert_eq!(state.target, 3.0);
        assert_eq!(state.start, 2.0);
        assert!((state.value_at(2.005) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn unchanged_value_keeps_ramp() {
        let mut bank = FadeBank::new(MS10);
        bank.observe("vl", 0.0, 0.0);
        bank.observe("vl", 1.0, 1.0);
        let state = bank.observe("vl", 1.0, 1.004);
        assert_eq!(state.start, 1.0);
        assert!(!state.is_settled(1.004));
        assert!(state.is_settled(1.02));
    }
}
