// SPDX-License-Identifier: CEPL-1.0
//! Frame-rate independent exponential smoothing.
//!
//! The filter is parameterised by "after `T` seconds at most a fraction `P`
//! of the original distance remains", which gives a half-life of
//! `-T / log2(P)`. The per-frame blend factor is then `1 - 2^(-dt / half_life)`,
//! so two frames of `dt` converge exactly as far as one frame of `2 * dt`.

/// Fraction of the distance left once `SETTLE_TIME` has elapsed.
pub const REMAINING_FRACTION: f32 = 0.01;
/// Seconds for the camera to close all but `REMAINING_FRACTION` of a gap.
pub const SETTLE_TIME: f32 = 0.396;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Smoothing {
    half_life: f32,
}

impl Smoothing {
    /// `remaining` must lie in `(0, 1)` and `settle_time` must be positive.
    pub fn from_remaining_fraction(remaining: f32, settle_time: f32) -> Self {
        debug_assert!(remaining > 0.0 && remaining < 1.0);
        debug_assert!(settle_time > 0.0);
        Self {
            half_life: -settle_time / remaining.log2(),
        }
    }

    pub fn half_life(&self) -> f32 {
        self.half_life
    }

    /// Blend factor towards the target for a step of `dt` seconds.
    pub fn alpha(&self, dt: f32) -> f32 {
        1.0 - (-dt / self.half_life).exp2()
    }
}

impl Default for Smoothing {
    fn default() -> Self {
        Self::from_remaining_fraction(REMAINING_FRACTION, SETTLE_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_half_life() {
        let s = Smoothing::default();
        assert_relative_eq!(s.half_life(), 0.0596, epsilon = 1e-4);
    }

    #[test]
    fn one_half_life_blends_halfway() {
        let s = Smoothing::default();
        assert_relative_eq!(s.alpha(s.half_life()), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn zero_dt_does_not_move() {
        assert_eq!(Smoothing::default().alpha(0.0), 0.0);
    }

    #[test]
    fn settle_time_leaves_remaining_fraction() {
        let s = Smoothing::default();
        assert_relative_eq!(1.0 - s.alpha(SETTLE_TIME), REMAINING_FRACTION, epsilon = 1e-6);
    }

    #[test]
    fn split_steps_match_single_step() {
        let s = Smoothing::default();
        let dt = 1.0 / 60.0;
        let left_after_two = (1.0 - s.alpha(dt)) * (1.0 - s.alpha(dt));
        let left_after_one = 1.0 - s.alpha(2.0 * dt);
        assert_relative_eq!(left_after_two, left_after_one, epsilon = 1e-6);
    }
}
