//! [`StepSizePolicy`] – how far to move on the next trial.
//!
//! A policy answers three questions for the axis optimizer: the base step
//! for the current reading and phase, how the step scale reacts to an
//! accepted move, and whether to retry with a smaller step after a decline.
//!
//! - [`ContinuousPowerMapping`] maps the current reading onto a Gaussian
//!   curve between `max_step` (weak signal) and `min_step` (at the expected
//!   maximum).
//! - [`PhasedLadder`] picks a fixed coarse, fine or ultra-fine size per axis
//!   class.

use optalign_types::{Axis, Phase};

use crate::config::{PowerStepMapping, ScanConfig, ScanMode, StepLadder};

/// Improvement above which an accepted move grows the step scale.
pub const GROWTH_TRIGGER: f64 = 0.02;
const GROWTH_FACTOR: f64 = 1.2;
const MAX_SCALE: f64 = 1.5;
const SHRINK_FACTOR: f64 = 0.7;
const MIN_SCALE: f64 = 0.1;

/// Width of the Gaussian curve over the normalized reading.
const MAPPING_SIGMA: f64 = 0.5;

/// What to do after a declined or rejected trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeclineAction {
    /// Try again with the step scale set to `scale`.
    Retry { scale: f64 },
    Stop,
}

/// Strategy for sizing trial steps.
///
/// The effective trial step is `step_size(..) * scale`, where `scale` starts
/// at `1.0` for every axis call and is adjusted by [`on_accept`] and
/// [`on_decline`].
///
/// [`on_accept`]: StepSizePolicy::on_accept
/// [`on_decline`]: StepSizePolicy::on_decline
pub trait StepSizePolicy: Send + Sync {
    /// Short identifier for logs and reports.
    fn name(&self) -> &'static str;

    /// Base step for `axis`, always within [`step_bounds`](Self::step_bounds).
    fn step_size(&self, axis: Axis, current_value: f64, phase: Phase) -> f64;

    /// `(min, max)` base step for `axis`.
    fn step_bounds(&self, axis: Axis) -> (f64, f64);

    /// New scale after a move with `improvement` was accepted.
    fn on_accept(&self, scale: f64, improvement: f64) -> f64;

    /// Decision after the `consecutive_declines`-th decline in a row.
    fn on_decline(&self, scale: f64, consecutive_declines: u32) -> DeclineAction;
}

/// The policy matching `config.mode`.
pub fn default_step_policy(config: &ScanConfig) -> Box<dyn StepSizePolicy> {
    match config.mode {
        ScanMode::Adaptive => Box::new(ContinuousPowerMapping::from_config(config)),
        ScanMode::Phased => Box::new(PhasedLadder::from_config(config)),
    }
}

fn grow(adaptive: bool, scale: f64, improvement: f64) -> f64 {
    if adaptive && improvement > GROWTH_TRIGGER {
        (scale * GROWTH_FACTOR).min(MAX_SCALE)
    } else {
        scale
    }
}

fn shrink(scale: f64) -> DeclineAction {
    let scale = scale * SHRINK_FACTOR;
    if scale > MIN_SCALE {
        DeclineAction::Retry { scale }
    } else {
        DeclineAction::Stop
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ContinuousPowerMapping
// ────────────────────────────────────────────────────────────────────────────

/// Maps the current reading to a step size between `min_step` and
/// `max_step`.
///
/// The reading is clamped to `[min_power, max_power]` and normalized to
/// `n ∈ [0, 1]`.  The curve `exp(-n² / 2σ²)` with `σ = 0.5` is rescaled so
/// that `n = 0` yields exactly `1` and `n = 1` exactly `0`, then used to
/// interpolate between the step bounds.
///
/// # Example
///
/// ```
/// use optalign_engine::config::PowerStepMapping;
/// use optalign_engine::step_policy::ContinuousPowerMapping;
///
/// let policy = ContinuousPowerMapping::new(PowerStepMapping::default());
/// assert!((policy.step_for_value(2e-6) - 0.010).abs() < 1e-12);
/// assert!((policy.step_for_value(400e-6) - 0.0002).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ContinuousPowerMapping {
    mapping: PowerStepMapping,
    adaptive: bool,
}

impl ContinuousPowerMapping {
    pub fn new(mapping: PowerStepMapping) -> Self {
        Self {
            mapping,
            adaptive: true,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.power_mapping).with_adaptive(config.adaptive_step_size)
    }

    /// With `adaptive` off every step is `min_step` and accepted moves never
    /// grow the scale.
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Interpolation factor in `[0, 1]`: `1` at or below `min_power`, `0` at
    /// or above `max_power`.
    pub fn factor(&self, value: f64) -> f64 {
        let m = &self.mapping;
        let clamped = if value.is_nan() {
            m.min_power
        } else {
            value.clamp(m.min_power, m.max_power)
        };
        let normalized = (clamped - m.min_power) / (m.max_power - m.min_power);
        let width = 2.0 * MAPPING_SIGMA * MAPPING_SIGMA;
        let floor = (-1.0 / width).exp();
        let raw = (-(normalized * normalized) / width).exp();
        ((raw - floor) / (1.0 - floor)).clamp(0.0, 1.0)
    }

    pub fn step_for_value(&self, value: f64) -> f64 {
        let m = &self.mapping;
        if !self.adaptive {
            return m.min_step;
        }
        let step = m.min_step + self.factor(value) * (m.max_step - m.min_step);
        step.clamp(m.min_step, m.max_step)
    }
}

impl StepSizePolicy for ContinuousPowerMapping {
    fn name(&self) -> &'static str {
        "continuous_power_mapping"
    }

    fn step_size(&self, _axis: Axis, current_value: f64, _phase: Phase) -> f64 {
        self.step_for_value(current_value)
    }

    fn step_bounds(&self, _axis: Axis) -> (f64, f64) {
        (self.mapping.min_step, self.mapping.max_step)
    }

    fn on_accept(&self, scale: f64, improvement: f64) -> f64 {
        grow(self.adaptive, scale, improvement)
    }

    fn on_decline(&self, scale: f64, _consecutive_declines: u32) -> DeclineAction {
        shrink(scale)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PhasedLadder
// ────────────────────────────────────────────────────────────────────────────

/// Fixed coarse / fine / ultra-fine sizes; the primary axis has its own
/// ladder.
#[derive(Debug, Clone, Copy)]
pub struct PhasedLadder {
    primary_axis: Axis,
    primary: StepLadder,
    centering: StepLadder,
    max_consecutive_declines: u32,
    adaptive: bool,
}

impl PhasedLadder {
    pub fn new(primary_axis: Axis, primary: StepLadder, centering: StepLadder) -> Self {
        Self {
            primary_axis,
            primary,
            centering,
            max_consecutive_declines: 3,
            adaptive: true,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(
            config.primary_axis,
            config.primary.ladder,
            config.centering.ladder,
        )
        .with_max_consecutive_declines(config.max_consecutive_declines)
        .with_adaptive(config.adaptive_step_size)
    }

    pub fn with_max_consecutive_declines(mut self, max: u32) -> Self {
        self.max_consecutive_declines = max;
        self
    }

    /// With `adaptive` off a decline ends the axis call instead of retrying
    /// with a shrunk step.
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    fn ladder(&self, axis: Axis) -> &StepLadder {
        if axis == self.primary_axis {
            &self.primary
        } else {
            &self.centering
        }
    }
}

impl StepSizePolicy for PhasedLadder {
    fn name(&self) -> &'static str {
        "phased_ladder"
    }

    fn step_size(&self, axis: Axis, _current_value: f64, phase: Phase) -> f64 {
        self.ladder(axis).size(phase)
    }

    fn step_bounds(&self, axis: Axis) -> (f64, f64) {
        let ladder = self.ladder(axis);
        (ladder.min(), ladder.max())
    }

    fn on_accept(&self, scale: f64, improvement: f64) -> f64 {
        grow(self.adaptive, scale, improvement)
    }

    fn on_decline(&self, scale: f64, consecutive_declines: u32) -> DeclineAction {
        if consecutive_declines >= self.max_consecutive_declines || !self.adaptive {
            DeclineAction::Stop
        } else {
            shrink(scale)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuous() -> ContinuousPowerMapping {
        ContinuousPowerMapping::new(PowerStepMapping::default())
    }

    // ------------------------------------------------------------------ ContinuousPowerMapping

    #[test]
    fn weakest_signal_gets_largest_step() {
        let p = continuous();
        assert!((p.step_for_value(2e-6) - 0.010).abs() < 1e-12);
        assert!((p.factor(2e-6) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn strongest_signal_gets_smallest_step() {
        let p = continuous();
        assert!((p.step_for_value(400e-6) - 0.0002).abs() < 1e-12);
        assert!(p.factor(400e-6).abs() < 1e-12);
    }

    #[test]
    fn step_stays_within_bounds_for_any_reading() {
        let p = continuous();
        let (lo, hi) = p.step_bounds(Axis::Z);
        let readings = [
            -1.0, 0.0, 1e-9, 2e-6, 1e-5, 5e-5, 1e-4, 2e-4, 3e-4, 3.99e-4, 4e-4, 1e-3, 1.0,
            f64::NAN, f64::INFINITY,
        ];
        for value in readings {
            let step = p.step_size(Axis::Z, value, Phase::Coarse);
            assert!(
                (lo..=hi).contains(&step),
                "step {step} for reading {value} outside [{lo}, {hi}]"
            );
        }
    }

    #[test]
    fn step_shrinks_monotonically_as_signal_grows() {
        let p = continuous();
        let mut previous = f64::INFINITY;
        for i in 0..=40 {
            let value = 2e-6 + (400e-6 - 2e-6) * f64::from(i) / 40.0;
            let step = p.step_for_value(value);
            assert!(step <= previous);
            previous = step;
        }
    }

    #[test]
    fn non_adaptive_mapping_uses_min_step() {
        let p = continuous().with_adaptive(false);
        assert!((p.step_for_value(2e-6) - 0.0002).abs() < f64::EPSILON);
        assert!((p.on_accept(1.0, 0.5) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn accepted_large_improvement_grows_scale_up_to_cap() {
        let p = continuous();
        assert!((p.on_accept(1.0, 0.05) - 1.2).abs() < 1e-12);
        assert!((p.on_accept(1.4, 0.05) - 1.5).abs() < 1e-12);
        assert!((p.on_accept(1.0, 0.01) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn continuous_decline_shrinks_until_ten_percent() {
        let p = continuous();
        let mut scale = 1.0;
        let mut retries = 0;
        while let DeclineAction::Retry { scale: next } = p.on_decline(scale, retries + 1) {
            assert!((next - scale * 0.7).abs() < 1e-12);
            assert!(next > 0.1);
            scale = next;
            retries += 1;
        }
        // 0.7^6 ≈ 0.118 is the last retry; 0.7^7 ≈ 0.082 stops.
        assert_eq!(retries, 6);
    }

    // ------------------------------------------------------------------ PhasedLadder

    fn ladder() -> PhasedLadder {
        PhasedLadder::from_config(&ScanConfig::phased())
    }

    #[test]
    fn ladder_picks_size_by_phase_and_axis_class() {
        let p = ladder();
        assert!((p.step_size(Axis::Z, 0.0, Phase::Coarse) - 0.005).abs() < f64::EPSILON);
        assert!((p.step_size(Axis::Z, 0.0, Phase::UltraFine) - 0.0002).abs() < f64::EPSILON);
        assert!((p.step_size(Axis::X, 0.0, Phase::Coarse) - 0.001).abs() < f64::EPSILON);
        assert!((p.step_size(Axis::Y, 0.0, Phase::Fine) - 0.0005).abs() < f64::EPSILON);
        assert_eq!(p.step_bounds(Axis::Z), (0.0002, 0.005));
    }

    #[test]
    fn ladder_stops_after_max_consecutive_declines() {
        let p = ladder();
        assert!(matches!(p.on_decline(1.0, 1), DeclineAction::Retry { .. }));
        assert!(matches!(p.on_decline(0.7, 2), DeclineAction::Retry { .. }));
        assert_eq!(p.on_decline(0.49, 3), DeclineAction::Stop);
    }

    #[test]
    fn non_adaptive_ladder_stops_on_first_decline() {
        let p = ladder().with_adaptive(false);
        assert_eq!(p.on_decline(1.0, 1), DeclineAction::Stop);
    }

    #[test]
    fn default_policy_follows_mode() {
        assert_eq!(
            default_step_policy(&ScanConfig::adaptive()).name(),
            "continuous_power_mapping"
        );
        assert_eq!(default_step_policy(&ScanConfig::phased()).name(), "phased_ladder");
    }
}
