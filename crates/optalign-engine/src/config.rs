//! [`ScanConfig`] – everything that shapes one scan.
//!
//! Two presets reproduce the two classic ways of running the engine:
//!
//! - [`ScanConfig::adaptive`] – continuous power-to-step mapping, a single
//!   multi-pass loop, early stop near the expected maximum signal.
//! - [`ScanConfig::phased`] (the [`Default`]) – coarse, fine and ultra-fine
//!   ladders with learned direction memory.
//!
//! Every field has a serde default so partial TOML files load cleanly.

use std::fmt;

use optalign_types::{AlignError, Axis, DirectionConstraint, Phase};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Mode
// ────────────────────────────────────────────────────────────────────────────

/// How the orchestrator sequences axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// Up to `max_passes` passes over all axes with early stop.
    Adaptive,
    /// Coarse passes, one fine pass, then an optional ultra-fine pass.
    #[default]
    Phased,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Adaptive => f.write_str("adaptive"),
            ScanMode::Phased => f.write_str("phased"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-axis values
// ────────────────────────────────────────────────────────────────────────────

/// One value per stage axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AxisMap<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T: Copy> AxisMap<T> {
    pub fn splat(value: T) -> Self {
        Self {
            x: value,
            y: value,
            z: value,
        }
    }

    pub fn get(&self, axis: Axis) -> T {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn set(&mut self, axis: Axis, value: T) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Step sizing parameters
// ────────────────────────────────────────────────────────────────────────────

/// Signal range and step range for the continuous power-to-step mapping.
///
/// Powers are in amperes of photocurrent, steps in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PowerStepMapping {
    pub min_power: f64,
    pub max_power: f64,
    pub min_step: f64,
    pub max_step: f64,
}

impl Default for PowerStepMapping {
    fn default() -> Self {
        Self {
            min_power: 2e-6,
            max_power: 400e-6,
            min_step: 0.0002,
            max_step: 0.010,
        }
    }
}

/// Fixed step sizes for the three phases, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepLadder {
    pub coarse: f64,
    pub fine: f64,
    pub ultra_fine: f64,
}

impl StepLadder {
    pub fn size(&self, phase: Phase) -> f64 {
        match phase {
            Phase::Coarse => self.coarse,
            Phase::Fine => self.fine,
            Phase::UltraFine => self.ultra_fine,
        }
    }

    pub fn min(&self) -> f64 {
        self.coarse.min(self.fine).min(self.ultra_fine)
    }

    pub fn max(&self) -> f64 {
        self.coarse.max(self.fine).max(self.ultra_fine)
    }
}

/// Settings for one class of axis: the primary (focus) axis or the
/// centering axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AxisProfile {
    pub ladder: StepLadder,
    /// Measurement budget per axis call in the coarse and fine phases.
    pub max_steps_per_phase: usize,
    /// Measurement budget per axis call in the ultra-fine phase.
    pub ultra_fine_max_steps: usize,
    /// Minimum relative improvement for a move to be accepted.
    pub improvement_threshold: f64,
}

impl AxisProfile {
    /// Defaults for the focus axis: large coarse steps, 0.5 % threshold.
    pub fn primary() -> Self {
        Self {
            ladder: StepLadder {
                coarse: 0.005,
                fine: 0.001,
                ultra_fine: 0.0002,
            },
            max_steps_per_phase: 8,
            ultra_fine_max_steps: 3,
            improvement_threshold: 0.005,
        }
    }

    /// Defaults for the centering axes: small steps, 0.1 % threshold.
    pub fn centering() -> Self {
        Self {
            ladder: StepLadder {
                coarse: 0.001,
                fine: 0.0005,
                ultra_fine: 0.0002,
            },
            max_steps_per_phase: 4,
            ultra_fine_max_steps: 2,
            improvement_threshold: 0.001,
        }
    }

    pub fn budget(&self, phase: Phase) -> usize {
        match phase {
            Phase::Coarse | Phase::Fine => self.max_steps_per_phase,
            Phase::UltraFine => self.ultra_fine_max_steps,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ScanConfig
// ────────────────────────────────────────────────────────────────────────────

/// Complete configuration for one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ScanConfig {
    pub mode: ScanMode,
    /// Axis optimized first in every pass; uses the `primary` profile.
    pub primary_axis: Axis,
    pub power_mapping: PowerStepMapping,
    pub primary: AxisProfile,
    pub centering: AxisProfile,
    pub constraints: AxisMap<DirectionConstraint>,
    /// Maximum excursion per axis, measured from the scan's start position.
    pub max_travel: AxisMap<f64>,
    pub convergence_threshold: f64,
    /// Measurement budget per axis call in adaptive mode.
    pub max_measurements_per_axis: usize,
    pub max_consecutive_declines: u32,
    pub adaptive_step_size: bool,
    pub direction_memory: bool,
    /// When `false` every axis may move in both directions.
    pub use_physics_constraints: bool,
    pub max_passes: usize,
    /// Adaptive mode stops once the best reading reaches this fraction of
    /// `power_mapping.max_power`.
    pub early_stop_fraction: f64,
    /// A remembered direction is only tried first while its consecutive
    /// declines stay below this limit.
    pub memory_decline_limit: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::phased()
    }
}

impl ScanConfig {
    /// Continuous power mapping, single loop, Z restricted to `Negative`.
    pub fn adaptive() -> Self {
        let primary = AxisProfile::primary();
        let mut centering = AxisProfile::centering();
        centering.improvement_threshold = primary.improvement_threshold;
        Self {
            mode: ScanMode::Adaptive,
            primary_axis: Axis::Z,
            power_mapping: PowerStepMapping::default(),
            primary,
            centering,
            constraints: AxisMap {
                x: DirectionConstraint::Both,
                y: DirectionConstraint::Both,
                z: DirectionConstraint::Negative,
            },
            max_travel: AxisMap::splat(0.005),
            convergence_threshold: 0.001,
            max_measurements_per_axis: 20,
            max_consecutive_declines: 3,
            adaptive_step_size: true,
            direction_memory: false,
            use_physics_constraints: true,
            max_passes: 3,
            early_stop_fraction: 0.95,
            memory_decline_limit: 2,
        }
    }

    /// Coarse → fine → ultra-fine ladders with direction memory.
    pub fn phased() -> Self {
        Self {
            mode: ScanMode::Phased,
            primary_axis: Axis::Z,
            power_mapping: PowerStepMapping::default(),
            primary: AxisProfile::primary(),
            centering: AxisProfile::centering(),
            constraints: AxisMap::splat(DirectionConstraint::Both),
            max_travel: AxisMap::splat(0.05),
            convergence_threshold: 0.0001,
            max_measurements_per_axis: 20,
            max_consecutive_declines: 3,
            adaptive_step_size: true,
            direction_memory: true,
            use_physics_constraints: true,
            max_passes: 3,
            early_stop_fraction: 0.95,
            memory_decline_limit: 2,
        }
    }

    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_primary_axis(mut self, axis: Axis) -> Self {
        self.primary_axis = axis;
        self
    }

    // ── Queries ────────────────────────────────────────────────────────────

    pub fn profile(&self, axis: Axis) -> &AxisProfile {
        if axis == self.primary_axis {
            &self.primary
        } else {
            &self.centering
        }
    }

    pub fn improvement_threshold(&self, axis: Axis) -> f64 {
        self.profile(axis).improvement_threshold
    }

    /// Effective direction constraint, honouring `use_physics_constraints`.
    pub fn constraint(&self, axis: Axis) -> DirectionConstraint {
        if self.use_physics_constraints {
            self.constraints.get(axis)
        } else {
            DirectionConstraint::Both
        }
    }

    /// Measurements one axis call may spend.
    pub fn measurement_budget(&self, axis: Axis, phase: Phase) -> usize {
        match self.mode {
            ScanMode::Adaptive => self.max_measurements_per_axis,
            ScanMode::Phased => self.profile(axis).budget(phase),
        }
    }

    /// Primary axis first, then the others in `X, Y, Z` order.
    pub fn axis_order(&self) -> Vec<Axis> {
        std::iter::once(self.primary_axis)
            .chain(Axis::ALL.into_iter().filter(|a| *a != self.primary_axis))
            .collect()
    }

    /// Reading at which adaptive mode stops early.
    pub fn early_stop_level(&self) -> f64 {
        self.early_stop_fraction * self.power_mapping.max_power
    }

    // ── Setters ────────────────────────────────────────────────────────────

    pub fn set_power_range(&mut self, min_power: f64, max_power: f64) {
        self.power_mapping.min_power = min_power;
        self.power_mapping.max_power = max_power;
    }

    /// Set the continuous step range from micrometre values.
    pub fn set_step_size_range_um(&mut self, min_um: f64, max_um: f64) {
        self.power_mapping.min_step = min_um / 1000.0;
        self.power_mapping.max_step = max_um / 1000.0;
    }

    pub fn set_axis_direction(&mut self, axis: Axis, constraint: DirectionConstraint) {
        self.constraints.set(axis, constraint);
    }

    pub fn set_primary_steps(&mut self, coarse: f64, fine: f64, ultra_fine: f64) {
        self.primary.ladder = StepLadder {
            coarse,
            fine,
            ultra_fine,
        };
    }

    pub fn set_centering_steps(&mut self, coarse: f64, fine: f64, ultra_fine: f64) {
        self.centering.ladder = StepLadder {
            coarse,
            fine,
            ultra_fine,
        };
    }

    pub fn set_axis_thresholds(&mut self, primary: f64, centering: f64) {
        self.primary.improvement_threshold = primary;
        self.centering.improvement_threshold = centering;
    }

    pub fn set_max_steps_per_phase(&mut self, primary: usize, centering: usize) {
        self.primary.max_steps_per_phase = primary;
        self.centering.max_steps_per_phase = centering;
    }

    // ── Validation ─────────────────────────────────────────────────────────

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`AlignError::InvalidConfig`] describing the first problem
    /// found.
    pub fn validate(&self) -> Result<(), AlignError> {
        let pm = &self.power_mapping;
        if !(pm.min_power.is_finite() && pm.max_power.is_finite())
            || pm.min_power < 0.0
            || pm.max_power <= pm.min_power
        {
            return invalid(format!(
                "power range [{}, {}] must be finite, non-negative and non-empty",
                pm.min_power, pm.max_power
            ));
        }
        if !(pm.min_step.is_finite() && pm.max_step.is_finite())
            || pm.min_step <= 0.0
            || pm.max_step < pm.min_step
        {
            return invalid(format!(
                "step range [{}, {}] must be positive and ordered",
                pm.min_step, pm.max_step
            ));
        }
        for (name, profile) in [("primary", &self.primary), ("centering", &self.centering)] {
            let l = &profile.ladder;
            if [l.coarse, l.fine, l.ultra_fine]
                .iter()
                .any(|s| !s.is_finite() || *s <= 0.0)
            {
                return invalid(format!("{name} ladder steps must be positive"));
            }
            if profile.max_steps_per_phase == 0 || profile.ultra_fine_max_steps == 0 {
                return invalid(format!("{name} step budgets must be at least 1"));
            }
            check_threshold(&format!("{name} improvement_threshold"), profile.improvement_threshold)?;
        }
        check_threshold("convergence_threshold", self.convergence_threshold)?;
        for axis in Axis::ALL {
            let travel = self.max_travel.get(axis);
            if !travel.is_finite() || travel <= 0.0 {
                return invalid(format!("{axis}-axis max_travel must be positive"));
            }
        }
        if self.max_measurements_per_axis == 0 {
            return invalid("max_measurements_per_axis must be at least 1".to_string());
        }
        if self.max_passes == 0 {
            return invalid("max_passes must be at least 1".to_string());
        }
        if self.max_consecutive_declines == 0 {
            return invalid("max_consecutive_declines must be at least 1".to_string());
        }
        if !self.early_stop_fraction.is_finite() || self.early_stop_fraction <= 0.0 {
            return invalid("early_stop_fraction must be positive".to_string());
        }
        Ok(())
    }
}

fn invalid(message: String) -> Result<(), AlignError> {
    Err(AlignError::InvalidConfig(message))
}

fn check_threshold(name: &str, value: f64) -> Result<(), AlignError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        invalid(format!("{name} must be finite and non-negative, got {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        assert!(ScanConfig::adaptive().validate().is_ok());
        assert!(ScanConfig::phased().validate().is_ok());
        assert_eq!(ScanConfig::default().mode, ScanMode::Phased);
    }

    #[test]
    fn axis_order_starts_with_primary() {
        let cfg = ScanConfig::phased();
        assert_eq!(cfg.axis_order(), vec![Axis::Z, Axis::X, Axis::Y]);

        let cfg = cfg.with_primary_axis(Axis::Y);
        assert_eq!(cfg.axis_order(), vec![Axis::Y, Axis::X, Axis::Z]);
    }

    #[test]
    fn profile_and_threshold_follow_primary_axis() {
        let cfg = ScanConfig::phased();
        assert!((cfg.improvement_threshold(Axis::Z) - 0.005).abs() < f64::EPSILON);
        assert!((cfg.improvement_threshold(Axis::X) - 0.001).abs() < f64::EPSILON);
        assert_eq!(cfg.measurement_budget(Axis::Z, Phase::Coarse), 8);
        assert_eq!(cfg.measurement_budget(Axis::Y, Phase::UltraFine), 2);
    }

    #[test]
    fn adaptive_budget_ignores_phase() {
        let cfg = ScanConfig::adaptive();
        assert_eq!(cfg.measurement_budget(Axis::Z, Phase::UltraFine), 20);
        assert_eq!(cfg.measurement_budget(Axis::X, Phase::Coarse), 20);
    }

    #[test]
    fn physics_constraints_can_be_disabled() {
        let mut cfg = ScanConfig::adaptive();
        assert_eq!(cfg.constraint(Axis::Z), DirectionConstraint::Negative);
        cfg.use_physics_constraints = false;
        assert_eq!(cfg.constraint(Axis::Z), DirectionConstraint::Both);
    }

    #[test]
    fn step_range_is_set_from_micrometres() {
        let mut cfg = ScanConfig::adaptive();
        cfg.set_step_size_range_um(0.5, 20.0);
        assert!((cfg.power_mapping.min_step - 0.0005).abs() < 1e-15);
        assert!((cfg.power_mapping.max_step - 0.02).abs() < 1e-15);
    }

    #[test]
    fn setters_update_ladders_and_thresholds() {
        let mut cfg = ScanConfig::phased();
        cfg.set_primary_steps(0.01, 0.002, 0.0004);
        cfg.set_centering_steps(0.002, 0.001, 0.0004);
        cfg.set_axis_thresholds(0.01, 0.002);
        cfg.set_max_steps_per_phase(10, 5);
        cfg.set_axis_direction(Axis::X, DirectionConstraint::Positive);
        assert!((cfg.primary.ladder.coarse - 0.01).abs() < f64::EPSILON);
        assert!((cfg.centering.ladder.ultra_fine - 0.0004).abs() < f64::EPSILON);
        assert!((cfg.improvement_threshold(Axis::Y) - 0.002).abs() < f64::EPSILON);
        assert_eq!(cfg.measurement_budget(Axis::Z, Phase::Fine), 10);
        assert_eq!(cfg.constraint(Axis::X), DirectionConstraint::Positive);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_power_range_is_rejected() {
        let mut cfg = ScanConfig::adaptive();
        cfg.set_power_range(1e-3, 1e-6);
        assert!(matches!(cfg.validate(), Err(AlignError::InvalidConfig(_))));
    }

    #[test]
    fn zero_ladder_step_is_rejected() {
        let mut cfg = ScanConfig::phased();
        cfg.set_centering_steps(0.001, 0.0, 0.0002);
        assert!(matches!(cfg.validate(), Err(AlignError::InvalidConfig(_))));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let mut cfg = ScanConfig::phased();
        cfg.convergence_threshold = -1.0;
        assert!(matches!(cfg.validate(), Err(AlignError::InvalidConfig(_))));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ScanConfig =
            serde_json::from_str(r#"{ "mode": "adaptive", "max_passes": 5 }"#).unwrap();
        assert_eq!(cfg.mode, ScanMode::Adaptive);
        assert_eq!(cfg.max_passes, 5);
        assert_eq!(cfg.primary, AxisProfile::primary());
    }
}
