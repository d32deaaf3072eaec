//! `optalign-types` – shared vocabulary for the alignment workspace.
//!
//! Every crate in the workspace speaks in terms of the types defined here:
//! stage [`Axis`] and [`Direction`], the physics-informed
//! [`DirectionConstraint`], a stage [`Position`], the optimization [`Phase`],
//! a single recorded [`ScanStep`], and the workspace-wide [`AlignError`].

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Axes and directions
// ────────────────────────────────────────────────────────────────────────────

/// One of the three independent translation axes of the stage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in canonical order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of travel along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    /// Both directions, `Positive` first. Iteration order doubles as the
    /// tie-break preference when two directions improve equally.
    pub const ALL: [Direction; 2] = [Direction::Positive, Direction::Negative];

    /// `+1.0` or `-1.0`.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Positive => f.write_str("+"),
            Direction::Negative => f.write_str("-"),
        }
    }
}

/// Which directions an axis is allowed to move in.
///
/// Physics constraints come from the optical setup: moving a fibre *into* a
/// waveguide facet, for example, is only ever safe in one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum DirectionConstraint {
    #[default]
    Both,
    Positive,
    Negative,
}

impl DirectionConstraint {
    /// The permitted directions, `Positive` first.
    pub fn allowed(&self) -> &'static [Direction] {
        match self {
            DirectionConstraint::Both => &Direction::ALL,
            DirectionConstraint::Positive => &[Direction::Positive],
            DirectionConstraint::Negative => &[Direction::Negative],
        }
    }

    pub fn permits(&self, direction: Direction) -> bool {
        self.allowed().contains(&direction)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Position
// ────────────────────────────────────────────────────────────────────────────

/// A stage position in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    /// Coordinate along `axis`.
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Copy of `self` with the `axis` coordinate replaced by `value`.
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
        self
    }

    /// Copy of `self` moved by `delta` along `axis`.
    pub fn offset(self, axis: Axis, delta: f64) -> Self {
        let moved = self.get(axis) + delta;
        self.with(axis, moved)
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {:.6})", self.x, self.y, self.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Phase
// ────────────────────────────────────────────────────────────────────────────

/// A stage of the phased optimization, from largest to smallest steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    Coarse,
    Fine,
    UltraFine,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Coarse => f.write_str("coarse"),
            Phase::Fine => f.write_str("fine"),
            Phase::UltraFine => f.write_str("ultra-fine"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ScanStep
// ────────────────────────────────────────────────────────────────────────────

/// One recorded measurement of a scan: the baseline, or a single attempted
/// move along one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScanStep {
    pub position: Position,
    /// Measured signal. Zero marks a failed or cancelled reading.
    pub value: f64,
    /// Axis that produced this step; `None` for the baseline.
    pub axis: Option<Axis>,
    pub direction: Option<Direction>,
    pub step_size: f64,
    /// `(value - previous) / previous`, where `previous` is the value at the
    /// position the move started from.
    pub relative_improvement: f64,
    /// Set when this step raised the running best.
    pub is_peak: bool,
    /// Strictly increasing within one scan; the baseline is `0`.
    pub measurement_index: u64,
    pub timestamp: DateTime<Utc>,
}

impl ScanStep {
    /// A baseline step at `position` carrying an initial reading.
    pub fn baseline(position: Position, value: f64) -> Self {
        Self {
            position,
            value,
            axis: None,
            direction: None,
            step_size: 0.0,
            relative_improvement: 0.0,
            is_peak: false,
            measurement_index: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.axis.is_none()
    }

    /// A reading is valid when it is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value > 0.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlignError {
    #[error("Measurement port not bound: missing {missing}")]
    PortNotBound { missing: String },

    #[error("Invalid scan configuration: {0}")]
    InvalidConfig(String),

    #[error("Baseline measurement failed: read {value}")]
    BaselineMeasurementFailed { value: f64 },

    #[error("Position rejected by {rule}: {details}")]
    InvalidPosition { rule: String, details: String },

    #[error("Report Serialization Error: {0}")]
    Serialization(String),
}

impl AlignError {
    /// `true` for errors caused by how the engine was set up rather than by
    /// anything the hardware reported.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AlignError::PortNotBound { .. } | AlignError::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_sign() {
        assert!((Direction::Positive.sign() - 1.0).abs() < f64::EPSILON);
        assert!((Direction::Negative.sign() + 1.0).abs() < f64::EPSILON);
        assert_eq!(Direction::ALL[0], Direction::Positive);
    }

    #[test]
    fn constraint_allowed_lists_positive_first() {
        assert_eq!(
            DirectionConstraint::Both.allowed(),
            &[Direction::Positive, Direction::Negative]
        );
        assert_eq!(
            DirectionConstraint::Negative.allowed(),
            &[Direction::Negative]
        );
        assert!(!DirectionConstraint::Positive.permits(Direction::Negative));
    }

    #[test]
    fn position_offset_moves_only_one_axis() {
        let p = Position::new(1.0, 2.0, 3.0).offset(Axis::Z, -0.5);
        assert!((p.x - 1.0).abs() < f64::EPSILON);
        assert!((p.y - 2.0).abs() < f64::EPSILON);
        assert!((p.z - 2.5).abs() < f64::EPSILON);
        assert!((p.get(Axis::Z) - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn position_distance() {
        let a = Position::origin();
        let b = Position::new(3.0, 4.0, 0.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn baseline_step_has_index_zero_and_no_axis() {
        let step = ScanStep::baseline(Position::origin(), 1e-6);
        assert_eq!(step.measurement_index, 0);
        assert!(step.is_baseline());
        assert!(step.is_valid());
        assert!(!ScanStep::baseline(Position::origin(), 0.0).is_valid());
    }

    #[test]
    fn scan_step_roundtrip() {
        let mut step = ScanStep::baseline(Position::new(0.0, 0.0, -0.001), 4e-4);
        step.axis = Some(Axis::Z);
        step.direction = Some(Direction::Negative);
        step.measurement_index = 7;
        let json = serde_json::to_string(&step).unwrap();
        let back: ScanStep = serde_json::from_str(&json).unwrap();
        assert_eq!(step, back);
    }

    #[test]
    fn align_error_display_and_classification() {
        let err = AlignError::PortNotBound {
            missing: "measure".to_string(),
        };
        assert!(err.to_string().contains("measure"));
        assert!(err.is_configuration());

        let err2 = AlignError::BaselineMeasurementFailed { value: 0.0 };
        assert!(err2.to_string().contains("Baseline"));
        assert!(!err2.is_configuration());
    }
}
