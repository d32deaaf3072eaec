//! [`PositionVerifier`] – stage travel interlock / rule engine.
//!
//! Before a candidate position is handed to the hardware, pass it through
//! [`PositionVerifier::verify`].  Every registered [`PositionRule`] is
//! evaluated in order; the first violation returns an
//! [`AlignError::InvalidPosition`] and the stage is **not** moved.
//!
//! Two built-in rules are provided:
//! - [`TravelLimitRule`] – rejects positions that have wandered more than a
//!   configured distance from a reference coordinate along one axis.
//! - [`BoundsRule`] – rejects positions outside an absolute `[min, max]`
//!   window along one axis.

use optalign_types::{AlignError, Axis, Position};

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single geometric invariant that a stage position must satisfy.
///
/// Implement this trait to create custom interlocks and add them to a
/// [`PositionVerifier`] via [`PositionVerifier::add_rule`].
pub trait PositionRule: Send + Sync {
    /// Human-readable name used in rejection messages.
    fn name(&self) -> &str;

    /// Return `Ok(())` when `position` satisfies the invariant, or
    /// [`AlignError::InvalidPosition`] when it is violated.
    fn check(&self, position: &Position) -> Result<(), AlignError>;
}

// ────────────────────────────────────────────────────────────────────────────
// PositionVerifier
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that validates a [`Position`] against all registered
/// [`PositionRule`]s.
///
/// # Example
///
/// ```
/// use optalign_hal::limits::{PositionVerifier, TravelLimitRule};
/// use optalign_types::{Axis, Position};
///
/// let verifier = PositionVerifier::new()
///     .with_rule(Box::new(TravelLimitRule { axis: Axis::Z, origin: 0.0, max_travel: 0.005 }));
///
/// assert!(verifier.verify(&Position::new(0.0, 0.0, -0.004)).is_ok());
/// assert!(verifier.verify(&Position::new(0.0, 0.0, -0.006)).is_err());
/// ```
#[derive(Default)]
pub struct PositionVerifier {
    rules: Vec<Box<dyn PositionRule>>,
}

impl PositionVerifier {
    /// Create an empty verifier with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new [`PositionRule`].  Rules are evaluated in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn PositionRule>) {
        self.rules.push(rule);
    }

    /// Builder form of [`add_rule`](Self::add_rule).
    pub fn with_rule(mut self, rule: Box<dyn PositionRule>) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate `position` against every registered rule.
    ///
    /// Non-finite coordinates are always rejected.  Otherwise returns the
    /// first [`AlignError::InvalidPosition`] encountered, or `Ok(())` when all
    /// rules pass.
    pub fn verify(&self, position: &Position) -> Result<(), AlignError> {
        if !position.is_finite() {
            return Err(AlignError::InvalidPosition {
                rule: "finite".to_string(),
                details: format!("non-finite coordinate in {position:?}"),
            });
        }
        for rule in &self.rules {
            rule.check(position)?;
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Rejects positions whose `axis` coordinate is further than `max_travel`
/// from `origin`.
pub struct TravelLimitRule {
    /// The axis this rule applies to.
    pub axis: Axis,
    /// Reference coordinate, usually where the scan started.
    pub origin: f64,
    /// Maximum allowed absolute excursion from `origin` (inclusive).
    pub max_travel: f64,
}

impl PositionRule for TravelLimitRule {
    fn name(&self) -> &str {
        "travel_limit"
    }

    fn check(&self, position: &Position) -> Result<(), AlignError> {
        let excursion = (position.get(self.axis) - self.origin).abs();
        // Tolerate rounding from repeated step accumulation at the boundary.
        if excursion > self.max_travel + 1e-12 {
            return Err(AlignError::InvalidPosition {
                rule: self.name().to_string(),
                details: format!(
                    "{}-axis excursion {excursion:.6} exceeds max travel {}",
                    self.axis, self.max_travel
                ),
            });
        }
        Ok(())
    }
}

/// Rejects positions whose `axis` coordinate lies outside `[min, max]`.
pub struct BoundsRule {
    /// The axis this rule applies to.
    pub axis: Axis,
    /// Minimum allowed coordinate (inclusive).
    pub min: f64,
    /// Maximum allowed coordinate (inclusive).
    pub max: f64,
}

impl PositionRule for BoundsRule {
    fn name(&self) -> &str {
        "bounds"
    }

    fn check(&self, position: &Position) -> Result<(), AlignError> {
        let value = position.get(self.axis);
        if !(self.min..=self.max).contains(&value) {
            return Err(AlignError::InvalidPosition {
                rule: self.name().to_string(),
                details: format!(
                    "{}-axis coordinate {value} out of [{}, {}]",
                    self.axis, self.min, self.max
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------ helpers
    fn travel_verifier(axis: Axis, origin: f64, max_travel: f64) -> PositionVerifier {
        PositionVerifier::new().with_rule(Box::new(TravelLimitRule {
            axis,
            origin,
            max_travel,
        }))
    }

    // ------------------------------------------------------------------ TravelLimitRule

    #[test]
    fn position_within_travel_passes() {
        let v = travel_verifier(Axis::X, 1.0, 0.5);
        assert!(v.verify(&Position::new(1.4, 0.0, 0.0)).is_ok());
        assert!(v.verify(&Position::new(0.6, 9.0, 9.0)).is_ok());
    }

    #[test]
    fn position_at_travel_boundary_passes() {
        let v = travel_verifier(Axis::Z, 0.0, 0.005);
        assert!(v.verify(&Position::new(0.0, 0.0, -0.005)).is_ok());
    }

    #[test]
    fn position_beyond_travel_is_rejected() {
        let v = travel_verifier(Axis::Y, 0.0, 0.01);
        let result = v.verify(&Position::new(0.0, 0.02, 0.0));
        assert!(matches!(
            result,
            Err(AlignError::InvalidPosition { ref rule, .. }) if rule == "travel_limit"
        ));
    }

    // ------------------------------------------------------------------ BoundsRule

    #[test]
    fn bounds_rule_rejects_outside_window() {
        let v = PositionVerifier::new().with_rule(Box::new(BoundsRule {
            axis: Axis::Z,
            min: -1.0,
            max: 0.0,
        }));
        assert!(v.verify(&Position::new(0.0, 0.0, -0.5)).is_ok());
        assert!(v.verify(&Position::new(0.0, 0.0, 0.1)).is_err());
    }

    // ------------------------------------------------------------------ verifier

    #[test]
    fn empty_verifier_accepts_finite_positions() {
        let v = PositionVerifier::new();
        assert!(v.is_empty());
        assert!(v.verify(&Position::new(1e3, -1e3, 0.0)).is_ok());
    }

    #[test]
    fn non_finite_positions_are_always_rejected() {
        let v = PositionVerifier::new();
        assert!(v.verify(&Position::new(f64::NAN, 0.0, 0.0)).is_err());
        assert!(v.verify(&Position::new(0.0, f64::INFINITY, 0.0)).is_err());
    }

    #[test]
    fn first_violation_wins() {
        let v = PositionVerifier::new()
            .with_rule(Box::new(BoundsRule {
                axis: Axis::X,
                min: 0.0,
                max: 1.0,
            }))
            .with_rule(Box::new(TravelLimitRule {
                axis: Axis::X,
                origin: 0.0,
                max_travel: 0.5,
            }));
        assert_eq!(v.len(), 2);
        match v.verify(&Position::new(2.0, 0.0, 0.0)) {
            Err(AlignError::InvalidPosition { rule, .. }) => assert_eq!(rule, "bounds"),
            other => panic!("expected bounds violation, got {other:?}"),
        }
    }
}
