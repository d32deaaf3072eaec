//! [`MeasurementPort`] – the two hardware primitives the engine consumes.
//!
//! Implementations own motion, settle delays and cancellation. A reading of
//! `0.0` means the measurement failed or was cancelled; the engine treats it
//! as a non-improving trial.

use optalign_types::{AlignError, Position};

/// Caller-supplied access to the stage and the sensor.
pub trait MeasurementPort: Send {
    /// Move to `position`, wait for the stage to settle and return the
    /// sensor reading. Blocking.
    fn measure(&mut self, position: Position) -> f64;

    /// Side-effect-free legality check for `position`.
    fn validate(&self, position: Position) -> bool;

    /// Fail fast when the port cannot serve both primitives.
    ///
    /// # Errors
    ///
    /// Returns [`AlignError::PortNotBound`] naming the missing primitive(s).
    fn ensure_bound(&self) -> Result<(), AlignError> {
        Ok(())
    }
}

type MeasureFn = Box<dyn FnMut(Position) -> f64 + Send>;
type ValidateFn = Box<dyn Fn(Position) -> bool + Send>;

/// A [`MeasurementPort`] assembled from two closures.
///
/// # Example
///
/// ```
/// use optalign_hal::port::{FnPort, MeasurementPort};
/// use optalign_types::Position;
///
/// let mut port = FnPort::new()
///     .with_measure(|p: Position| 1e-6 + p.x.abs())
///     .with_validate(|p: Position| p.z <= 0.0);
///
/// assert!(port.ensure_bound().is_ok());
/// assert!(port.validate(Position::new(0.0, 0.0, -0.1)));
/// assert!(port.measure(Position::origin()) > 0.0);
/// ```
#[derive(Default)]
pub struct FnPort {
    measure: Option<MeasureFn>,
    validate: Option<ValidateFn>,
}

impl FnPort {
    /// Create a port with neither primitive bound.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_measure(mut self, f: impl FnMut(Position) -> f64 + Send + 'static) -> Self {
        self.measure = Some(Box::new(f));
        self
    }

    pub fn with_validate(mut self, f: impl Fn(Position) -> bool + Send + 'static) -> Self {
        self.validate = Some(Box::new(f));
        self
    }

    pub fn is_bound(&self) -> bool {
        self.measure.is_some() && self.validate.is_some()
    }
}

impl MeasurementPort for FnPort {
    fn measure(&mut self, position: Position) -> f64 {
        match self.measure.as_mut() {
            Some(f) => f(position),
            None => 0.0,
        }
    }

    fn validate(&self, position: Position) -> bool {
        self.validate.as_ref().is_some_and(|f| f(position))
    }

    fn ensure_bound(&self) -> Result<(), AlignError> {
        let missing: Vec<&str> = [
            ("measure", self.measure.is_none()),
            ("validate", self.validate.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AlignError::PortNotBound {
                missing: missing.join(", "),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_port_reports_both_primitives() {
        let port = FnPort::new();
        match port.ensure_bound() {
            Err(AlignError::PortNotBound { missing }) => {
                assert_eq!(missing, "measure, validate");
            }
            other => panic!("expected PortNotBound, got {other:?}"),
        }
    }

    #[test]
    fn half_bound_port_names_missing_primitive() {
        let port = FnPort::new().with_measure(|_| 1.0);
        assert!(!port.is_bound());
        assert!(matches!(
            port.ensure_bound(),
            Err(AlignError::PortNotBound { ref missing }) if missing == "validate"
        ));
    }

    #[test]
    fn unbound_primitives_fail_closed() {
        let mut port = FnPort::new();
        assert!(!port.validate(Position::origin()));
        assert_eq!(port.measure(Position::origin()), 0.0);
    }

    #[test]
    fn closures_are_forwarded() {
        let mut calls = 0u32;
        let mut port = FnPort::new()
            .with_measure(move |p: Position| {
                calls += 1;
                p.z + f64::from(calls)
            })
            .with_validate(|p: Position| p.x >= 0.0);
        assert!(port.ensure_bound().is_ok());
        assert!(port.validate(Position::new(1.0, 0.0, 0.0)));
        assert!(!port.validate(Position::new(-1.0, 0.0, 0.0)));
        assert!((port.measure(Position::origin()) - 1.0).abs() < f64::EPSILON);
        assert!((port.measure(Position::origin()) - 2.0).abs() < f64::EPSILON);
    }
}
