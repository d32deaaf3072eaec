//! In-process stage simulation for running the engine without hardware.
//!
//! [`SimStage`] tracks a commanded position and reports the signal of a
//! [`GaussianField`] there.  It supports the same interlocks as a real stage
//! through a [`PositionVerifier`], an optional settle delay, and cooperative
//! cancellation through a shared flag.
//!
//! # Example
//!
//! ```rust
//! use optalign_hal::port::MeasurementPort;
//! use optalign_hal::sim::{GaussianField, SimStage};
//! use optalign_types::Position;
//!
//! let field = GaussianField::new(Position::new(0.0, 0.0, -0.001), 400e-6, 0.001);
//! let mut stage = SimStage::new(field);
//!
//! let at_peak = stage.measure(Position::new(0.0, 0.0, -0.001));
//! assert!((at_peak - field.peak_value()).abs() < 1e-15);
//! assert_eq!(stage.moves(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use optalign_types::Position;
use tracing::{debug, warn};

use crate::limits::{PositionRule, PositionVerifier};
use crate::port::MeasurementPort;

// ────────────────────────────────────────────────────────────────────────────
// Signal model
// ────────────────────────────────────────────────────────────────────────────

/// Isotropic Gaussian signal: `baseline + amplitude · exp(-d² / 2σ²)` where
/// `d` is the distance to `peak`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianField {
    pub peak: Position,
    pub amplitude: f64,
    /// Width in position units (mm).
    pub sigma: f64,
    /// Floor reading far from the peak.
    pub baseline: f64,
}

impl GaussianField {
    /// A field with a `1e-9` floor.
    pub fn new(peak: Position, amplitude: f64, sigma: f64) -> Self {
        Self {
            peak,
            amplitude,
            sigma,
            baseline: 1e-9,
        }
    }

    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn value_at(&self, position: &Position) -> f64 {
        let d = position.distance_to(&self.peak);
        self.baseline + self.amplitude * (-(d * d) / (2.0 * self.sigma * self.sigma)).exp()
    }

    /// Reading at the peak itself.
    pub fn peak_value(&self) -> f64 {
        self.baseline + self.amplitude
    }
}

impl Default for GaussianField {
    fn default() -> Self {
        Self::new(Position::new(0.0, 0.0, -0.001), 400e-6, 0.001)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated stage
// ────────────────────────────────────────────────────────────────────────────

/// A simulated three-axis stage with a power meter attached.
pub struct SimStage {
    field: GaussianField,
    position: Position,
    verifier: PositionVerifier,
    settle: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
    moves: u64,
}

impl SimStage {
    /// Create a stage parked at the origin with no interlocks.
    pub fn new(field: GaussianField) -> Self {
        Self {
            field,
            position: Position::origin(),
            verifier: PositionVerifier::new(),
            settle: None,
            cancel: None,
            moves: 0,
        }
    }

    /// Add an interlock consulted by [`MeasurementPort::validate`].
    pub fn with_rule(mut self, rule: Box<dyn PositionRule>) -> Self {
        self.verifier.add_rule(rule);
        self
    }

    /// Sleep for `settle` after every move, as a real stage would.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = Some(settle);
        self
    }

    /// Share a cancellation flag.  Once it is set every measurement returns
    /// `0.0` without moving.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn field(&self) -> &GaussianField {
        &self.field
    }

    /// Last commanded position.
    pub fn position(&self) -> Position {
        self.position
    }

    /// Number of moves performed so far.
    pub fn moves(&self) -> u64 {
        self.moves
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

impl MeasurementPort for SimStage {
    fn measure(&mut self, position: Position) -> f64 {
        if self.cancelled() {
            debug!(%position, "sim stage: cancelled before move");
            return 0.0;
        }
        self.position = position;
        self.moves += 1;
        if let Some(settle) = self.settle {
            thread::sleep(settle);
        }
        if self.cancelled() {
            debug!(%position, "sim stage: cancelled while settling");
            return 0.0;
        }
        self.field.value_at(&position)
    }

    fn validate(&self, position: Position) -> bool {
        match self.verifier.verify(&position) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "sim stage: position rejected");
                false
            }
        }
    }
}
