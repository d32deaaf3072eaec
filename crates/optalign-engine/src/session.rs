//! [`ScanSession`] – mutable state of one running scan.
//!
//! The session owns the measurement history, the running best, the
//! direction memory and the measurement index counter, and is the only code
//! that calls the [`MeasurementPort`].  Every measured trial goes through
//! [`ScanSession::trial`], so index monotonicity and the running best hold
//! by construction.

use chrono::Utc;
use optalign_hal::{MeasurementPort, PositionVerifier};
use optalign_types::{Axis, Direction, ScanStep};
use tracing::{debug, trace, warn};

use crate::direction::DirectionMemory;
use crate::history::ScanHistory;

/// Callback receiving every recorded step, baseline included.
pub type StepObserver = Box<dyn FnMut(&ScanStep) + Send>;

pub struct ScanSession<'a> {
    port: &'a mut dyn MeasurementPort,
    observer: Option<&'a mut StepObserver>,
    travel: PositionVerifier,
    history: ScanHistory,
    best: ScanStep,
    memory: DirectionMemory,
    next_index: u64,
    rejected: u64,
}

impl<'a> ScanSession<'a> {
    /// Start a session from `baseline`, which is recorded as index `0`.
    pub fn new(port: &'a mut dyn MeasurementPort, baseline: ScanStep) -> Self {
        let baseline = ScanStep {
            axis: None,
            direction: None,
            step_size: 0.0,
            relative_improvement: 0.0,
            is_peak: false,
            measurement_index: 0,
            ..baseline
        };
        let mut history = ScanHistory::new();
        history.push(baseline.clone());
        Self {
            port,
            observer: None,
            travel: PositionVerifier::new(),
            history,
            best: baseline,
            memory: DirectionMemory::new(),
            next_index: 1,
            rejected: 0,
        }
    }

    /// Interlocks checked before the port's own `validate`.
    pub fn with_travel_limits(mut self, travel: PositionVerifier) -> Self {
        self.travel = travel;
        self
    }

    /// Attach a progress observer.  It is immediately replayed every step
    /// recorded so far.
    pub fn with_observer(mut self, observer: Option<&'a mut StepObserver>) -> Self {
        self.observer = observer;
        if let Some(notify) = self.observer.as_deref_mut() {
            for step in self.history.iter() {
                notify(step);
            }
        }
        self
    }

    /// Move from `current` by `step_size` along `axis` in `direction` and
    /// measure.
    ///
    /// Returns `None` without measuring when the candidate is rejected by
    /// the travel limits or by the port.  Otherwise the trial is appended to
    /// the history, the running best is updated, and the recorded step is
    /// returned.
    pub fn trial(
        &mut self,
        current: &ScanStep,
        axis: Axis,
        direction: Direction,
        step_size: f64,
    ) -> Option<ScanStep> {
        let candidate = current
            .position
            .offset(axis, direction.sign() * step_size);

        if let Err(e) = self.travel.verify(&candidate) {
            debug!(%axis, %direction, error = %e, "candidate outside travel limits");
            self.rejected += 1;
            return None;
        }
        if !self.port.validate(candidate) {
            debug!(%axis, %direction, position = %candidate, "candidate rejected by port");
            self.rejected += 1;
            return None;
        }

        let raw = self.port.measure(candidate);
        let value = if raw.is_finite() && raw >= 0.0 {
            raw
        } else {
            warn!(%axis, reading = raw, "unusable reading treated as failed measurement");
            0.0
        };

        let mut step = ScanStep {
            position: candidate,
            value,
            axis: Some(axis),
            direction: Some(direction),
            step_size,
            relative_improvement: (value - current.value) / current.value,
            is_peak: false,
            measurement_index: self.next_index,
            timestamp: Utc::now(),
        };
        self.next_index += 1;

        if step.value > self.best.value {
            step.is_peak = true;
            self.best = step.clone();
        }
        trace!(
            index = step.measurement_index,
            %axis,
            %direction,
            step_size,
            value,
            improvement = step.relative_improvement,
            "trial"
        );
        self.record(step.clone());
        Some(step)
    }

    fn record(&mut self, step: ScanStep) {
        if let Some(notify) = self.observer.as_deref_mut() {
            notify(&step);
        }
        self.history.push(step);
    }

    /// Measured trials so far, baseline excluded.
    pub fn measurements(&self) -> u64 {
        self.next_index - 1
    }

    /// Candidates rejected without measuring.
    pub fn rejected_candidates(&self) -> u64 {
        self.rejected
    }

    pub fn best(&self) -> &ScanStep {
        &self.best
    }

    pub fn history(&self) -> &ScanHistory {
        &self.history
    }

    pub fn memory(&self) -> &DirectionMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut DirectionMemory {
        &mut self.memory
    }

    /// Consume the session, keeping its history, best and memory.
    pub fn finish(self) -> (ScanHistory, ScanStep, DirectionMemory) {
        (self.history, self.best, self.memory)
    }
}
