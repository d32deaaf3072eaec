//! [`AxisOptimizer`] – greedy hill climb along a single axis.
//!
//! One call walks through these states:
//!
//! ```text
//! SelectingDirection ──none──▶ NoDirection
//!         │
//!         ▼
//!     Stepping ──accept──▶ Continue ──▶ Stepping
//!         │                   └─ improvement < convergence ─▶ Converged
//!         └──decline──▶ Decline ──retry──▶ Stepping
//!                          └─ stop ─▶ Stopped / Converged
//! ```
//!
//! Every measurement, direction probes included, consumes one unit of the
//! call's budget.  Candidates rejected by `validate` cost no budget but
//! count as declines.

use optalign_types::{Axis, Phase, ScanStep};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::ScanConfig;
use crate::direction::{DirectionQuery, DirectionSelector, Selection};
use crate::session::ScanSession;
use crate::step_policy::{DeclineAction, StepSizePolicy};

/// Why an axis call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AxisTermination {
    /// The selector found no improving direction.
    NoDirection,
    /// Improvement fell below the convergence threshold.
    Converged,
    /// The step policy gave up after consecutive declines.
    Stopped,
    /// The measurement budget ran out.
    BudgetExhausted,
}

/// Result of one axis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AxisRun {
    pub axis: Axis,
    pub phase: Phase,
    /// Value at the position the call started from.
    pub start_value: f64,
    /// Position the call ended at; the start step when nothing was accepted.
    pub final_step: ScanStep,
    pub accepted: usize,
    pub measurements: u64,
    pub termination: AxisTermination,
}

impl AxisRun {
    pub fn improved(&self) -> bool {
        self.final_step.value > self.start_value
    }
}

enum StepOutcome {
    Continue(ScanStep),
    Decline(Option<ScanStep>),
}

/// Composes a [`StepSizePolicy`] and a [`DirectionSelector`] into the
/// per-axis climb.
pub struct AxisOptimizer<'c> {
    config: &'c ScanConfig,
    policy: &'c dyn StepSizePolicy,
    selector: &'c dyn DirectionSelector,
}

impl<'c> AxisOptimizer<'c> {
    pub fn new(
        config: &'c ScanConfig,
        policy: &'c dyn StepSizePolicy,
        selector: &'c dyn DirectionSelector,
    ) -> Self {
        Self {
            config,
            policy,
            selector,
        }
    }

    /// Climb along `axis` from `current`, spending at most `budget`
    /// measurements.
    #[instrument(skip_all, fields(%axis, %phase, budget))]
    pub fn optimize(
        &self,
        session: &mut ScanSession<'_>,
        current: ScanStep,
        axis: Axis,
        phase: Phase,
        budget: u64,
    ) -> AxisRun {
        let first_measurement = session.measurements();
        let threshold = self.config.improvement_threshold(axis);
        let convergence = self.config.convergence_threshold;
        let start_value = current.value;

        let mut run = AxisRun {
            axis,
            phase,
            start_value,
            final_step: current,
            accepted: 0,
            measurements: 0,
            termination: AxisTermination::NoDirection,
        };

        // ── SelectingDirection ───────────────────────────────────────────
        let query = DirectionQuery {
            axis,
            current: &run.final_step,
            step_size: self
                .policy
                .step_size(axis, run.final_step.value, phase),
            threshold,
            constraint: self.config.constraint(axis),
            max_probes: budget,
        };
        let Some(selection) = self.selector.select(session, &query) else {
            run.measurements = session.measurements() - first_measurement;
            debug!(%axis, %phase, measurements = run.measurements, "axis: no improving direction");
            return run;
        };
        let direction = selection.direction();

        let mut scale = 1.0;
        let mut declines = 0u32;
        let mut last_decline_flat = false;

        if let Selection::Probed { step, .. } = selection {
            let improvement = step.relative_improvement;
            session
                .memory_mut()
                .record_accept(axis, direction, improvement);
            scale = self.policy.on_accept(scale, improvement);
            run.final_step = step;
            run.accepted += 1;
            if improvement < convergence {
                run.termination = AxisTermination::Converged;
                run.measurements = session.measurements() - first_measurement;
                return run;
            }
        }

        // ── Stepping ─────────────────────────────────────────────────────
        run.termination = loop {
            if session.measurements() - first_measurement >= budget {
                break AxisTermination::BudgetExhausted;
            }

            let step_size = self
                .policy
                .step_size(axis, run.final_step.value, phase)
                * scale;
            let outcome = match session.trial(&run.final_step, axis, direction, step_size) {
                Some(step) if step.relative_improvement > threshold => StepOutcome::Continue(step),
                other => StepOutcome::Decline(other),
            };

            match outcome {
                StepOutcome::Continue(step) => {
                    let improvement = step.relative_improvement;
                    session
                        .memory_mut()
                        .record_accept(axis, direction, improvement);
                    scale = self.policy.on_accept(scale, improvement);
                    declines = 0;
                    run.final_step = step;
                    run.accepted += 1;
                    if improvement < convergence {
                        break AxisTermination::Converged;
                    }
                }
                StepOutcome::Decline(measured) => {
                    declines += 1;
                    if let Some(step) = measured {
                        session.memory_mut().record_decline(axis);
                        last_decline_flat = step.relative_improvement.abs() < convergence;
                    }
                    match self.policy.on_decline(scale, declines) {
                        DeclineAction::Retry { scale: next } => scale = next,
                        DeclineAction::Stop if last_decline_flat => {
                            break AxisTermination::Converged;
                        }
                        DeclineAction::Stop => break AxisTermination::Stopped,
                    }
                }
            }
        };

        run.measurements = session.measurements() - first_measurement;
        debug!(
            %axis,
            %phase,
            %direction,
            accepted = run.accepted,
            measurements = run.measurements,
            termination = ?run.termination,
            value = run.final_step.value,
            "axis optimized"
        );
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::{ConstraintOnly, MemoryAssisted};
    use crate::step_policy::{ContinuousPowerMapping, PhasedLadder};
    use optalign_hal::port::FnPort;
    use optalign_hal::sim::{GaussianField, SimStage};
    use optalign_types::{Direction, DirectionConstraint, Position};

    fn gaussian_stage(peak: Position, sigma: f64) -> SimStage {
        SimStage::new(GaussianField::new(peak, 400e-6, sigma).with_baseline(1e-9))
    }

    fn baseline(stage: &mut SimStage, at: Position) -> ScanStep {
        use optalign_hal::MeasurementPort;
        let value = stage.measure(at);
        ScanStep::baseline(at, value)
    }

    #[test]
    fn climbs_to_single_axis_peak_with_ladder() {
        let config = ScanConfig::phased();
        let policy = PhasedLadder::from_config(&config);
        let selector = ConstraintOnly;
        let optimizer = AxisOptimizer::new(&config, &policy, &selector);

        let mut stage = gaussian_stage(Position::new(0.0, 0.0, -0.003), 0.004);
        let start = baseline(&mut stage, Position::origin());
        let mut session = ScanSession::new(&mut stage, start.clone());

        let run = optimizer.optimize(&mut session, start, Axis::Z, Phase::Coarse, 8);
        assert!(run.improved());
        assert!(run.accepted >= 1);
        assert!(run.measurements <= 8);
        assert!((run.final_step.position.z + 0.003).abs() <= 0.005);
        assert_eq!(run.final_step.position.x, 0.0);
    }

    #[test]
    fn every_measurement_counts_against_budget() {
        let config = ScanConfig::phased();
        let policy = PhasedLadder::from_config(&config);
        let optimizer = AxisOptimizer::new(&config, &policy, &ConstraintOnly);

        // Monotonic signal: the climb would never stop on its own.
        let mut port = FnPort::new()
            .with_measure(|p: Position| 1.0 + 100.0 * p.x)
            .with_validate(|_| true);
        let start = ScanStep::baseline(Position::origin(), 1.0);
        let mut session = ScanSession::new(&mut port, start.clone());
        let run = optimizer.optimize(&mut session, start, Axis::X, Phase::Coarse, 4);

        assert_eq!(run.termination, AxisTermination::BudgetExhausted);
        assert_eq!(run.measurements, 4);
        assert_eq!(session.measurements(), 4);
    }

    #[test]
    fn single_measurement_budget_caps_direction_probing() {
        let config = ScanConfig::phased();
        let policy = PhasedLadder::from_config(&config);
        let optimizer = AxisOptimizer::new(&config, &policy, &ConstraintOnly);

        let mut port = FnPort::new()
            .with_measure(|p: Position| 1.0 + 100.0 * p.x)
            .with_validate(|_| true);
        let start = ScanStep::baseline(Position::origin(), 1.0);
        let mut session = ScanSession::new(&mut port, start.clone());
        let run = optimizer.optimize(&mut session, start, Axis::X, Phase::Coarse, 1);

        assert_eq!(run.measurements, 1);
        assert_eq!(session.measurements(), 1);
        assert_eq!(run.termination, AxisTermination::BudgetExhausted);
        assert_eq!(run.accepted, 1);
    }

    #[test]
    fn no_direction_returns_start_unchanged() {
        let config = ScanConfig::phased();
        let policy = PhasedLadder::from_config(&config);
        let optimizer = AxisOptimizer::new(&config, &policy, &ConstraintOnly);

        let mut port = FnPort::new().with_measure(|_| 1.0).with_validate(|_| true);
        let start = ScanStep::baseline(Position::new(0.1, 0.2, 0.3), 1.0);
        let mut session = ScanSession::new(&mut port, start.clone());
        let run = optimizer.optimize(&mut session, start.clone(), Axis::Y, Phase::Fine, 4);

        assert_eq!(run.termination, AxisTermination::NoDirection);
        assert_eq!(run.final_step, start);
        assert_eq!(run.accepted, 0);
        assert_eq!(run.measurements, 2);
    }

    #[test]
    fn rejected_candidates_cost_no_budget() {
        let mut config = ScanConfig::adaptive();
        config.set_axis_direction(Axis::Z, DirectionConstraint::Negative);
        let policy = ContinuousPowerMapping::from_config(&config);
        let optimizer = AxisOptimizer::new(&config, &policy, &ConstraintOnly);

        let mut port = FnPort::new()
            .with_measure(|_| panic!("rejected candidates must not be measured"))
            .with_validate(|_| false);
        let start = ScanStep::baseline(Position::origin(), 1e-5);
        let mut session = ScanSession::new(&mut port, start.clone());
        let run = optimizer.optimize(&mut session, start.clone(), Axis::Z, Phase::Coarse, 20);

        assert_eq!(run.termination, AxisTermination::Stopped);
        assert_eq!(run.measurements, 0);
        assert_eq!(run.final_step, start);
        assert!(session.rejected_candidates() > 1, "shrink-and-retry tries smaller steps");
    }

    #[test]
    fn remembered_direction_steers_next_axis_call() {
        let config = ScanConfig::phased();
        let policy = PhasedLadder::from_config(&config);
        let selector = MemoryAssisted::new(config.memory_decline_limit);
        let optimizer = AxisOptimizer::new(&config, &policy, &selector);

        // Signal keeps rising towards -Z; a short budget ends the first call
        // before any decline is recorded.
        let mut port = FnPort::new()
            .with_measure(|p: Position| 1.0 - 100.0 * p.z)
            .with_validate(|_| true);
        let start = ScanStep::baseline(Position::origin(), 1.0);
        let mut session = ScanSession::new(&mut port, start.clone());
        let run = optimizer.optimize(&mut session, start, Axis::Z, Phase::Coarse, 3);
        assert_eq!(run.termination, AxisTermination::BudgetExhausted);
        assert_eq!(
            session.memory().get(Axis::Z).map(|m| m.last_good_direction),
            Some(Direction::Negative)
        );

        // Without memory the next call would probe Positive first.
        let before = session.history().len();
        let from = run.final_step.clone();
        optimizer.optimize(&mut session, from.clone(), Axis::Z, Phase::Fine, 3);
        let next = &session.history().steps()[before];
        assert_eq!(next.direction, Some(Direction::Negative));
        assert!(next.position.z < from.position.z);
    }
}
