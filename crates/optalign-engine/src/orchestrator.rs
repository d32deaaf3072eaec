//! [`ScanEngine`] – sequences axes and phases over one scan.
//!
//! The engine owns its [`ScanConfig`], the bound [`MeasurementPort`] and the
//! injected strategies.  Each call to [`ScanEngine::scan`] starts a fresh
//! [`ScanSession`] so history, running best and direction memory never leak
//! between scans.
//!
//! # Example
//!
//! ```
//! use optalign_engine::{ScanConfig, ScanEngine};
//! use optalign_hal::sim::{GaussianField, SimStage};
//! use optalign_types::Position;
//!
//! let stage = SimStage::new(GaussianField::default());
//! let mut engine = ScanEngine::new(ScanConfig::phased()).with_port(stage);
//!
//! let result = engine.scan_from(Position::origin()).expect("scan");
//! assert!(result.best.value >= result.history.steps()[0].value);
//! ```

use optalign_hal::{MeasurementPort, PositionVerifier, TravelLimitRule};
use optalign_types::{AlignError, Axis, Phase, Position, ScanStep};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::axis_optimizer::{AxisOptimizer, AxisRun};
use crate::config::{ScanConfig, ScanMode};
use crate::direction::{DirectionMemory, DirectionSelector, default_direction_selector};
use crate::history::{ScanHistory, ScanStatistics};
use crate::session::{ScanSession, StepObserver};
use crate::step_policy::{StepSizePolicy, default_step_policy};

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

/// Before/after figures for one phase of a phased scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PhaseResult {
    pub phase: Phase,
    pub value_before: f64,
    pub value_after: f64,
    /// `(after - before) / before`.
    pub improvement: f64,
    pub passes: usize,
    pub skipped: bool,
}

impl PhaseResult {
    fn completed(phase: Phase, value_before: f64, value_after: f64, passes: usize) -> Self {
        Self {
            phase,
            value_before,
            value_after,
            improvement: (value_after - value_before) / value_before,
            passes,
            skipped: false,
        }
    }

    fn skipped(phase: Phase, value: f64) -> Self {
        Self {
            phase,
            value_before: value,
            value_after: value,
            improvement: 0.0,
            passes: 0,
            skipped: true,
        }
    }
}

/// Everything a completed scan produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScanResult {
    pub mode: ScanMode,
    /// Highest reading observed.
    pub best: ScanStep,
    /// Position the last axis call ended at.
    pub final_step: ScanStep,
    pub history: ScanHistory,
    pub statistics: ScanStatistics,
    /// Empty in adaptive mode.
    pub phases: Vec<PhaseResult>,
    pub axis_runs: Vec<AxisRun>,
    pub memory: DirectionMemory,
    /// Passes over all axes (coarse passes in phased mode).
    pub passes: usize,
    pub early_stopped: bool,
    pub rejected_candidates: u64,
    pub step_policy: String,
    pub direction_selector: String,
}

// ────────────────────────────────────────────────────────────────────────────
// ScanEngine
// ────────────────────────────────────────────────────────────────────────────

/// Hill-climbing scan orchestrator.
pub struct ScanEngine {
    config: ScanConfig,
    port: Option<Box<dyn MeasurementPort>>,
    step_policy: Option<Box<dyn StepSizePolicy>>,
    selector: Option<Box<dyn DirectionSelector>>,
    observer: Option<StepObserver>,
    last: Option<ScanResult>,
}

impl ScanEngine {
    /// Create an engine with no port bound.  Strategies default to the ones
    /// matching `config`.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            port: None,
            step_policy: None,
            selector: None,
            observer: None,
            last: None,
        }
    }

    pub fn with_port(mut self, port: impl MeasurementPort + 'static) -> Self {
        self.set_port(port);
        self
    }

    pub fn set_port(&mut self, port: impl MeasurementPort + 'static) {
        self.port = Some(Box::new(port));
    }

    /// Override the step policy derived from the configured mode.
    pub fn with_step_policy(mut self, policy: Box<dyn StepSizePolicy>) -> Self {
        self.step_policy = Some(policy);
        self
    }

    /// Override the selector derived from `direction_memory`.
    pub fn with_direction_selector(mut self, selector: Box<dyn DirectionSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Receive every recorded step while a scan runs.
    pub fn with_observer(mut self, observer: impl FnMut(&ScanStep) + Send + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ScanConfig) {
        self.config = config;
    }

    /// Result of the most recent successful scan.
    pub fn last_result(&self) -> Option<&ScanResult> {
        self.last.as_ref()
    }

    /// Forget the previous scan's history, best record and memory.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Measure a baseline at `position` through the port, then [`scan`].
    ///
    /// [`scan`]: ScanEngine::scan
    ///
    /// # Errors
    ///
    /// See [`ScanEngine::scan`].
    pub fn scan_from(&mut self, position: Position) -> Result<ScanResult, AlignError> {
        let port = self.bound_port()?;
        let value = port.measure(position);
        self.scan(ScanStep::baseline(position, value))
    }

    /// Optimize starting from `start`, whose value must already be measured.
    ///
    /// # Errors
    ///
    /// - [`AlignError::InvalidConfig`] if the configuration is unusable.
    /// - [`AlignError::PortNotBound`] if no complete port is bound.
    /// - [`AlignError::BaselineMeasurementFailed`] if `start.value` is not a
    ///   positive finite reading.
    #[instrument(skip_all, fields(mode = %self.config.mode, start = %start.position))]
    pub fn scan(&mut self, start: ScanStep) -> Result<ScanResult, AlignError> {
        self.config.validate()?;
        self.bound_port()?;
        if !start.is_valid() {
            error!(value = start.value, "baseline measurement failed; aborting scan");
            return Err(AlignError::BaselineMeasurementFailed { value: start.value });
        }
        self.last = None;

        let config = &self.config;
        let default_policy;
        let policy: &dyn StepSizePolicy = match self.step_policy.as_deref() {
            Some(p) => p,
            None => {
                default_policy = default_step_policy(config);
                default_policy.as_ref()
            }
        };
        let default_selector;
        let selector: &dyn DirectionSelector = match self.selector.as_deref() {
            Some(s) => s,
            None => {
                default_selector = default_direction_selector(config);
                default_selector.as_ref()
            }
        };

        let Some(port) = self.port.as_deref_mut() else {
            return Err(unbound());
        };
        info!(
            baseline = start.value,
            policy = policy.name(),
            selector = selector.name(),
            "scan started"
        );

        let travel = travel_limits(config, start.position);
        let mut session = ScanSession::new(port, start)
            .with_travel_limits(travel)
            .with_observer(self.observer.as_mut());
        let optimizer = AxisOptimizer::new(config, policy, selector);
        let baseline = session.best().clone();

        let outcome = match config.mode {
            ScanMode::Adaptive => run_adaptive(config, &optimizer, &mut session, baseline),
            ScanMode::Phased => run_phased(config, &optimizer, &mut session, baseline),
        };

        let rejected_candidates = session.rejected_candidates();
        let (history, best, memory) = session.finish();
        let statistics = history.statistics();
        info!(
            best = best.value,
            position = %best.position,
            measurements = statistics.total_measurements,
            improvement = statistics.total_improvement,
            early_stopped = outcome.early_stopped,
            "scan finished"
        );

        let result = ScanResult {
            mode: config.mode,
            best,
            final_step: outcome.final_step,
            history,
            statistics,
            phases: outcome.phases,
            axis_runs: outcome.axis_runs,
            memory,
            passes: outcome.passes,
            early_stopped: outcome.early_stopped,
            rejected_candidates,
            step_policy: policy.name().to_string(),
            direction_selector: selector.name().to_string(),
        };
        self.last = Some(result.clone());
        Ok(result)
    }

    fn bound_port(&mut self) -> Result<&mut dyn MeasurementPort, AlignError> {
        let port = self.port.as_deref_mut().ok_or_else(unbound)?;
        port.ensure_bound()?;
        Ok(port)
    }
}

fn unbound() -> AlignError {
    AlignError::PortNotBound {
        missing: "measure, validate".to_string(),
    }
}

/// Per-axis travel interlocks centred on the scan's start position.
fn travel_limits(config: &ScanConfig, origin: Position) -> PositionVerifier {
    Axis::ALL
        .into_iter()
        .fold(PositionVerifier::new(), |verifier, axis| {
            verifier.with_rule(Box::new(TravelLimitRule {
                axis,
                origin: origin.get(axis),
                max_travel: config.max_travel.get(axis),
            }))
        })
}

// ────────────────────────────────────────────────────────────────────────────
// Mode drivers
// ────────────────────────────────────────────────────────────────────────────

struct Outcome {
    final_step: ScanStep,
    phases: Vec<PhaseResult>,
    axis_runs: Vec<AxisRun>,
    passes: usize,
    early_stopped: bool,
}

/// One sweep over the axis order.  Returns whether any axis improved.
fn run_pass(
    config: &ScanConfig,
    optimizer: &AxisOptimizer<'_>,
    session: &mut ScanSession<'_>,
    current: &mut ScanStep,
    phase: Phase,
    runs: &mut Vec<AxisRun>,
) -> bool {
    let mut improved = false;
    for axis in config.axis_order() {
        let budget = config.measurement_budget(axis, phase) as u64;
        let run = optimizer.optimize(session, current.clone(), axis, phase, budget);
        improved |= run.improved();
        *current = run.final_step.clone();
        runs.push(run);
    }
    improved
}

fn run_adaptive(
    config: &ScanConfig,
    optimizer: &AxisOptimizer<'_>,
    session: &mut ScanSession<'_>,
    baseline: ScanStep,
) -> Outcome {
    let mut current = baseline;
    let mut runs = Vec::new();
    let mut passes = 0;
    let mut early_stopped = false;
    let stop_level = config.early_stop_level();

    'passes: for pass in 1..=config.max_passes {
        passes = pass;
        let mut improved = false;
        for axis in config.axis_order() {
            let budget = config.measurement_budget(axis, Phase::Coarse) as u64;
            let run = optimizer.optimize(session, current.clone(), axis, Phase::Coarse, budget);
            improved |= run.improved();
            current = run.final_step.clone();
            runs.push(run);

            if session.best().value >= stop_level {
                info!(pass, best = session.best().value, "target signal reached; stopping early");
                early_stopped = true;
                break 'passes;
            }
        }
        info!(pass, value = current.value, improved, "adaptive pass complete");
        if !improved {
            break;
        }
    }

    Outcome {
        final_step: current,
        phases: Vec::new(),
        axis_runs: runs,
        passes,
        early_stopped,
    }
}

fn run_phased(
    config: &ScanConfig,
    optimizer: &AxisOptimizer<'_>,
    session: &mut ScanSession<'_>,
    baseline: ScanStep,
) -> Outcome {
    let mut current = baseline;
    let mut runs = Vec::new();
    let mut phases = Vec::with_capacity(3);

    // Coarse: repeat while any axis still improves.
    let before = current.value;
    let mut passes = 0;
    for pass in 1..=config.max_passes {
        passes = pass;
        let improved = run_pass(config, optimizer, session, &mut current, Phase::Coarse, &mut runs);
        info!(pass, value = current.value, improved, "coarse pass complete");
        if !improved {
            break;
        }
    }
    phases.push(PhaseResult::completed(Phase::Coarse, before, current.value, passes));

    let before = current.value;
    run_pass(config, optimizer, session, &mut current, Phase::Fine, &mut runs);
    let fine = PhaseResult::completed(Phase::Fine, before, current.value, 1);
    info!(value = current.value, improvement = fine.improvement, "fine phase complete");
    let fine_gain = fine.improvement;
    phases.push(fine);

    if fine_gain > config.convergence_threshold {
        let before = current.value;
        run_pass(config, optimizer, session, &mut current, Phase::UltraFine, &mut runs);
        let ultra = PhaseResult::completed(Phase::UltraFine, before, current.value, 1);
        info!(value = current.value, improvement = ultra.improvement, "ultra-fine phase complete");
        phases.push(ultra);
    } else {
        warn!(fine_gain, "fine phase converged; skipping ultra-fine");
        phases.push(PhaseResult::skipped(Phase::UltraFine, current.value));
    }

    Outcome {
        final_step: current,
        phases,
        axis_runs: runs,
        passes,
        early_stopped: false,
    }
}
