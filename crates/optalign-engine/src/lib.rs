//! `optalign-engine` – hill-climbing alignment of a 3-axis stage.
//!
//! The engine moves one axis at a time, measures the signal through a
//! [`MeasurementPort`][optalign_hal::MeasurementPort], keeps steps that
//! improve it by more than a per-axis threshold and stops each axis once the
//! step policy gives up or the measurement budget is spent.
//!
//! # Modules
//!
//! - [`config`] – [`ScanConfig`] with the `adaptive()` and `phased()` presets.
//! - [`step_policy`] – [`StepSizePolicy`] and its two implementations:
//!   [`ContinuousPowerMapping`] (step size from signal level) and
//!   [`PhasedLadder`] (fixed coarse/fine/ultra-fine ladders).
//! - [`direction`] – [`DirectionMemory`] and the [`DirectionSelector`]
//!   strategies that probe for an improving direction.
//! - [`session`] – [`ScanSession`], the only code that measures; owns the
//!   history, running best and measurement index.
//! - [`axis_optimizer`] – [`AxisOptimizer`], the per-axis climb.
//! - [`orchestrator`] – [`ScanEngine`], sequencing axes, passes and phases.
//! - [`history`] – [`ScanHistory`] and [`ScanStatistics`].
//! - [`report`] – [`ScanReport`], the JSON export document.
//! - [`telemetry`] – [`init_tracing`] for binaries.

pub mod axis_optimizer;
pub mod config;
pub mod direction;
pub mod history;
pub mod orchestrator;
pub mod report;
pub mod session;
pub mod step_policy;
pub mod telemetry;

pub use axis_optimizer::{AxisOptimizer, AxisRun, AxisTermination};
pub use config::{AxisMap, AxisProfile, PowerStepMapping, ScanConfig, ScanMode, StepLadder};
pub use direction::{
    AxisMemory, ConstraintOnly, DirectionMemory, DirectionQuery, DirectionSelector,
    MemoryAssisted, Selection,
};
pub use history::{AxisStatistics, ScanHistory, ScanStatistics};
pub use orchestrator::{PhaseResult, ScanEngine, ScanResult};
pub use report::{AlgorithmStats, MeasurementRecord, PeakRecord, ScanReport};
pub use session::{ScanSession, StepObserver};
pub use step_policy::{
    ContinuousPowerMapping, DeclineAction, PhasedLadder, StepSizePolicy,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
