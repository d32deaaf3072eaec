//! `optalign-hal` – the hardware boundary of the alignment engine.
//!
//! The engine never talks to a motion controller or a power meter directly.
//! It only sees a [`MeasurementPort`][port::MeasurementPort]: *measure at a
//! position* and *validate a position*.
//!
//! # Modules
//!
//! - [`port`] – the [`MeasurementPort`][port::MeasurementPort] trait and the
//!   closure-backed [`FnPort`][port::FnPort].
//! - [`limits`] – [`PositionVerifier`][limits::PositionVerifier], a rule
//!   engine for stage travel and bounds interlocks.
//! - [`sim`] – [`SimStage`][sim::SimStage], an in-process stage whose signal
//!   follows a [`GaussianField`][sim::GaussianField]; used by the CLI and in
//!   headless tests.

pub mod limits;
pub mod port;
pub mod sim;

pub use limits::{BoundsRule, PositionRule, PositionVerifier, TravelLimitRule};
pub use port::{FnPort, MeasurementPort};
pub use sim::{GaussianField, SimStage};
