//! Direction memory and [`DirectionSelector`] strategies.
//!
//! At the start of every axis call the optimizer asks a selector which way
//! to move.  Selectors may spend measurements probing; a probe that clears
//! the improvement threshold is handed back so the optimizer continues from
//! it instead of measuring the same spot again.

use std::collections::BTreeMap;

use optalign_types::{Axis, Direction, DirectionConstraint, ScanStep};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ScanConfig;
use crate::session::ScanSession;

// ────────────────────────────────────────────────────────────────────────────
// DirectionMemory
// ────────────────────────────────────────────────────────────────────────────

/// What the engine learned about one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AxisMemory {
    pub last_good_direction: Direction,
    pub last_improvement: f64,
    pub consecutive_declines: u32,
}

/// Per-axis record of the most recent improving direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DirectionMemory {
    axes: BTreeMap<Axis, AxisMemory>,
}

impl DirectionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, axis: Axis) -> Option<&AxisMemory> {
        self.axes.get(&axis)
    }

    /// Remember `direction` as good for `axis` and reset its decline count.
    pub fn record_accept(&mut self, axis: Axis, direction: Direction, improvement: f64) {
        self.axes.insert(
            axis,
            AxisMemory {
                last_good_direction: direction,
                last_improvement: improvement,
                consecutive_declines: 0,
            },
        );
    }

    /// Count a declined trial against the remembered direction, if any.
    pub fn record_decline(&mut self, axis: Axis) {
        if let Some(entry) = self.axes.get_mut(&axis) {
            entry.consecutive_declines += 1;
        }
    }

    /// The remembered direction for `axis`, provided it has declined fewer
    /// than `decline_limit` times in a row.
    pub fn preferred(&self, axis: Axis, decline_limit: u32) -> Option<Direction> {
        self.get(axis)
            .filter(|m| m.consecutive_declines < decline_limit)
            .map(|m| m.last_good_direction)
    }

    pub fn clear(&mut self) {
        self.axes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<Axis, AxisMemory> {
        self.axes.clone()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Selector contract
// ────────────────────────────────────────────────────────────────────────────

/// Everything a selector needs to decide on a direction for one axis call.
#[derive(Debug, Clone, Copy)]
pub struct DirectionQuery<'q> {
    pub axis: Axis,
    pub current: &'q ScanStep,
    /// Step used for probing.
    pub step_size: f64,
    pub threshold: f64,
    pub constraint: DirectionConstraint,
    /// Measurements the selector may spend on probes.
    pub max_probes: u64,
}

/// A selector's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A probe in `direction` cleared the threshold; continue from `step`.
    Probed { direction: Direction, step: ScanStep },
    /// Only one direction is permitted; nothing was measured.
    Unprobed { direction: Direction },
}

impl Selection {
    pub fn direction(&self) -> Direction {
        match self {
            Selection::Probed { direction, .. } | Selection::Unprobed { direction } => *direction,
        }
    }
}

/// Strategy deciding the direction of travel for one axis call.
///
/// Returning `None` ends the axis call with the position unchanged.
pub trait DirectionSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, session: &mut ScanSession<'_>, query: &DirectionQuery<'_>)
    -> Option<Selection>;
}

/// [`MemoryAssisted`] when `config.direction_memory` is on, otherwise
/// [`ConstraintOnly`].
pub fn default_direction_selector(config: &ScanConfig) -> Box<dyn DirectionSelector> {
    if config.direction_memory {
        Box::new(MemoryAssisted::new(config.memory_decline_limit))
    } else {
        Box::new(ConstraintOnly)
    }
}

/// Outcome of a probe that already happened before the shared fallthrough.
enum Probe {
    Measured(ScanStep),
    Rejected,
}

/// Probe every permitted direction not in `known`, within
/// `query.max_probes` measurements, and pick the largest improvement above
/// the threshold, `Positive` winning exact ties.
fn probe_permitted(
    session: &mut ScanSession<'_>,
    query: &DirectionQuery<'_>,
    known: Option<(Direction, Probe)>,
) -> Option<Selection> {
    let allowed = query.constraint.allowed();
    if let ([only], None) = (allowed, &known) {
        return Some(Selection::Unprobed { direction: *only });
    }

    let mut probes: Vec<(Direction, Probe)> = known.into_iter().collect();
    let mut spent = probes
        .iter()
        .filter(|(_, p)| matches!(p, Probe::Measured(_)))
        .count() as u64;
    for &direction in allowed {
        if probes.iter().any(|(d, _)| *d == direction) {
            continue;
        }
        if spent >= query.max_probes {
            debug!(axis = %query.axis, %direction, "probe budget spent");
            break;
        }
        let probe = match session.trial(query.current, query.axis, direction, query.step_size) {
            Some(step) => {
                spent += 1;
                Probe::Measured(step)
            }
            None => Probe::Rejected,
        };
        probes.push((direction, probe));
    }

    let mut best: Option<(Direction, &ScanStep)> = None;
    for direction in Direction::ALL {
        let Some(step) = probes.iter().find_map(|(d, p)| match p {
            Probe::Measured(step) if *d == direction => Some(step),
            _ => None,
        }) else {
            continue;
        };
        if step.relative_improvement > query.threshold
            && best.is_none_or(|(_, b)| step.relative_improvement > b.relative_improvement)
        {
            best = Some((direction, step));
        }
    }

    match best {
        Some((direction, step)) => {
            debug!(axis = %query.axis, %direction, improvement = step.relative_improvement, "direction selected");
            Some(Selection::Probed {
                direction,
                step: step.clone(),
            })
        }
        None => {
            debug!(axis = %query.axis, "no improving direction");
            None
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Strategies
// ────────────────────────────────────────────────────────────────────────────

/// Uses only the configured direction constraint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintOnly;

impl DirectionSelector for ConstraintOnly {
    fn name(&self) -> &'static str {
        "constraint_only"
    }

    fn select(
        &self,
        session: &mut ScanSession<'_>,
        query: &DirectionQuery<'_>,
    ) -> Option<Selection> {
        probe_permitted(session, query, None)
    }
}

/// Tries the remembered direction first, falling back to probing.
///
/// A remembered direction that fails to clear the threshold has its decline
/// count raised; its probe still takes part in the fallthrough comparison
/// and is never measured twice.
#[derive(Debug, Clone, Copy)]
pub struct MemoryAssisted {
    decline_limit: u32,
}

impl MemoryAssisted {
    /// Trust a remembered direction while it has fewer than `decline_limit`
    /// consecutive declines.
    pub fn new(decline_limit: u32) -> Self {
        Self { decline_limit }
    }
}

impl Default for MemoryAssisted {
    fn default() -> Self {
        Self::new(2)
    }
}

impl DirectionSelector for MemoryAssisted {
    fn name(&self) -> &'static str {
        "memory_assisted"
    }

    fn select(
        &self,
        session: &mut ScanSession<'_>,
        query: &DirectionQuery<'_>,
    ) -> Option<Selection> {
        let remembered = session
            .memory()
            .preferred(query.axis, self.decline_limit)
            .filter(|d| query.constraint.permits(*d));

        let Some(direction) = remembered.filter(|_| query.max_probes > 0) else {
            return probe_permitted(session, query, None);
        };

        debug!(axis = %query.axis, %direction, "trying remembered direction");
        let known = match session.trial(query.current, query.axis, direction, query.step_size) {
            Some(step) if step.relative_improvement > query.threshold => {
                return Some(Selection::Probed { direction, step });
            }
            Some(step) => {
                session.memory_mut().record_decline(query.axis);
                Probe::Measured(step)
            }
            None => Probe::Rejected,
        };
        probe_permitted(session, query, Some((direction, known)))
    }
}
