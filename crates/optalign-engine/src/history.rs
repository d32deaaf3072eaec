//! [`ScanHistory`] – the append-only measurement log of one scan – and the
//! [`ScanStatistics`] derived from it.

use std::collections::BTreeMap;

use optalign_types::{Axis, ScanStep};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ordered record of the baseline plus every measured trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScanHistory {
    steps: Vec<ScanStep>,
}

impl ScanHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, step: ScanStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ScanStep] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScanStep> {
        self.steps.iter()
    }

    /// The first recorded step.
    pub fn baseline(&self) -> Option<&ScanStep> {
        self.steps.first()
    }

    /// Every step after the baseline.
    pub fn trials(&self) -> &[ScanStep] {
        self.steps.get(1..).unwrap_or(&[])
    }

    /// The earliest step holding the highest value.
    pub fn best(&self) -> Option<&ScanStep> {
        self.steps.iter().fold(None, |best: Option<&ScanStep>, step| match best {
            Some(b) if b.value >= step.value => Some(b),
            _ => Some(step),
        })
    }

    pub fn statistics(&self) -> ScanStatistics {
        ScanStatistics::from_history(self)
    }
}

impl<'h> IntoIterator for &'h ScanHistory {
    type Item = &'h ScanStep;
    type IntoIter = std::slice::Iter<'h, ScanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Statistics
// ────────────────────────────────────────────────────────────────────────────

/// Per-axis summary of measured trials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AxisStatistics {
    pub measurements: usize,
    /// Percentage of all trials spent on this axis.
    pub share_percent: f64,
    pub average_step_size: f64,
    pub average_improvement: f64,
}

/// Aggregate figures for a whole scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScanStatistics {
    /// Trials after the baseline.
    pub total_measurements: usize,
    pub per_axis: BTreeMap<Axis, AxisStatistics>,
    pub baseline_value: f64,
    pub best_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub average_value: f64,
    /// `(best - baseline) / baseline`.
    pub total_improvement: f64,
}

impl ScanStatistics {
    pub fn from_history(history: &ScanHistory) -> Self {
        let (Some(baseline), Some(best)) = (history.baseline(), history.best()) else {
            return Self::default();
        };

        let trials = history.trials();
        let mut per_axis: BTreeMap<Axis, AxisStatistics> = BTreeMap::new();
        for step in trials {
            let Some(axis) = step.axis else { continue };
            let entry = per_axis.entry(axis).or_default();
            entry.measurements += 1;
            entry.average_step_size += step.step_size;
            entry.average_improvement += step.relative_improvement;
        }
        for entry in per_axis.values_mut() {
            let n = entry.measurements as f64;
            entry.average_step_size /= n;
            entry.average_improvement /= n;
            entry.share_percent = 100.0 * n / trials.len() as f64;
        }

        let values = history.iter().map(|s| s.value);
        let min_value = values.clone().fold(f64::INFINITY, f64::min);
        let max_value = values.clone().fold(f64::NEG_INFINITY, f64::max);
        let average_value = values.sum::<f64>() / history.len() as f64;

        Self {
            total_measurements: trials.len(),
            per_axis,
            baseline_value: baseline.value,
            best_value: best.value,
            min_value,
            max_value,
            average_value,
            total_improvement: (best.value - baseline.value) / baseline.value,
        }
    }
}
