//! Exportable scan report.
//!
//! [`ScanReport`] is the JSON document written after a scan: baseline, peak,
//! every trial, aggregate statistics, the strategies that ran and the
//! per-phase gains.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use optalign_types::{AlignError, Axis, ScanStep};
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ScanConfig, ScanMode};
use crate::direction::AxisMemory;
use crate::history::ScanStatistics;
use crate::orchestrator::{PhaseResult, ScanResult};

/// The best reading, with a human-readable note on how it was reached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeakRecord {
    #[serde(flatten)]
    pub step: ScanStep,
    pub context: String,
}

/// One trial in the export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRecord {
    #[serde(flatten)]
    pub step: ScanStep,
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlgorithmStats {
    pub smart_direction_selection: bool,
    pub adaptive_step_size: bool,
    pub step_policy: String,
    pub direction_selector: String,
    pub direction_memory: BTreeMap<Axis, AxisMemory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub device_id: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub baseline: ScanStep,
    pub peak: PeakRecord,
    /// Every trial after the baseline, in measurement order.
    pub measurements: Vec<MeasurementRecord>,
    pub statistics: ScanStatistics,
    pub algorithm_stats: AlgorithmStats,
    /// Empty for adaptive scans.
    pub phases: Vec<PhaseResult>,
}

impl ScanReport {
    pub fn from_result(result: &ScanResult, config: &ScanConfig, device_id: impl Into<String>) -> Self {
        let baseline = result
            .history
            .baseline()
            .cloned()
            .unwrap_or_else(|| result.best.clone());
        let measurements = result
            .history
            .trials()
            .iter()
            .map(|step| MeasurementRecord {
                is_valid: step.is_valid(),
                step: step.clone(),
            })
            .collect();

        Self {
            scan_id: Uuid::new_v4(),
            device_id: device_id.into(),
            algorithm: algorithm_name(result.mode).to_string(),
            created_at: Utc::now(),
            baseline,
            peak: PeakRecord {
                context: peak_context(&result.best),
                step: result.best.clone(),
            },
            measurements,
            statistics: result.statistics.clone(),
            algorithm_stats: AlgorithmStats {
                smart_direction_selection: config.direction_memory,
                adaptive_step_size: config.adaptive_step_size,
                step_policy: result.step_policy.clone(),
                direction_selector: result.direction_selector.clone(),
                direction_memory: result.memory.snapshot(),
            },
            phases: result.phases.clone(),
        }
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// [`AlignError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, AlignError> {
        serde_json::to_string_pretty(self).map_err(|e| AlignError::Serialization(e.to_string()))
    }

    /// # Errors
    ///
    /// [`AlignError::Serialization`] if `json` is not a report.
    pub fn from_json(json: &str) -> Result<Self, AlignError> {
        serde_json::from_str(json).map_err(|e| AlignError::Serialization(e.to_string()))
    }

    /// JSON schema of the export document.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(ScanReport)
    }

    /// Plain-text summary, one line per entry.
    pub fn summary_lines(&self) -> Vec<String> {
        let stats = &self.statistics;
        let mut lines = vec![
            format!("scan {} on {} ({})", self.scan_id, self.device_id, self.algorithm),
            format!(
                "baseline  {:.4e} at {}",
                self.baseline.value, self.baseline.position
            ),
            format!(
                "peak      {:.4e} at {} [{}]",
                self.peak.step.value, self.peak.step.position, self.peak.context
            ),
            format!("gain      {:+.2}%", stats.total_improvement * 100.0),
            format!(
                "signal    min {:.4e}  max {:.4e}  avg {:.4e}",
                stats.min_value, stats.max_value, stats.average_value
            ),
            format!("trials    {}", stats.total_measurements),
        ];

        for (axis, a) in &stats.per_axis {
            lines.push(format!(
                "  {axis}: {} trials ({:.1}%), avg step {:.4} mm, avg gain {:+.3}%",
                a.measurements,
                a.share_percent,
                a.average_step_size,
                a.average_improvement * 100.0
            ));
        }

        for phase in &self.phases {
            if phase.skipped {
                lines.push(format!("  {}: skipped", phase.phase));
            } else {
                lines.push(format!(
                    "  {}: {:.4e} -> {:.4e} ({:+.2}%)",
                    phase.phase,
                    phase.value_before,
                    phase.value_after,
                    phase.improvement * 100.0
                ));
            }
        }

        for (axis, memory) in &self.algorithm_stats.direction_memory {
            lines.push(format!(
                "  memory {axis}: {} (declines {})",
                memory.last_good_direction, memory.consecutive_declines
            ));
        }
        lines
    }
}

fn algorithm_name(mode: ScanMode) -> &'static str {
    match mode {
        ScanMode::Adaptive => "adaptive_hill_climb",
        ScanMode::Phased => "phased_hill_climb",
    }
}

fn peak_context(step: &ScanStep) -> String {
    match (step.axis, step.direction) {
        (Some(axis), Some(direction)) => format!(
            "axis {axis}, direction {direction}, step {:.4} mm",
            step.step_size
        ),
        _ => "baseline".to_string(),
    }
}
