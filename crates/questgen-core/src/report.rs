//! Run report types with JSON persistence.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gaps::GapReport;
use crate::model::Difficulty;
use crate::task::TaskOutcome;

/// Terminal status of a passage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PassageStatus {
    Stored { passage_id: String, word_count: u32 },
    Abandoned { reason: String },
}

/// Record of one passage unit after execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageOutcome {
    pub mode: String,
    pub passage_type: String,
    pub slot: usize,
    pub difficulty: Difficulty,
    pub attempts: u32,
    #[serde(flatten)]
    pub status: PassageStatus,
}

/// A complete generation run for one section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub test_type: String,
    pub section: String,
    pub strategy: String,
    /// Gaps when the run started.
    pub gaps_before: GapReport,
    pub planned_tasks: usize,
    pub planned_passages: usize,
    /// One entry per question task, in plan order.
    pub outcomes: Vec<TaskOutcome>,
    pub passages: Vec<PassageOutcome>,
    /// Gaps re-detected from storage after the run.
    pub remaining_gaps: GapReport,
    /// Attempts drawn from the run budget, passages included.
    pub attempts_used: u32,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Headline numbers of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub planned: usize,
    pub accepted: usize,
    pub abandoned: usize,
    pub rejections: usize,
    pub passages_stored: usize,
    pub deficit_before: u32,
    pub deficit_after: u32,
}

impl RunReport {
    pub fn accepted(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| o.is_accepted())
    }

    pub fn abandoned(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.is_accepted())
    }

    /// Rejection counts keyed by stage name (`discarded` for non-stage drops).
    pub fn rejected_by_stage(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for rejection in self.outcomes.iter().flat_map(|o| &o.rejections) {
            let key = rejection
                .stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "discarded".to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            planned: self.planned_tasks,
            accepted: self.accepted().count(),
            abandoned: self.abandoned().count(),
            rejections: self.outcomes.iter().map(|o| o.rejections.len()).sum(),
            passages_stored: self
                .passages
                .iter()
                .filter(|p| matches!(p.status, PassageStatus::Stored { .. }))
                .count(),
            deficit_before: self.gaps_before.total_deficit(),
            deficit_after: self.remaining_gaps.total_deficit(),
        }
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: RunReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}
