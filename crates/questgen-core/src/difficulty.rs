//! Difficulty distribution.
//!
//! Splits a question count across difficulty levels and produces a seeded,
//! reproducible per-question difficulty sequence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::model::{Difficulty, DifficultyStrategy};
use crate::shuffle::{seeded_shuffle, DIFFICULTY_SEED};

/// Number of questions assigned to one difficulty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyBucket {
    pub difficulty: Difficulty,
    pub count: u32,
    /// Share of the total, in percent.
    pub pct: f64,
}

/// Immutable difficulty plan, consumed by sequence index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionPlan {
    pub total: u32,
    pub strategy: DifficultyStrategy,
    pub buckets: Vec<DifficultyBucket>,
    pub sequence: Vec<Difficulty>,
}

impl DistributionPlan {
    /// Difficulty for question `index`.
    pub fn difficulty_at(&self, index: usize) -> Option<Difficulty> {
        self.sequence.get(index).copied()
    }

    pub fn bucket_counts(&self) -> Vec<u32> {
        self.buckets.iter().map(|b| b.count).collect()
    }
}

/// Build a difficulty plan for `total` questions.
pub fn create_difficulty_plan(
    total: u32,
    strategy: &DifficultyStrategy,
) -> Result<DistributionPlan, GenerationError> {
    if total == 0 {
        return Err(GenerationError::invalid(
            "question total must be greater than zero",
        ));
    }

    let counts = match strategy {
        DifficultyStrategy::Single { level } => vec![(*level, total)],
        DifficultyStrategy::Balanced { levels } => balanced_counts(total, levels)?,
        DifficultyStrategy::Weighted { weights } => weighted_counts(total, weights)?,
        DifficultyStrategy::Progressive { start, end } => {
            if start > end {
                return Err(GenerationError::invalid(format!(
                    "progressive range is inverted: {start} > {end}"
                )));
            }
            let weights: BTreeMap<Difficulty, f64> = (*start..=*end)
                .enumerate()
                .map(|(i, d)| (d, (i + 1) as f64))
                .collect();
            weighted_counts(total, &weights)?
        }
    };

    let buckets: Vec<DifficultyBucket> = counts
        .iter()
        .map(|&(difficulty, count)| DifficultyBucket {
            difficulty,
            count,
            pct: count as f64 / total as f64 * 100.0,
        })
        .collect();

    let mut sequence: Vec<Difficulty> = buckets
        .iter()
        .flat_map(|b| std::iter::repeat(b.difficulty).take(b.count as usize))
        .collect();
    seeded_shuffle(&mut sequence, DIFFICULTY_SEED);

    tracing::debug!(
        total,
        strategy = strategy.kind(),
        buckets = ?counts,
        "difficulty plan created"
    );

    Ok(DistributionPlan {
        total,
        strategy: strategy.clone(),
        buckets,
        sequence,
    })
}

/// `floor(total / n)` each, remainder to the first `total % n` levels in input order.
pub(crate) fn balanced_counts(
    total: u32,
    levels: &[Difficulty],
) -> Result<Vec<(Difficulty, u32)>, GenerationError> {
    if levels.is_empty() {
        return Err(GenerationError::invalid("difficulty set is empty"));
    }
    let n = levels.len() as u32;
    let base = total / n;
    let remainder = total % n;
    Ok(levels
        .iter()
        .enumerate()
        .map(|(i, &d)| (d, base + u32::from((i as u32) < remainder)))
        .collect())
}

/// Proportional rounding in ascending difficulty order; the last level takes
/// whatever is left so the counts always sum to `total`.
fn weighted_counts(
    total: u32,
    weights: &BTreeMap<Difficulty, f64>,
) -> Result<Vec<(Difficulty, u32)>, GenerationError> {
    if weights.is_empty() {
        return Err(GenerationError::invalid("difficulty set is empty"));
    }
    if let Some((d, w)) = weights.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(GenerationError::invalid(format!(
            "weight for difficulty {d} must be a non-negative number, got {w}"
        )));
    }
    let total_weight: f64 = weights.values().sum();
    if total_weight <= 0.0 {
        return Err(GenerationError::invalid("weights sum to zero"));
    }

    let mut counts = Vec::with_capacity(weights.len());
    let mut allocated = 0u32;
    let last = weights.len() - 1;
    for (i, (&difficulty, &weight)) in weights.iter().enumerate() {
        let count = if i == last {
            total - allocated
        } else {
            let share = (weight / total_weight * total as f64).round() as u32;
            share.min(total - allocated)
        };
        allocated += count;
        counts.push((difficulty, count));
    }
    Ok(counts)
}
