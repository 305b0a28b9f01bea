//! Gap detection: blueprint targets versus stored content.
//!
//! Generation is additive-only. A cell holding more than its target is
//! reported as surplus and otherwise ignored.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::difficulty::create_difficulty_plan;
use crate::error::GenerationError;
use crate::model::{CellKey, GenerationStrategy, SectionBlueprint};
use crate::plan::{passage_slots, writing_prompt_types};

/// Target, stored and missing counts for one content cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapCell {
    #[serde(flatten)]
    pub key: CellKey,
    pub target: u32,
    pub existing: u32,
    pub deficit: u32,
}

impl GapCell {
    pub fn new(key: CellKey, target: u32, existing: u32) -> Self {
        Self {
            key,
            target,
            existing,
            deficit: target.saturating_sub(existing),
        }
    }

    pub fn surplus(&self) -> u32 {
        self.existing.saturating_sub(self.target)
    }
}

/// Gap cells for one test section, in stable cell order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub test_type: String,
    pub section: String,
    pub cells: Vec<GapCell>,
}

impl GapReport {
    pub fn total_target(&self) -> u32 {
        self.cells.iter().map(|c| c.target).sum()
    }

    pub fn total_existing(&self) -> u32 {
        self.cells.iter().map(|c| c.existing).sum()
    }

    pub fn total_deficit(&self) -> u32 {
        self.cells.iter().map(|c| c.deficit).sum()
    }

    /// Cells that still need content.
    pub fn open_cells(&self) -> impl Iterator<Item = &GapCell> {
        self.cells.iter().filter(|c| c.deficit > 0)
    }

    pub fn deficits(&self) -> HashMap<CellKey, u32> {
        self.cells
            .iter()
            .map(|c| (c.key.clone(), c.deficit))
            .collect()
    }

    pub fn cell(&self, key: &CellKey) -> Option<&GapCell> {
        self.cells.iter().find(|c| &c.key == key)
    }
}

/// Target question count per cell implied by the blueprint.
pub fn section_targets(
    blueprint: &SectionBlueprint,
) -> Result<BTreeMap<CellKey, u32>, GenerationError> {
    let mut targets: BTreeMap<CellKey, u32> = BTreeMap::new();

    for mode in &blueprint.modes {
        for target in blueprint.strategy.standalone() {
            if target.count == 0 {
                continue;
            }
            let plan = create_difficulty_plan(target.count, &blueprint.difficulty)?;
            for bucket in plan.buckets.iter().filter(|b| b.count > 0) {
                *targets
                    .entry(CellKey::new(mode, &target.name, Some(bucket.difficulty)))
                    .or_default() += bucket.count;
            }
        }

        for spec in blueprint.strategy.passages() {
            for slot in passage_slots(spec, &blueprint.difficulty)? {
                for sub_skill in &slot.sub_skills {
                    *targets
                        .entry(CellKey::new(mode, sub_skill, Some(slot.difficulty)))
                        .or_default() += 1;
                }
            }
        }

        if let GenerationStrategy::WritingPrompt { writing } = &blueprint.strategy {
            for prompt_type in writing_prompt_types(writing)? {
                *targets
                    .entry(CellKey::new(mode, &prompt_type, None))
                    .or_default() += 1;
            }
        }
    }

    Ok(targets)
}

/// Compare blueprint targets with stored counts.
///
/// Stored cells in one of the blueprint's modes that the blueprint no longer
/// targets are included with a zero target so surplus shows up in reports.
pub fn detect_section_gaps(
    blueprint: &SectionBlueprint,
    existing: &HashMap<CellKey, u32>,
) -> Result<Vec<GapCell>, GenerationError> {
    let mut targets = section_targets(blueprint)?;

    for key in existing.keys() {
        if blueprint.modes.contains(&key.mode) {
            targets.entry(key.clone()).or_insert(0);
        }
    }

    Ok(targets
        .into_iter()
        .map(|(key, target)| {
            let stored = existing.get(&key).copied().unwrap_or(0);
            GapCell::new(key, target, stored)
        })
        .collect())
}
