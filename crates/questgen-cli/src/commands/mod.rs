//! Subcommand implementations and the helpers they share.

pub mod gaps;
pub mod generate;
pub mod init;
pub mod list_models;
pub mod plan;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use questgen_core::gaps::{detect_section_gaps, GapReport};
use questgen_core::model::{Difficulty, SectionBlueprint};
use questgen_core::parser;
use questgen_core::traits::StorageAdapter;
use questgen_providers::StorageConfig;
use questgen_storage::{JsonlStore, MemoryStore};

/// Load one blueprint file, or every blueprint under a directory.
pub fn load_blueprints(path: &Path) -> Result<Vec<SectionBlueprint>> {
    let blueprints = if path.is_dir() {
        parser::load_blueprint_directory(path)?
    } else {
        vec![parser::parse_blueprint(path)?]
    };
    anyhow::ensure!(
        !blueprints.is_empty(),
        "no blueprints found in {}",
        path.display()
    );
    Ok(blueprints)
}

pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    Ok(match config {
        StorageConfig::Memory => Arc::new(MemoryStore::new()),
        StorageConfig::Jsonl { dir } => Arc::new(JsonlStore::open(dir).await?),
    })
}

/// Gap report for a blueprint against what the store holds.
pub async fn section_gaps(
    storage: &dyn StorageAdapter,
    blueprint: &SectionBlueprint,
) -> Result<GapReport> {
    let existing = storage
        .existing_counts(&blueprint.test_type, &blueprint.section)
        .await
        .context("failed to read stored counts")?;
    Ok(GapReport {
        test_type: blueprint.test_type.clone(),
        section: blueprint.section.clone(),
        cells: detect_section_gaps(blueprint, &existing)?,
    })
}

fn difficulty_label(difficulty: Option<Difficulty>) -> String {
    difficulty.map_or_else(|| "-".to_string(), |d| d.to_string())
}
