//! The `questgen gaps` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use questgen_core::gaps::GapReport;
use questgen_providers::load_config_from;

use super::{difficulty_label, load_blueprints, open_storage, section_gaps};

pub async fn execute(blueprint_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let storage = open_storage(&config.storage).await?;

    for blueprint in load_blueprints(&blueprint_path)? {
        let gaps = section_gaps(storage.as_ref(), &blueprint).await?;
        println!("{} / {}", gaps.test_type, gaps.section);
        println!("{}", gap_table(&gaps));
        println!(
            "Total: {} stored of {} targeted, {} missing\n",
            gaps.total_existing(),
            gaps.total_target(),
            gaps.total_deficit()
        );
    }

    Ok(())
}

pub fn gap_table(gaps: &GapReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Mode",
        "Sub-skill",
        "Difficulty",
        "Target",
        "Stored",
        "Missing",
    ]);
    for cell in &gaps.cells {
        table.add_row(vec![
            Cell::new(&cell.key.mode),
            Cell::new(&cell.key.sub_skill),
            Cell::new(difficulty_label(cell.key.difficulty)),
            Cell::new(cell.target),
            Cell::new(cell.existing),
            Cell::new(cell.deficit),
        ]);
    }
    table
}
