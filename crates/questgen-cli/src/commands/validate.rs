//! The `questgen validate` command.

use std::path::PathBuf;

use anyhow::Result;

use questgen_core::parser::validate_blueprint;

use super::load_blueprints;

pub fn execute(blueprint_path: PathBuf) -> Result<()> {
    let blueprints = load_blueprints(&blueprint_path)?;

    let mut total_warnings = 0;

    for blueprint in &blueprints {
        println!(
            "Blueprint: {} / {} ({} strategy, {} mode(s))",
            blueprint.test_type,
            blueprint.section,
            blueprint.strategy.name(),
            blueprint.modes.len()
        );

        let warnings = validate_blueprint(blueprint);
        for w in &warnings {
            let prefix = w
                .subject
                .as_ref()
                .map(|s| format!("  [{s}]"))
                .unwrap_or_else(|| "  ".to_string());
            println!("{prefix} WARNING: {}", w.message);
        }
        total_warnings += warnings.len();
    }

    if total_warnings == 0 {
        println!("All blueprints valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
