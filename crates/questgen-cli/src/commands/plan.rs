//! The `questgen plan` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use questgen_core::plan::{build_plan, GenerationPlan, QuestionTask, WorkUnit};
use questgen_providers::load_config_from;

use super::{difficulty_label, load_blueprints, open_storage, section_gaps};

pub async fn execute(blueprint_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let storage = open_storage(&config.storage).await?;

    for blueprint in load_blueprints(&blueprint_path)? {
        let gaps = section_gaps(storage.as_ref(), &blueprint).await?;
        let plan = build_plan(&blueprint, &gaps)?;

        println!(
            "{} / {} ({} strategy)",
            plan.test_type, plan.section, plan.strategy
        );
        if plan.is_empty() {
            println!("Nothing to generate: every target is met.\n");
            continue;
        }
        println!("{}", plan_table(&plan));
        println!(
            "{} question(s), {} passage(s)\n",
            plan.task_count(),
            plan.passage_count()
        );
    }

    Ok(())
}

fn plan_table(plan: &GenerationPlan) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Task", "Unit", "Mode", "Sub-skill", "Difficulty", "Example",
    ]);
    for unit in &plan.units {
        match unit {
            WorkUnit::Question(task) => {
                table.add_row(task_row(task, "question".to_string()));
            }
            WorkUnit::Passage(passage) => {
                let unit = format!(
                    "{} passage #{} ({}-{} words)",
                    passage.passage_type,
                    passage.slot + 1,
                    passage.word_count.min,
                    passage.word_count.max
                );
                for task in &passage.questions {
                    table.add_row(task_row(task, unit.clone()));
                }
            }
        }
    }
    table
}

fn task_row(task: &QuestionTask, unit: String) -> Vec<Cell> {
    vec![
        Cell::new(task.id),
        Cell::new(unit),
        Cell::new(&task.mode),
        Cell::new(&task.sub_skill),
        Cell::new(difficulty_label(task.difficulty)),
        Cell::new(
            task.example_index
                .map_or_else(|| "-".to_string(), |i| format!("{} of {}", i + 1, task.example_count)),
        ),
    ]
}
