//! The `questgen generate` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use comfy_table::{Cell, Table};

use questgen_core::candidate::Rejection;
use questgen_core::engine::{ProgressReporter, SectionGenerator};
use questgen_core::plan::{GenerationPlan, QuestionTask};
use questgen_core::report::{PassageOutcome, PassageStatus, RunReport, RunSummary};
use questgen_providers::{create_provider, load_config_from};
use questgen_report::write_html_report;

use super::{load_blueprints, open_storage};

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_plan(&self, plan: &GenerationPlan) {
        eprintln!(
            "Planned {} question(s) and {} passage(s) for {} / {}",
            plan.task_count(),
            plan.passage_count(),
            plan.test_type,
            plan.section
        );
    }

    fn on_attempt(&self, task: &QuestionTask, attempt: u32) {
        eprintln!(
            "  Starting: #{} {} (attempt {})",
            task.id,
            task.cell(),
            attempt + 1
        );
    }

    fn on_accepted(&self, task: &QuestionTask, question_id: &str) {
        eprintln!("  Accepted: #{} {} -> {question_id}", task.id, task.cell());
    }

    fn on_rejected(&self, task: &QuestionTask, rejection: &Rejection) {
        eprintln!("  Rejected: #{} {}: {rejection}", task.id, task.cell());
    }

    fn on_abandoned(&self, task: &QuestionTask, reason: &str) {
        eprintln!("  ABANDONED: #{} {}: {reason}", task.id, task.cell());
    }

    fn on_passage(&self, outcome: &PassageOutcome) {
        match &outcome.status {
            PassageStatus::Stored {
                passage_id,
                word_count,
            } => eprintln!(
                "  Passage: {} #{} stored as {passage_id} ({word_count} words)",
                outcome.passage_type,
                outcome.slot + 1
            ),
            PassageStatus::Abandoned { reason } => eprintln!(
                "  Passage ABANDONED: {} #{}: {reason}",
                outcome.passage_type,
                outcome.slot + 1
            ),
        }
    }

    fn on_run_complete(&self, summary: &RunSummary, elapsed: Duration) {
        eprintln!(
            "\nComplete: {}/{} accepted, {} abandoned, {} rejection(s) ({:.1}s)",
            summary.accepted,
            summary.planned,
            summary.abandoned,
            summary.rejections,
            elapsed.as_secs_f64()
        );
    }
}

pub struct GenerateArgs {
    pub blueprint: PathBuf,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub parallelism: Option<usize>,
    pub max_attempts: Option<u32>,
    pub budget: Option<u32>,
    pub output: Option<PathBuf>,
    pub format: String,
    pub fail_on_gaps: bool,
    pub config: Option<PathBuf>,
}

pub async fn execute(args: GenerateArgs) -> Result<()> {
    if let Some(parallelism) = args.parallelism {
        anyhow::ensure!(parallelism >= 1, "parallelism must be at least 1");
    }
    if let Some(attempts) = args.max_attempts {
        anyhow::ensure!(attempts >= 1, "max-attempts must be at least 1");
    }
    let formats = parse_formats(&args.format)?;

    let mut config = load_config_from(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.generation_model = model;
    }
    if let Some(parallelism) = args.parallelism {
        config.parallelism = parallelism;
    }
    if let Some(attempts) = args.max_attempts {
        config.max_attempts_per_task = attempts;
    }
    if args.budget.is_some() {
        config.max_total_attempts = args.budget;
    }
    let output = args.output.unwrap_or_else(|| config.output_dir.clone());

    let blueprints = load_blueprints(&args.blueprint)?;
    let (provider_name, provider_config) = config.provider(args.provider.as_deref())?;
    let completion = create_provider(provider_config)?;
    let storage = open_storage(&config.storage).await?;
    tracing::info!(
        provider = provider_name,
        model = %config.generation_model,
        blueprints = blueprints.len(),
        "starting generation"
    );

    let reporter = ConsoleReporter;
    let mut unmet = 0u32;

    for mut blueprint in blueprints {
        if let Some(options) = config.validation.expected_options {
            blueprint.answer_options = options;
        }
        let engine = SectionGenerator::new(
            Arc::clone(&completion),
            Arc::clone(&storage),
            config.to_engine_config(blueprint.answer_options),
        );
        eprintln!(
            "questgen v{}: {} / {} with {}/{}",
            env!("CARGO_PKG_VERSION"),
            blueprint.test_type,
            blueprint.section,
            provider_name,
            config.generation_model
        );

        let report = engine.run(&blueprint, &reporter).await?;
        print_summary(&report);
        unmet += report.remaining_gaps.total_deficit();

        std::fs::create_dir_all(&output)?;
        let stem = format!(
            "report-{}-{}",
            slug(&report.section),
            report.created_at.format("%Y-%m-%dT%H%M%S")
        );
        for fmt in &formats {
            match *fmt {
                ReportFormat::Json => {
                    let path = output.join(format!("{stem}.json"));
                    report.save_json(&path)?;
                    eprintln!("Results saved to: {}", path.display());
                }
                ReportFormat::Html => {
                    let path = output.join(format!("{stem}.html"));
                    write_html_report(&report, &path)?;
                    eprintln!("HTML report: {}", path.display());
                }
            }
        }
    }

    if args.fail_on_gaps && unmet > 0 {
        anyhow::bail!("{unmet} targeted question(s) are still missing");
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Json,
    Html,
}

fn parse_formats(format: &str) -> Result<Vec<ReportFormat>> {
    if format == "all" {
        return Ok(vec![ReportFormat::Json, ReportFormat::Html]);
    }
    format
        .split(',')
        .map(|f| match f.trim() {
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            other => Err(anyhow::anyhow!(
                "unknown report format '{other}' (expected json, html or all)"
            )),
        })
        .collect()
}

fn slug(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn print_summary(report: &RunReport) {
    let summary = report.summary();

    let mut table = Table::new();
    table.set_header(vec![
        "Section",
        "Planned",
        "Accepted",
        "Abandoned",
        "Rejections",
        "Passages",
        "Missing before",
        "Missing after",
    ]);
    table.add_row(vec![
        Cell::new(&report.section),
        Cell::new(summary.planned),
        Cell::new(summary.accepted),
        Cell::new(summary.abandoned),
        Cell::new(summary.rejections),
        Cell::new(format!("{}/{}", summary.passages_stored, report.planned_passages)),
        Cell::new(summary.deficit_before),
        Cell::new(summary.deficit_after),
    ]);
    eprintln!("\n{table}");

    let by_stage = report.rejected_by_stage();
    if !by_stage.is_empty() {
        let parts: Vec<String> = by_stage
            .iter()
            .map(|(stage, count)| format!("{stage} {count}"))
            .collect();
        eprintln!("Rejections by stage: {}", parts.join(", "));
    }
    for outcome in report.abandoned() {
        eprintln!(
            "  unmet: #{} {}: {}",
            outcome.task_id,
            outcome.cell,
            outcome.abandon_reason().unwrap_or("unknown")
        );
    }
}
