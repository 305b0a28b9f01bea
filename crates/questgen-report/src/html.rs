//! HTML report generator.
//!
//! Produces a self-contained HTML file with all CSS/JS inlined.

use anyhow::{Context, Result};
use std::path::Path;

use questgen_core::gaps::GapReport;
use questgen_core::report::{PassageStatus, RunReport};
use questgen_core::task::TaskStatus;

/// Escape a string for safe HTML insertion.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Generate an HTML report from a run report.
pub fn generate_html(report: &RunReport) -> String {
    let summary = report.summary();
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str(&format!(
        "<title>questgen report: {} / {}</title>\n",
        html_escape(&report.test_type),
        html_escape(&report.section)
    ));
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n");

    html.push_str("<header>\n");
    html.push_str("<h1>questgen report</h1>\n");
    html.push_str(&format!(
        "<p class=\"meta\"><strong>{}</strong> / <strong>{}</strong> | strategy {} | {} tasks | {} | {:.1}s</p>\n",
        html_escape(&report.test_type),
        html_escape(&report.section),
        html_escape(&report.strategy),
        report.planned_tasks,
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.duration_ms as f64 / 1000.0,
    ));
    html.push_str("</header>\n");

    // Summary dashboard
    html.push_str("<section class=\"dashboard\">\n");
    html.push_str("<h2>Summary</h2>\n");
    html.push_str("<table class=\"summary\">\n");
    html.push_str("<thead><tr><th>Planned</th><th>Accepted</th><th>Abandoned</th><th>Rejections</th><th>Passages</th><th>Attempts</th><th>Deficit before</th><th>Deficit after</th></tr></thead>\n");
    html.push_str(&format!(
        "<tbody><tr><td>{}</td><td class=\"pass\">{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}/{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr></tbody>\n",
        summary.planned,
        summary.accepted,
        if summary.abandoned > 0 { "fail" } else { "pass" },
        summary.abandoned,
        summary.rejections,
        summary.passages_stored,
        report.planned_passages,
        report.attempts_used,
        summary.deficit_before,
        if summary.deficit_after > 0 { "fail" } else { "pass" },
        summary.deficit_after,
    ));
    html.push_str("</table>\n");

    let by_stage = report.rejected_by_stage();
    if !by_stage.is_empty() {
        html.push_str("<h3>Rejections by stage</h3>\n");
        html.push_str(&generate_bar_chart(
            &by_stage
                .iter()
                .map(|(stage, count)| (stage.as_str(), *count))
                .collect::<Vec<_>>(),
        ));
    }
    html.push_str("</section>\n");

    html.push_str("<section class=\"gaps\">\n");
    html.push_str("<h2>Coverage</h2>\n");
    html.push_str(&gap_table(&report.gaps_before, &report.remaining_gaps));
    html.push_str("</section>\n");

    // Per-task results
    html.push_str("<section class=\"results\">\n");
    html.push_str("<h2>Tasks</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"results\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable(0)\">Task</th><th onclick=\"sortTable(1)\">Cell</th><th onclick=\"sortTable(2)\">Status</th><th onclick=\"sortTable(3)\">Attempts</th><th onclick=\"sortTable(4)\">Detail</th></tr></thead>\n");
    html.push_str("<tbody>\n");

    for outcome in &report.outcomes {
        let (class, status, detail) = match &outcome.status {
            TaskStatus::Accepted { question_id } => ("pass", "accepted", question_id.clone()),
            TaskStatus::Abandoned { reason } => ("fail", "abandoned", reason.clone()),
        };
        let mut detail = html_escape(&detail);
        for rejection in &outcome.rejections {
            detail.push_str(&format!(
                "<br><span class=\"rejection\">{}</span>",
                html_escape(&rejection.to_string())
            ));
        }
        for flag in &outcome.flags {
            detail.push_str(&format!(
                "<br><span class=\"flag\">flag: {}</span>",
                html_escape(flag)
            ));
        }
        html.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            class,
            outcome.task_id,
            html_escape(&outcome.cell.to_string()),
            status,
            outcome.attempts,
            detail
        ));
    }

    html.push_str("</tbody></table>\n");
    html.push_str("</section>\n");

    if !report.passages.is_empty() {
        html.push_str("<section class=\"passages\">\n");
        html.push_str("<h2>Passages</h2>\n");
        html.push_str("<table>\n");
        html.push_str("<thead><tr><th>Mode</th><th>Type</th><th>Slot</th><th>Difficulty</th><th>Attempts</th><th>Status</th></tr></thead>\n<tbody>\n");
        for passage in &report.passages {
            let (class, status) = match &passage.status {
                PassageStatus::Stored {
                    passage_id,
                    word_count,
                } => ("pass", format!("stored {passage_id} ({word_count} words)")),
                PassageStatus::Abandoned { reason } => ("fail", format!("abandoned: {reason}")),
            };
            html.push_str(&format!(
                "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                class,
                html_escape(&passage.mode),
                html_escape(&passage.passage_type),
                passage.slot,
                passage.difficulty,
                passage.attempts,
                html_escape(&status)
            ));
        }
        html.push_str("</tbody></table>\n</section>\n");
    }

    // Raw JSON
    html.push_str("<section class=\"raw-data\">\n");
    html.push_str("<details>\n<summary>Raw JSON Data</summary>\n");
    html.push_str("<pre><code>");
    html.push_str(
        &serde_json::to_string_pretty(report)
            .unwrap_or_default()
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    );
    html.push_str("</code></pre>\n");
    html.push_str("</details>\n</section>\n");

    html.push_str("<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n");

    html.push_str("</body>\n</html>");
    html
}

/// Write an HTML report to a file.
pub fn write_html_report(report: &RunReport, path: &Path) -> Result<()> {
    let html = generate_html(report);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)
        .with_context(|| format!("failed to write HTML report to {}", path.display()))?;
    Ok(())
}

fn gap_table(before: &GapReport, after: &GapReport) -> String {
    let mut table = String::from(
        "<table>\n<thead><tr><th>Cell</th><th>Target</th><th>Before</th><th>After</th><th>Remaining</th></tr></thead>\n<tbody>\n",
    );
    for cell in &before.cells {
        let now = after.cell(&cell.key);
        let existing = now.map_or(cell.existing, |c| c.existing);
        let deficit = now.map_or(cell.deficit, |c| c.deficit);
        table.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            if deficit == 0 { "pass" } else { "fail" },
            html_escape(&cell.key.to_string()),
            cell.target,
            cell.existing,
            existing,
            deficit
        ));
    }
    table.push_str("</tbody></table>\n");
    table
}

fn generate_bar_chart(rows: &[(&str, usize)]) -> String {
    let bar_height = 30;
    let max_width = 400;
    let padding = 10;
    let label_width = 200;
    let max = rows.iter().map(|(_, n)| *n).max().unwrap_or(1).max(1);

    let total_height = rows.len() * (bar_height + padding) + padding;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n",
        label_width + max_width + 60,
        total_height
    );

    for (i, (label, count)) in rows.iter().enumerate() {
        let y = i * (bar_height + padding) + padding;
        let width = count * max_width / max;

        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"14\" fill=\"currentColor\" text-anchor=\"end\" dominant-baseline=\"middle\">{}</text>\n",
            label_width - 10,
            y + bar_height / 2,
            html_escape(label)
        ));
        svg.push_str(&format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"#ef4444\" rx=\"4\"/>\n",
            label_width, y, width, bar_height
        ));
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" dominant-baseline=\"middle\">{}</text>\n",
            label_width + width + 8,
            y + bar_height / 2,
            count
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --bg: #fff; --fg: #1a1a1a; --border: #e5e7eb; --pass: #dcfce7; --fail: #fde2e2; }
@media (prefers-color-scheme: dark) {
  :root { --bg: #111827; --fg: #f9fafb; --border: #374151; --pass: #064e3b; --fail: #7f1d1d; }
}
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 0; padding: 2rem; background: var(--bg); color: var(--fg); }
h1, h2 { margin-top: 2rem; }
.meta { color: #6b7280; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid var(--border); padding: 0.5rem 1rem; text-align: left; vertical-align: top; }
th { background: var(--border); cursor: pointer; }
.pass { background: var(--pass); }
.fail { background: var(--fail); }
.rejection, .flag { font-size: 0.85rem; color: #6b7280; }
pre { overflow-x: auto; padding: 1rem; background: var(--border); border-radius: 8px; }
code { font-family: 'JetBrains Mono', 'Fira Code', monospace; font-size: 0.85rem; }
details { margin: 1rem 0; }
summary { cursor: pointer; font-weight: bold; }
svg { margin: 1rem 0; }
"#;

const JS: &str = r#"
function sortTable(col) {
  const table = document.getElementById('results');
  const tbody = table.querySelector('tbody');
  const rows = Array.from(tbody.querySelectorAll('tr'));
  const asc = table.dataset.sortCol == col && table.dataset.sortDir == 'asc' ? false : true;
  rows.sort((a, b) => {
    const va = a.cells[col].textContent;
    const vb = b.cells[col].textContent;
    const na = Number(va), nb = Number(vb);
    const cmp = !isNaN(na) && !isNaN(nb) ? na - nb : va.localeCompare(vb);
    return asc ? cmp : -cmp;
  });
  table.dataset.sortCol = col;
  table.dataset.sortDir = asc ? 'asc' : 'desc';
  rows.forEach(r => tbody.appendChild(r));
}
"#;
