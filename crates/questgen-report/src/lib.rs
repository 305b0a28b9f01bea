//! questgen-report: human-readable run reports.

pub mod html;

pub use html::{generate_html, write_html_report};
