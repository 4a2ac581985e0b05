#![warn(missing_docs)]
//! FluxPipe Report - Throughput Metrics and Output
//!
//! Turns measured intervals into throughput and latency, and serializes the
//! results of a suite run:
//! - Human (one line per scenario, rendered by the CLI)
//! - JSON (machine-readable, with run metadata)

mod json;
mod report;

pub use json::generate_json_report;
pub use report::{
    REPORT_SCHEMA_VERSION, Report, ReportMeta, ReportSummary, ScenarioReport, Throughput,
    compute_throughput,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One line per scenario
    #[default]
    Human,
    /// Pretty-printed JSON report
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "text" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
