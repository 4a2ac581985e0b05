//! Scenario Executor
//!
//! Runs planned scenarios and renders their results.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Scenario (from the planner)
//!       │
//!       ▼
//! ┌─────────────┐
//! │  execution  │  First encode, measured rounds, throughput
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │  metadata   │  Run metadata for the report
//! └──────┬──────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │ formatting  │  Human-readable output
//! └─────────────┘
//! ```

mod execution;
mod formatting;
mod metadata;

pub use execution::{ScenarioExecutor, build_failed_scenario_report, build_scenario_report};
pub use formatting::{
    format_human_output, format_plan, format_scenario_line, format_scenario_result,
};
pub use metadata::build_report_meta;
