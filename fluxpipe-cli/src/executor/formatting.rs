//! Output Formatting
//!
//! One line per scenario:
//!
//! ```text
//! Verified encode: 12.34ms (56.78Mbit/s)
//! ```
//!
//! The time is the mean iteration time, the rate is aggregate payload
//! throughput. A scenario that failed prints `<name>: FAILED (<reason>)`.

use crate::planner::ExecutionPlan;
use fluxpipe_report::{Report, ScenarioReport, Throughput};

/// Format one scenario result line
pub fn format_scenario_line(name: &str, throughput: &Throughput) -> String {
    format!(
        "{}: {:.2}ms ({:.2}Mbit/s)",
        name,
        throughput.iteration_ms(),
        throughput.mbit_per_second
    )
}

/// Format one scenario result, measured or failed
pub fn format_scenario_result(scenario: &ScenarioReport) -> String {
    match &scenario.failure {
        Some(reason) => format!("{}: FAILED ({})", scenario.name, reason),
        None => format_scenario_line(&scenario.name, &scenario.throughput),
    }
}

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &Report) -> String {
    let mut output = String::new();
    for scenario in &report.scenarios {
        output.push_str(&format_scenario_result(scenario));
        output.push('\n');
    }
    if report.summary.mismatches > 0 {
        output.push_str(&format!(
            "{} digest mismatches in {} failed scenarios\n",
            report.summary.mismatches, report.summary.failed_scenarios
        ));
    }
    output
}

/// List planned scenarios without running them
pub fn format_plan(plan: &ExecutionPlan) -> String {
    let mut output = String::new();
    for scenario in &plan.scenarios {
        let cfg = &scenario.config;
        output.push_str(&format!(
            "{}  [enc {} / dec {}, {} reps x {} rounds, {}]\n",
            scenario.name,
            cfg.parallel_encode_workers,
            cfg.parallel_decode_workers,
            cfg.reps_per_round,
            cfg.round_count,
            if cfg.synchronize_every_round {
                "synchronized"
            } else {
                "deferred"
            }
        ));
        output.push_str(&format!("    encode: {}\n", scenario.commands.encode));
        output.push_str(&format!("    decode: {}\n", scenario.commands.decode));
    }
    output.push_str(&format!("{} scenarios\n", plan.scenarios.len()));
    output
}
