//! Report Data Structures
//!
//! Throughput is derived from the mean time of one iteration, where an
//! iteration is one pass of every worker of one round through its
//! operations. `bits_per_second` therefore measures aggregate payload
//! volume per iteration time, and multiplies with the operation count
//! (encode followed by decode moves the payload twice).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version of the JSON layout
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Throughput and latency derived from one measured interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    /// Mean seconds per iteration
    pub iteration_secs: f64,
    /// Payload bits moved per second
    pub bits_per_second: f64,
    /// `bits_per_second / 1024 / 1024`
    pub mbit_per_second: f64,
    /// Mean seconds per single operation
    pub average_latency_secs: f64,
}

impl Throughput {
    /// Mean iteration time in milliseconds
    pub fn iteration_ms(&self) -> f64 {
        self.iteration_secs * 1000.0
    }
}

/// Derive throughput from an interval covering `repetitions` iterations of
/// `operation_count` operations, each moving `payload_bytes`.
///
/// A zero interval yields zero throughput rather than infinity.
pub fn compute_throughput(
    elapsed: Duration,
    operation_count: u32,
    repetitions: u32,
    payload_bytes: u64,
) -> Throughput {
    debug_assert!(repetitions > 0, "throughput needs at least one repetition");

    let elapsed_secs = elapsed.as_secs_f64();
    let repetitions = f64::from(repetitions.max(1));
    let operations = f64::from(operation_count);
    let iteration_secs = elapsed_secs / repetitions;

    let bits_per_second = if iteration_secs > 0.0 {
        payload_bytes as f64 * 8.0 * operations / iteration_secs
    } else {
        0.0
    };
    let average_latency_secs = if operations > 0.0 {
        elapsed_secs / (repetitions * operations)
    } else {
        0.0
    };

    Throughput {
        iteration_secs,
        bits_per_second,
        mbit_per_second: bits_per_second / 1024.0 / 1024.0,
        average_latency_secs,
    }
}

/// Complete report of a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub scenarios: Vec<ScenarioReport>,
    pub summary: ReportSummary,
}

impl Report {
    /// Assemble a report and its summary
    pub fn new(meta: ReportMeta, scenarios: Vec<ScenarioReport>, mismatches: u64) -> Self {
        let summary = ReportSummary {
            total_scenarios: scenarios.len(),
            failed_scenarios: scenarios.iter().filter(|s| s.failed()).count(),
            total_elapsed_ms: scenarios.iter().map(|s| s.elapsed_ms).sum(),
            mismatches,
        };
        Self {
            meta,
            scenarios,
            summary,
        }
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub schema_version: u32,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub payload_bytes: u64,
    pub payload_digest: String,
    pub encoder: String,
    pub decoder: String,
}

/// Measured result of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name as printed
    pub name: String,
    /// Concurrent encode workers per round
    pub encode_workers: u32,
    /// Concurrent decode workers per round
    pub decode_workers: u32,
    /// Invocations per worker per round
    pub reps_per_round: u32,
    /// Number of rounds
    pub rounds: u32,
    /// Whether every round joined before the next started
    pub synchronized: bool,
    /// Whether outputs were digest-checked
    pub verified: bool,
    /// Operations per iteration (2 for encode followed by decode)
    pub operation_count: u32,
    /// Iterations covered by `elapsed_ms`
    pub repetitions: u32,
    /// Whole measured interval
    pub elapsed_ms: f64,
    /// Per-round intervals (a single entry for deferred runs)
    pub round_ms: Vec<f64>,
    /// Derived throughput, zero when the scenario failed
    pub throughput: Throughput,
    /// Digest mismatches observed while running this scenario
    #[serde(default)]
    pub mismatches: u64,
    /// Why the scenario stopped early, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ScenarioReport {
    /// Whether the scenario stopped before completing its measurement
    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Totals across all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_scenarios: usize,
    #[serde(default)]
    pub failed_scenarios: usize,
    pub total_elapsed_ms: f64,
    pub mismatches: u64,
}
