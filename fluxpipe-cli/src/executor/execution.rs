//! Scenario Execution
//!
//! Runs scenarios one after another. Each scenario gets its own first encode
//! (its commands may carry extra flags) and its own worker pool.
//!
//! Under [`MismatchPolicy::Report`] a scenario that fails on a digest
//! mismatch is recorded as failed and the remaining scenarios still run.
//!
//! ## Data Flow
//!
//! ```text
//! Scenario
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ParallelLoadRunner│  first encode → rounds → RunMeasurement
//! └────────┬─────────┘
//!          │
//!          ▼
//!  ScenarioReport (timings, throughput)
//! ```

use crate::planner::Scenario;
use crate::supervisor::{ParallelLoadRunner, RunMeasurement, RunnerError};
use fluxpipe_core::{Launcher, Payload};
use fluxpipe_logic::{MismatchPolicy, RoundTripVerifier, VerifyError};
use fluxpipe_report::{ScenarioReport, Throughput, compute_throughput};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

/// Runs scenarios against one payload
pub struct ScenarioExecutor<'a, L> {
    verifier: &'a RoundTripVerifier<L>,
    payload: &'a Payload,
    show_progress: bool,
}

impl<'a, L: Launcher> ScenarioExecutor<'a, L> {
    pub fn new(verifier: &'a RoundTripVerifier<L>, payload: &'a Payload) -> Self {
        Self {
            verifier,
            payload,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Run every scenario in order, handing each result to `on_result` as
    /// soon as it is measured.
    ///
    /// Stops at the first failing scenario, except for digest mismatches
    /// under [`MismatchPolicy::Report`], which are recorded and skipped.
    pub fn execute<F>(
        &self,
        scenarios: &[Scenario],
        mut on_result: F,
    ) -> Result<Vec<ScenarioReport>, RunnerError>
    where
        F: FnMut(&ScenarioReport),
    {
        let pb = if self.show_progress {
            let pb = ProgressBar::new(scenarios.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut reports = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            pb.set_message(scenario.name.clone());

            let mismatches_before = self.verifier.mismatch_count();
            let runner = ParallelLoadRunner::new(self.verifier, &scenario.commands);
            let outcome = runner.run_scenario(scenario.config, self.payload);
            let mismatches = self.verifier.mismatch_count() - mismatches_before;

            let report = match outcome {
                Ok(measurement) => {
                    let mut report =
                        build_scenario_report(scenario, &measurement, self.payload.len() as u64);
                    report.mismatches = mismatches;
                    info!(
                        scenario = %report.name,
                        elapsed_ms = report.elapsed_ms,
                        mbit_per_second = report.throughput.mbit_per_second,
                        "scenario complete"
                    );
                    report
                }
                Err(e) if self.continues_after(&e) => {
                    warn!(scenario = %scenario.name, error = %e, "scenario failed, continuing");
                    build_failed_scenario_report(scenario, &e, mismatches)
                }
                Err(e) => {
                    pb.abandon_with_message(format!("{} failed", scenario.name));
                    return Err(e);
                }
            };
            pb.suspend(|| on_result(&report));
            reports.push(report);
            pb.inc(1);
        }

        pb.finish_and_clear();
        Ok(reports)
    }

    fn continues_after(&self, error: &RunnerError) -> bool {
        self.verifier.policy() == MismatchPolicy::Report
            && matches!(error, RunnerError::Verify(VerifyError::DigestMismatch(_)))
    }
}

/// Turn a measurement into a report entry
pub fn build_scenario_report(
    scenario: &Scenario,
    measurement: &RunMeasurement,
    payload_bytes: u64,
) -> ScenarioReport {
    let cfg = &scenario.config;
    ScenarioReport {
        name: scenario.name.clone(),
        encode_workers: cfg.parallel_encode_workers,
        decode_workers: cfg.parallel_decode_workers,
        reps_per_round: cfg.reps_per_round,
        rounds: cfg.round_count,
        synchronized: cfg.synchronize_every_round,
        verified: cfg.verify,
        operation_count: measurement.operation_count,
        repetitions: measurement.iterations,
        elapsed_ms: measurement.elapsed.as_secs_f64() * 1000.0,
        round_ms: measurement
            .rounds
            .iter()
            .map(|r| r.elapsed.as_secs_f64() * 1000.0)
            .collect(),
        throughput: compute_throughput(
            measurement.elapsed,
            measurement.operation_count,
            measurement.iterations,
            payload_bytes,
        ),
        mismatches: 0,
        failure: None,
    }
}

/// Report entry for a scenario that stopped before its measurement finished
pub fn build_failed_scenario_report(
    scenario: &Scenario,
    error: &RunnerError,
    mismatches: u64,
) -> ScenarioReport {
    let cfg = &scenario.config;
    ScenarioReport {
        name: scenario.name.clone(),
        encode_workers: cfg.parallel_encode_workers,
        decode_workers: cfg.parallel_decode_workers,
        reps_per_round: cfg.reps_per_round,
        rounds: cfg.round_count,
        synchronized: cfg.synchronize_every_round,
        verified: cfg.verify,
        operation_count: cfg.operation_count(),
        repetitions: 0,
        elapsed_ms: 0.0,
        round_ms: Vec::new(),
        throughput: Throughput::default(),
        mismatches,
        failure: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{SuiteSettings, build_suite};
    use crate::supervisor::{RoundMetric, TestConfiguration, TransformCommands};
    use fluxpipe_core::{CommandSpec, LoopbackLauncher};
    use std::time::Duration;

    #[test]
    fn test_build_scenario_report() {
        let scenario = Scenario {
            name: "Loaded 4 decode".to_string(),
            config: TestConfiguration {
                parallel_encode_workers: 0,
                parallel_decode_workers: 4,
                reps_per_round: 4,
                round_count: 1,
                synchronize_every_round: false,
                verify: true,
            },
            commands: TransformCommands::symmetric(CommandSpec::new("t")),
        };
        let measurement = RunMeasurement {
            elapsed: Duration::from_millis(400),
            rounds: vec![RoundMetric {
                elapsed: Duration::from_millis(400),
                operation_count: 16,
            }],
            iterations: 4,
            operation_count: 1,
        };

        let report = build_scenario_report(&scenario, &measurement, 1024 * 1024);
        assert_eq!(report.decode_workers, 4);
        assert!(!report.synchronized);
        assert_eq!(report.round_ms.len(), 1);
        assert!((report.throughput.iteration_ms() - 100.0).abs() < 1e-9);
        assert!((report.throughput.mbit_per_second - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_execute_suite_with_loopback() {
        let verifier = RoundTripVerifier::new(LoopbackLauncher::echo());
        let payload = Payload::from_vec(vec![9u8; 4096]);
        let settings = SuiteSettings {
            reps: 2,
            parallel_levels: vec![2],
            ..SuiteSettings::default()
        };
        let commands = TransformCommands::symmetric(CommandSpec::new("echo"));
        let suite = build_suite(&settings, &commands);

        let mut streamed = Vec::new();
        let reports = ScenarioExecutor::new(&verifier, &payload)
            .execute(&suite, |r| streamed.push(r.name.clone()))
            .unwrap();

        assert_eq!(reports.len(), suite.len());
        assert_eq!(streamed.len(), suite.len());
        assert_eq!(streamed[0], "Verified encode followed by decode");
        assert!(reports.iter().all(|r| r.throughput.mbit_per_second >= 0.0));
        assert!(reports.iter().all(|r| !r.failed()));
        assert_eq!(verifier.mismatch_count(), 0);
    }

    /// Decoder appends a byte, so every decode check fails
    fn corrupting_decoder() -> LoopbackLauncher {
        LoopbackLauncher::new(|cmd| {
            if cmd.program() == "dec" {
                Box::new(|chunk: &mut Vec<u8>| chunk.push(0xFF))
            } else {
                Box::new(|_: &mut Vec<u8>| {})
            }
        })
    }

    fn split_commands() -> TransformCommands {
        TransformCommands {
            encode: CommandSpec::new("enc"),
            decode: CommandSpec::new("dec"),
        }
    }

    #[test]
    fn test_report_policy_runs_every_scenario() {
        let verifier =
            RoundTripVerifier::new(corrupting_decoder()).with_policy(MismatchPolicy::Report);
        let payload = Payload::from_vec(vec![3u8; 2048]);
        let settings = SuiteSettings {
            reps: 2,
            parallel_levels: vec![2],
            ..SuiteSettings::default()
        };
        let suite = build_suite(&settings, &split_commands());

        let mut streamed = Vec::new();
        let reports = ScenarioExecutor::new(&verifier, &payload)
            .execute(&suite, |r| streamed.push((r.name.clone(), r.failed())))
            .unwrap();

        assert_eq!(reports.len(), suite.len());
        assert_eq!(streamed.len(), suite.len());
        for (scenario, report) in suite.iter().zip(&reports) {
            let decodes = scenario.config.parallel_decode_workers > 0;
            assert_eq!(report.name, scenario.name);
            assert_eq!(report.failed(), decodes, "{}", report.name);
            assert_eq!(report.mismatches > 0, decodes, "{}", report.name);
        }
        let recorded: u64 = reports.iter().map(|r| r.mismatches).sum();
        assert_eq!(recorded, verifier.mismatch_count());
    }

    #[test]
    fn test_other_errors_still_stop_the_run() {
        let verifier = RoundTripVerifier::new(fluxpipe_core::OsLauncher::new())
            .with_policy(MismatchPolicy::Report);
        let payload = Payload::from_vec(vec![1u8; 16]);
        let commands =
            TransformCommands::symmetric(CommandSpec::new("/nonexistent/fluxpipe-transform"));
        let suite = build_suite(&SuiteSettings::default(), &commands);

        let mut streamed = 0;
        let err = ScenarioExecutor::new(&verifier, &payload)
            .execute(&suite, |_| streamed += 1)
            .unwrap_err();
        assert!(matches!(err, RunnerError::Verify(VerifyError::Pipe(_))));
        assert_eq!(streamed, 0);
    }
}
