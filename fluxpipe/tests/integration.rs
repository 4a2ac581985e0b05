//! Integration tests for FluxPipe
//!
//! These tests drive the whole stack: transfer engine, verifier, load runner
//! and reporting, against in-memory loopback transforms and (on unix) real
//! `cat` processes.

use fluxpipe::{
    CHUNK_SIZE, CommandSpec, Digest, LoopbackLauncher, MismatchPolicy, MismatchStage,
    ParallelLoadRunner, Payload, RoundTripVerifier, RunObserver, RunnerError, TestConfiguration,
    TransformCommands, VerifyError, WorkerRole, compute_throughput,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const BOUNDARY_LENGTHS: [usize; 5] = [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1];

fn pattern(len: usize) -> Payload {
    Payload::from_vec((0..len).map(|i| (i * 7 + 3) as u8).collect())
}

fn echo_commands() -> TransformCommands {
    TransformCommands::symmetric(CommandSpec::new("echo"))
}

/// Corrupts the first byte of every chunk streamed through it
fn flipping_launcher() -> LoopbackLauncher {
    LoopbackLauncher::new(|_| {
        Box::new(|chunk: &mut Vec<u8>| {
            if let Some(first) = chunk.first_mut() {
                *first ^= 0x01;
            }
        })
    })
}

#[test]
fn test_round_trip_identity_loopback() {
    let verifier = RoundTripVerifier::new(LoopbackLauncher::echo());
    let command = CommandSpec::new("echo");

    for len in BOUNDARY_LENGTHS {
        let payload = pattern(len);
        let encoded = verifier.encode_and_capture(&payload, &command).unwrap();
        assert_eq!(encoded.encoded.as_bytes(), payload.as_bytes(), "len {len}");

        let result = verifier
            .check_round_trip(encoded.encoded.as_bytes(), payload.digest(), &command)
            .unwrap();
        assert_eq!(result.bytes_transferred, len as u64);
    }
    assert_eq!(verifier.mismatch_count(), 0);
}

#[cfg(unix)]
#[test]
fn test_round_trip_identity_cat() {
    let verifier =
        RoundTripVerifier::new(fluxpipe::OsLauncher::new()).with_policy(MismatchPolicy::Report);
    let command = CommandSpec::new("cat");

    for len in BOUNDARY_LENGTHS {
        let payload = pattern(len);
        let encoded = verifier.encode_and_capture(&payload, &command).unwrap();
        assert_eq!(encoded.encoded_digest, payload.digest(), "len {len}");
        verifier
            .check_round_trip(payload.as_bytes(), payload.digest(), &command)
            .unwrap();
    }
}

fn run_parallel_echo<L: fluxpipe::Launcher>(verifier: &RoundTripVerifier<L>, workers: u32) {
    let payload = pattern(10 * CHUNK_SIZE);
    let commands = echo_commands();
    let runner = ParallelLoadRunner::new(verifier, &commands);
    let config = TestConfiguration {
        parallel_encode_workers: workers,
        parallel_decode_workers: 0,
        reps_per_round: 2,
        round_count: 1,
        synchronize_every_round: false,
        verify: true,
    };
    let measurement = runner.run_scenario(config, &payload).unwrap();
    assert_eq!(measurement.iterations, 2);
    assert_eq!(measurement.rounds[0].operation_count, 2 * workers);
}

#[test]
fn test_no_deadlock_loopback_workers() {
    let verifier = RoundTripVerifier::new(LoopbackLauncher::echo().with_capacity(1));
    for workers in [1, 2, 16] {
        run_parallel_echo(&verifier, workers);
    }
}

#[cfg(unix)]
#[test]
fn test_no_deadlock_cat_workers() {
    let verifier = RoundTripVerifier::new(fluxpipe::OsLauncher::new());
    for workers in [1, 2, 16] {
        let payload = pattern(10 * CHUNK_SIZE);
        let commands = TransformCommands::symmetric(CommandSpec::new("cat"));
        let runner = ParallelLoadRunner::new(&verifier, &commands);
        let config = TestConfiguration {
            parallel_encode_workers: workers,
            parallel_decode_workers: 0,
            ..TestConfiguration::default()
        };
        runner.run_scenario(config, &payload).unwrap();
    }
}

#[test]
fn test_throughput_matches_bits_over_elapsed() {
    const DELAY: Duration = Duration::from_millis(20);
    let launcher = LoopbackLauncher::new(|_| {
        Box::new(|_chunk: &mut Vec<u8>| std::thread::sleep(DELAY))
    });
    let verifier = RoundTripVerifier::new(launcher);
    let commands = echo_commands();
    let runner = ParallelLoadRunner::new(&verifier, &commands);

    // One chunk per invocation, so one delay per invocation
    let payload = pattern(CHUNK_SIZE / 2);
    let config = TestConfiguration {
        parallel_encode_workers: 1,
        parallel_decode_workers: 0,
        reps_per_round: 3,
        round_count: 2,
        synchronize_every_round: true,
        verify: true,
    };
    let measurement = runner.run_scenario(config, &payload).unwrap();
    assert!(measurement.elapsed >= DELAY * 6);
    assert_eq!(measurement.rounds.len(), 2);

    let throughput = compute_throughput(
        measurement.elapsed,
        measurement.operation_count,
        measurement.iterations,
        payload.len() as u64,
    );
    let bits = payload.len() as f64 * 8.0 * 6.0;
    let expected = bits / measurement.elapsed.as_secs_f64();
    assert!((throughput.bits_per_second - expected).abs() / expected < 1e-9);
    assert!(throughput.iteration_secs >= DELAY.as_secs_f64());
}

#[test]
fn test_mismatch_reported_once_with_both_digests() {
    let verifier =
        RoundTripVerifier::new(flipping_launcher()).with_policy(MismatchPolicy::Report);
    let payload = pattern(1000);

    let err = verifier
        .check_round_trip(
            payload.as_bytes(),
            payload.digest(),
            &CommandSpec::new("flip"),
        )
        .unwrap_err();

    assert_eq!(verifier.mismatch_count(), 1);
    let VerifyError::DigestMismatch(report) = err else {
        panic!("expected a digest mismatch");
    };
    let mut corrupted = payload.as_bytes().to_vec();
    corrupted[0] ^= 0x01;
    assert_eq!(report.stage, MismatchStage::RoundTrip);
    assert_eq!(report.expected, payload.digest());
    assert_eq!(report.actual, Digest::of(&corrupted));
    assert_eq!(
        report.to_string(),
        format!(
            "Input Size 1000 != Roundtrip Size 1000\n{} != {}",
            payload.digest(),
            Digest::of(&corrupted)
        )
    );
}

#[test]
fn test_mismatch_in_runner_surfaces_after_join() {
    // The first launch (the first encode) is clean, every later one corrupts
    let launches = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&launches);
    let launcher = LoopbackLauncher::new(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Box::new(|_chunk: &mut Vec<u8>| {})
        } else {
            Box::new(|chunk: &mut Vec<u8>| {
                if let Some(first) = chunk.first_mut() {
                    *first ^= 0x01;
                }
            })
        }
    });
    let verifier = RoundTripVerifier::new(launcher).with_policy(MismatchPolicy::Report);
    let commands = echo_commands();
    let runner = ParallelLoadRunner::new(&verifier, &commands);

    let config = TestConfiguration {
        parallel_encode_workers: 0,
        parallel_decode_workers: 1,
        reps_per_round: 3,
        ..TestConfiguration::default()
    };
    let err = runner.run_scenario(config, &pattern(1000)).unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Verify(VerifyError::DigestMismatch(_))
    ));
    // The failing worker stops at its first mismatch
    assert_eq!(verifier.mismatch_count(), 1);
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

const ABORT_CHILD_ENV: &str = "FLUXPIPE_ABORT_ON_MISMATCH_CHILD";

/// Runs only when re-executed by `test_mismatch_aborts_process`
#[test]
fn abort_on_mismatch_child() {
    if std::env::var_os(ABORT_CHILD_ENV).is_none() {
        return;
    }
    let verifier = RoundTripVerifier::new(flipping_launcher());
    let payload = pattern(1000);
    let _ = verifier.check_round_trip(
        payload.as_bytes(),
        payload.digest(),
        &CommandSpec::new("flip"),
    );
    panic!("mismatch did not abort the process");
}

#[cfg(unix)]
#[test]
fn test_mismatch_aborts_process() {
    use std::os::unix::process::ExitStatusExt;
    use std::process::Command;

    const SIGABRT: i32 = 6;

    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe)
        .args([
            "abort_on_mismatch_child",
            "--exact",
            "--nocapture",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD_ENV, "1")
        .output()
        .unwrap();

    assert_eq!(output.status.signal(), Some(SIGABRT));

    let payload = pattern(1000);
    let mut corrupted = payload.as_bytes().to_vec();
    corrupted[0] ^= 0x01;
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Input Size 1000 != Roundtrip Size 1000"));
    assert!(stderr.contains(&format!(
        "{} != {}",
        payload.digest(),
        Digest::of(&corrupted)
    )));
}

#[derive(Default)]
struct BarrierLog {
    events: Mutex<Vec<(char, u32)>>,
}

impl RunObserver for BarrierLog {
    fn round_started(&self, round: u32) {
        self.events.lock().unwrap().push(('R', round));
    }
    fn worker_finished(&self, round: u32, _role: WorkerRole) {
        self.events.lock().unwrap().push(('F', round));
    }
}

#[test]
fn test_synchronous_rounds_never_overlap() {
    let launcher = LoopbackLauncher::new(|_| {
        Box::new(|_chunk: &mut Vec<u8>| std::thread::sleep(Duration::from_millis(2)))
    });
    let verifier = RoundTripVerifier::new(launcher);
    let commands = echo_commands();
    let log = BarrierLog::default();
    let runner = ParallelLoadRunner::new(&verifier, &commands).with_observer(&log);

    let config = TestConfiguration {
        parallel_encode_workers: 4,
        parallel_decode_workers: 4,
        reps_per_round: 2,
        round_count: 5,
        synchronize_every_round: true,
        verify: true,
    };
    runner.run_scenario(config, &pattern(4096)).unwrap();

    // Every worker of round r finishes before round r + 1 starts
    let events = log.events.into_inner().unwrap();
    let mut current = 0;
    let mut finished_in_round = 0;
    for (kind, round) in events {
        match kind {
            'R' => {
                if round > 0 {
                    assert_eq!(finished_in_round, 8, "round {} started early", round);
                }
                current = round;
                finished_in_round = 0;
            }
            _ => {
                assert_eq!(round, current, "worker of round {} outlived its round", round);
                finished_in_round += 1;
            }
        }
    }
    assert_eq!(finished_in_round, 8);
}

#[cfg(unix)]
#[test]
fn test_cli_json_report_with_cat() {
    use clap::Parser;
    use fluxpipe_cli::{Cli, RunStatus, run_with_cli};

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("payload.bin");
    let output = dir.path().join("report.json");
    std::fs::write(&input, pattern(200_000).as_bytes()).unwrap();

    let cli = Cli::try_parse_from([
        "fluxpipe",
        input.to_str().unwrap(),
        "--transform",
        "cat",
        "--filter",
        "^(Verified encode|decode)$",
        "--reps",
        "2",
        "--format",
        "json",
        "--output",
        output.to_str().unwrap(),
        "--quiet",
    ])
    .unwrap();
    assert_eq!(run_with_cli(cli).unwrap(), RunStatus::Completed);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let names: Vec<&str> = report["scenarios"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Verified encode", "decode"]);
    assert_eq!(report["meta"]["payload_bytes"], 200_000);
    assert_eq!(report["summary"]["mismatches"], 0);
}

#[cfg(unix)]
#[test]
fn test_cli_continues_past_mismatches() {
    use clap::Parser;
    use fluxpipe_cli::{Cli, RunStatus, run_with_cli};

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("payload.bin");
    let output = dir.path().join("report.json");
    std::fs::write(&input, pattern(50_000).as_bytes()).unwrap();

    // `sort` reorders lines and terminates the last one, so every decode
    // produces different bytes.
    let cli = Cli::try_parse_from([
        "fluxpipe",
        input.to_str().unwrap(),
        "--transform",
        "cat",
        "--decoder",
        "sort",
        "--filter",
        "^(Verified encode followed by decode|Verified encode|decode)$",
        "--reps",
        "2",
        "--continue-on-mismatch",
        "--format",
        "json",
        "--output",
        output.to_str().unwrap(),
        "--quiet",
    ])
    .unwrap();
    assert_eq!(run_with_cli(cli).unwrap(), RunStatus::Mismatch);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let scenarios = report["scenarios"].as_array().unwrap();
    let names: Vec<&str> = scenarios
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["Verified encode followed by decode", "Verified encode", "decode"]
    );

    let failed: Vec<bool> = scenarios.iter().map(|s| s.get("failure").is_some()).collect();
    assert_eq!(failed, vec![true, false, true]);
    assert!(scenarios[1]["throughput"]["mbit_per_second"].as_f64().unwrap() > 0.0);
    assert!(report["summary"]["mismatches"].as_u64().unwrap() >= 2);
    assert_eq!(report["summary"]["failed_scenarios"], 2);
}
