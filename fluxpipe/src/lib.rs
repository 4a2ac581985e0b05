#![warn(missing_docs)]
//! # FluxPipe
//!
//! Concurrent throughput benchmarking and round-trip verification for
//! black-box transform binaries driven through stdin/stdout.
//!
//! - **Deadlock-free streaming**: every transfer writes and reads concurrently
//!   in 64 KiB blocks, so arbitrarily large payloads pass through bounded pipes
//! - **Incremental digests**: input and output are digested while streaming
//! - **Parallel load**: pools of encode/decode workers per round, joined every
//!   round or once at the end
//! - **Fail hard on corruption**: a digest mismatch aborts the process by
//!   default, with both digests on stderr
//!
//! ## Quick Start
//!
//! ```no_run
//! use fluxpipe::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let payload = Payload::load("photo.jpg")?;
//! let commands = TransformCommands::symmetric(CommandSpec::new("lepton").arg("-"));
//! let verifier = RoundTripVerifier::new(OsLauncher::new());
//! let runner = ParallelLoadRunner::new(&verifier, &commands);
//!
//! let config = TestConfiguration {
//!     parallel_encode_workers: 4,
//!     parallel_decode_workers: 0,
//!     reps_per_round: 4,
//!     ..TestConfiguration::default()
//! };
//! let measurement = runner.run_scenario(config, &payload)?;
//! let throughput = compute_throughput(
//!     measurement.elapsed,
//!     measurement.operation_count,
//!     measurement.iterations,
//!     payload.len() as u64,
//! );
//! println!("{}", format_scenario_line("Loaded 4 encode", &throughput));
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use fluxpipe_core::{
    CHUNK_SIZE, CommandSpec, Digest, DigestError, Launcher, LoopbackLauncher, LoopbackProcess,
    OsLauncher, OsProcess, Payload, PayloadError, PipeError, PipeTransferEngine, ProcessExit,
    StderrMode, StreamingDigest, SubprocessHandle, SyntheticPayload, TransferRequest,
    TransferResult,
};

// Re-export verification
pub use fluxpipe_logic::{
    EncodedPayload, FIRST_ENCODE_HEADER_LEN, MismatchPolicy, MismatchReport, MismatchStage,
    RoundTripVerifier, VerifyError,
};

// Re-export runner and suite
pub use fluxpipe_cli::{
    EXIT_FILE_NOT_FOUND, EXIT_MISMATCH, FluxPipeConfig, ParallelLoadRunner, RoundMetric,
    RunMeasurement, RunObserver, RunStatus, RunnerError, Scenario, ScenarioExecutor,
    SuiteSettings, TestConfiguration, TransformCommands, WorkerRole, build_plan, build_suite,
    format_scenario_line, format_scenario_result,
};

// Re-export reporting
pub use fluxpipe_report::{
    OutputFormat, Report, ScenarioReport, Throughput, compute_throughput, generate_json_report,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CommandSpec, OsLauncher, ParallelLoadRunner, Payload, RoundTripVerifier,
        TestConfiguration, TransformCommands, compute_throughput, format_scenario_line,
    };
}

/// Run the FluxPipe CLI harness.
///
/// ```no_run
/// fn main() -> std::process::ExitCode {
///     fluxpipe::run().unwrap_or(std::process::ExitCode::FAILURE)
/// }
/// ```
pub use fluxpipe_cli::run;
