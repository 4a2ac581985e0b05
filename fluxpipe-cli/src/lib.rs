#![warn(missing_docs)]
//! FluxPipe CLI Library
//!
//! Command-line harness for benchmarking and verifying a transform binary
//! (an encoder/decoder driven through stdin/stdout).
//!
//! # Example
//!
//! ```text
//! fluxpipe photo.jpg --transform /usr/local/bin/lepton --arg -
//! Verified encode followed by decode: 48.21ms (142.77Mbit/s)
//! Verified encode: 30.02ms (114.63Mbit/s)
//! ...
//! ```

mod config;
mod executor;
mod planner;
mod supervisor;

pub use config::*;
pub use executor::{
    ScenarioExecutor, build_failed_scenario_report, build_report_meta, build_scenario_report,
    format_human_output, format_plan, format_scenario_line, format_scenario_result,
};
pub use planner::{ExecutionPlan, Scenario, SuiteSettings, build_plan, build_suite};
pub use supervisor::*;

use anyhow::Context;
use clap::Parser;
use fluxpipe_core::{
    CommandSpec, OsLauncher, Payload, PayloadError, PipeTransferEngine, SyntheticPayload,
};
use fluxpipe_logic::{MismatchPolicy, RoundTripVerifier};
use fluxpipe_report::{OutputFormat, Report, generate_json_report};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status when the input file does not exist
pub const EXIT_FILE_NOT_FOUND: u8 = 2;

/// Exit status when a run finished with reported digest mismatches
pub const EXIT_MISMATCH: u8 = 3;

/// FluxPipe CLI arguments
#[derive(Parser, Debug)]
#[command(name = "fluxpipe")]
#[command(
    author,
    version,
    about = "FluxPipe - throughput and round-trip verification for pipe-driven transforms"
)]
pub struct Cli {
    /// Input payload (built-in synthetic payload if omitted)
    pub input: Option<PathBuf>,

    /// Encoder program
    #[arg(short, long)]
    pub transform: Option<String>,

    /// Decoder program (defaults to the encoder)
    #[arg(long)]
    pub decoder: Option<String>,

    /// Argument passed to every invocation, repeatable (replaces configured args)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Run only scenarios whose name matches this regex
    #[arg(long)]
    pub filter: Option<String>,

    /// Output format: human, json
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Reps per round for single-stream scenarios
    #[arg(long)]
    pub reps: Option<u32>,

    /// Rounds per scenario
    #[arg(long)]
    pub rounds: Option<u32>,

    /// Per-transfer timeout in seconds (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Report digest mismatches as errors instead of aborting
    #[arg(long)]
    pub continue_on_mismatch: bool,

    /// Skip digest comparison (throughput only)
    #[arg(long)]
    pub no_verify: bool,

    /// Dry run - list scenarios without executing
    #[arg(long)]
    pub dry_run: bool,

    /// Configuration file (default: discover fluxpipe.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print a default fluxpipe.toml and exit
    #[arg(long)]
    pub print_config: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// No progress bar, warnings only
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// How a run ended, short of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Everything requested was done
    Completed,
    /// The input file does not exist; nothing was run
    FileNotFound,
    /// Every scenario ran but some reported digest mismatches
    Mismatch,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunStatus::Completed => ExitCode::SUCCESS,
            RunStatus::FileNotFound => ExitCode::from(EXIT_FILE_NOT_FOUND),
            RunStatus::Mismatch => ExitCode::from(EXIT_MISMATCH),
        }
    }
}

/// Run the FluxPipe CLI with the process arguments.
pub fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    run_with_cli(cli).map(RunStatus::exit_code)
}

/// Run the FluxPipe CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<RunStatus> {
    init_logging(cli.verbose, cli.quiet);

    if cli.print_config {
        print!("{}", FluxPipeConfig::default_toml());
        return Ok(RunStatus::Completed);
    }

    // Discover fluxpipe.toml configuration (CLI flags override)
    let config = match &cli.config {
        Some(path) => FluxPipeConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => FluxPipeConfig::discover().unwrap_or_default(),
    };

    let payload = match &cli.input {
        Some(path) => match Payload::load(path) {
            Ok(payload) => payload,
            Err(PayloadError::NotFound(path)) => {
                eprintln!("{} not found...", path.display());
                return Ok(RunStatus::FileNotFound);
            }
            Err(e) => return Err(e.into()),
        },
        None => SyntheticPayload::new()
            .body_reps(config.payload.synthetic_reps)
            .build(),
    };
    info!(bytes = payload.len(), digest = %payload.digest(), "payload ready");

    let commands = resolve_commands(&cli, &config)?;
    let settings = SuiteSettings {
        reps: cli.reps.unwrap_or(config.runner.reps),
        rounds: cli.rounds.unwrap_or(config.runner.rounds),
        parallel_levels: config.runner.parallel_levels.clone(),
        single_thread_flag: config.transform.single_thread_flag.clone(),
        skip_verify_flag: config.transform.skip_verify_flag.clone(),
        verify: config.verify.enabled && !cli.no_verify,
    };
    let filter = cli
        .filter
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid --filter pattern")?;
    let plan = build_plan(build_suite(&settings, &commands), filter.as_ref());

    if cli.dry_run {
        print!("{}", format_plan(&plan));
        return Ok(RunStatus::Completed);
    }
    if plan.scenarios.is_empty() {
        println!("No scenarios matched.");
        return Ok(RunStatus::Completed);
    }

    let format: OutputFormat = cli
        .format
        .as_deref()
        .unwrap_or(&config.output.format)
        .parse()
        .map_err(anyhow::Error::msg)?;
    let timeout = match cli.timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.transfer_timeout()?,
    };
    let policy = if cli.continue_on_mismatch || !config.verify.abort_on_mismatch {
        MismatchPolicy::Report
    } else {
        MismatchPolicy::Abort
    };

    let launcher = OsLauncher::new().with_stderr(config.transform.stderr);
    let verifier = RoundTripVerifier::new(launcher)
        .with_engine(PipeTransferEngine::new().with_timeout(timeout))
        .with_policy(policy);

    info!(
        scenarios = plan.scenarios.len(),
        encoder = %commands.encode,
        decoder = %commands.decode,
        "running scenarios"
    );

    // Human output to stdout is streamed line by line as scenarios finish.
    let stream_lines = format == OutputFormat::Human && cli.output.is_none();
    let scenarios = ScenarioExecutor::new(&verifier, &payload)
        .with_progress(!cli.quiet && config.output.progress)
        .execute(&plan.scenarios, |report| {
            if stream_lines {
                println!("{}", format_scenario_result(report));
            }
        })?;

    if !stream_lines {
        let report = Report::new(
            build_report_meta(&payload, &commands),
            scenarios,
            verifier.mismatch_count(),
        );
        let rendered = match format {
            OutputFormat::Human => format_human_output(&report),
            OutputFormat::Json => generate_json_report(&report)?,
        };
        write_output(&rendered, cli.output.as_deref())?;
    }

    let mismatches = verifier.mismatch_count();
    if mismatches > 0 {
        eprintln!("{mismatches} digest mismatches detected");
        return Ok(RunStatus::Mismatch);
    }
    Ok(RunStatus::Completed)
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "fluxpipe=debug"
    } else if quiet {
        "fluxpipe=warn"
    } else {
        "fluxpipe=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Stdout is reserved for results; a subscriber may already be set in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_commands(cli: &Cli, config: &FluxPipeConfig) -> anyhow::Result<TransformCommands> {
    let program = cli
        .transform
        .clone()
        .or_else(|| config.transform.program.clone())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "no transform program given; pass --transform or set [transform] program in {}",
                CONFIG_FILE_NAME
            )
        })?;
    let decoder = cli
        .decoder
        .clone()
        .or_else(|| config.transform.decoder.clone())
        .unwrap_or_else(|| program.clone());
    let args = if cli.args.is_empty() {
        config.transform.args.clone()
    } else {
        cli.args.clone()
    };

    Ok(TransformCommands {
        encode: CommandSpec::new(program).args(args.iter().cloned()),
        decode: CommandSpec::new(decoder).args(args),
    })
}

fn write_output(rendered: &str, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if !rendered.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
            stdout.flush()?;
        }
    }
    Ok(())
}
