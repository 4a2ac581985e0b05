//! Configuration loading from fluxpipe.toml
//!
//! FluxPipe configuration can be specified in a `fluxpipe.toml` file. The
//! configuration is automatically discovered by walking up from the current
//! directory. Command-line flags override file values.

use fluxpipe_core::{SYNTHETIC_BODY_REPS, StderrMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the configuration file looked up by [`FluxPipeConfig::discover`]
pub const CONFIG_FILE_NAME: &str = "fluxpipe.toml";

/// FluxPipe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FluxPipeConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Transform program configuration
    #[serde(default)]
    pub transform: TransformConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
    /// Verification configuration
    #[serde(default)]
    pub verify: VerifyConfig,
    /// Synthetic payload configuration
    #[serde(default)]
    pub payload: PayloadConfig,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Reps per round for single-stream scenarios
    #[serde(default = "default_reps")]
    pub reps: u32,
    /// Rounds per scenario
    #[serde(default = "default_rounds")]
    pub rounds: u32,
    /// Worker counts for loaded scenarios
    #[serde(default = "default_parallel_levels")]
    pub parallel_levels: Vec<u32>,
    /// Per-transfer timeout (e.g., "30s"); "0s" disables it
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            reps: default_reps(),
            rounds: default_rounds(),
            parallel_levels: default_parallel_levels(),
            timeout: default_timeout(),
        }
    }
}

fn default_reps() -> u32 {
    8
}
fn default_rounds() -> u32 {
    1
}
fn default_parallel_levels() -> Vec<u32> {
    vec![2, 4, 6, 8, 12, 16]
}
fn default_timeout() -> String {
    "0s".to_string()
}

/// Transform program configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Encoder program (overridden by `--transform`)
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments passed to both encoder and decoder
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Decoder program, defaults to the encoder
    #[serde(default)]
    pub decoder: Option<String>,
    /// Flag selecting single-threaded transforms
    #[serde(default = "default_single_thread_flag")]
    pub single_thread_flag: String,
    /// Flag disabling the transform's own verification
    #[serde(default = "default_skip_verify_flag")]
    pub skip_verify_flag: String,
    /// Transform stderr handling: "inherit", "null" or "capture" (shown in
    /// failure warnings and mismatch reports)
    #[serde(default)]
    pub stderr: StderrMode,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_args(),
            decoder: None,
            single_thread_flag: default_single_thread_flag(),
            skip_verify_flag: default_skip_verify_flag(),
            stderr: StderrMode::default(),
        }
    }
}

fn default_args() -> Vec<String> {
    vec!["-".to_string()]
}
fn default_single_thread_flag() -> String {
    "-singlethread".to_string()
}
fn default_skip_verify_flag() -> String {
    "-skipverify".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
    /// Show a progress bar on stderr
    #[serde(default = "default_progress")]
    pub progress: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            progress: default_progress(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}
fn default_progress() -> bool {
    true
}

/// Verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Compare output digests after every invocation
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Abort the process on the first mismatch
    #[serde(default = "default_abort_on_mismatch")]
    pub abort_on_mismatch: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            abort_on_mismatch: default_abort_on_mismatch(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_abort_on_mismatch() -> bool {
    true
}

/// Synthetic payload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// Body repetitions of the built-in payload
    #[serde(default = "default_synthetic_reps")]
    pub synthetic_reps: usize,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            synthetic_reps: default_synthetic_reps(),
        }
    }
}

fn default_synthetic_reps() -> usize {
    SYNTHETIC_BODY_REPS
}

impl FluxPipeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let dir = std::env::current_dir().ok()?;
        Self::discover_from(&dir)
    }

    /// Walk up from `start` looking for [`CONFIG_FILE_NAME`]
    pub fn discover_from(start: &Path) -> Option<Self> {
        let mut dir = start.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), error = %e, "ignoring invalid config file");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# FluxPipe Configuration
# https://github.com/ml-rust/fluxpipe

[runner]
# Reps per round for single-stream scenarios (halved for loaded and 1-way)
reps = 8
# Rounds per scenario
rounds = 1
# Worker counts for loaded scenarios
parallel_levels = [2, 4, 6, 8, 12, 16]
# Per-transfer timeout, "0s" disables it
timeout = "0s"

[transform]
# Encoder program (uncomment to enable, --transform wins)
# program = "/usr/local/bin/lepton"
# Arguments passed to every invocation
args = ["-"]
# Decoder program, defaults to the encoder (uncomment to enable)
# decoder = "/usr/local/bin/lepton"
# Flags forwarded by the scenario suite
single_thread_flag = "-singlethread"
skip_verify_flag = "-skipverify"
# Transform stderr: "inherit", "null" or "capture" (captured output is
# included in failure warnings and mismatch reports)
stderr = "inherit"

[output]
# Default output format: human, json
format = "human"
# Progress bar on stderr
progress = true

[verify]
# Compare output digests after every invocation
enabled = true
# Abort on the first mismatch
abort_on_mismatch = true

[payload]
# Body repetitions of the built-in payload
synthetic_reps = 16384
"#
        .to_string()
    }

    /// Per-transfer timeout, `None` when disabled
    pub fn transfer_timeout(&self) -> anyhow::Result<Option<Duration>> {
        let nanos = Self::parse_duration(&self.runner.timeout)?;
        Ok((nanos > 0).then(|| Duration::from_nanos(nanos)))
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if value < 0.0 {
            return Err(anyhow::anyhow!("Negative duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }
}
