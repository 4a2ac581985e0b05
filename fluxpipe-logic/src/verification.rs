//! Round-Trip Verification
//!
//! Every invocation launches a fresh transform process, streams a candidate
//! through it and compares the output digest with the digest the output
//! should have. A mismatch is a correctness violation, not a transient
//! failure: under [`MismatchPolicy::Abort`] the whole process aborts at once.

use fluxpipe_core::{
    CommandSpec, Digest, Launcher, Payload, PipeError, PipeTransferEngine, ProcessExit,
    SubprocessHandle, TransferRequest, TransferResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Bytes written as a separate header block during the first encode
pub const FIRST_ENCODE_HEADER_LEN: usize = 2;

/// Captured transform stderr kept for diagnostics, in characters
pub const STDERR_EXCERPT_LEN: usize = 512;

/// Reaction to a digest mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchPolicy {
    /// Print both digests to stderr and abort the process
    #[default]
    Abort,
    /// Log the mismatch and return [`VerifyError::DigestMismatch`]
    Report,
}

/// Where a mismatch was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchStage {
    /// Harness self-check during the first encode
    Baseline,
    /// Output of a transform invocation
    RoundTrip,
}

impl fmt::Display for MismatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchStage::Baseline => f.write_str("baseline"),
            MismatchStage::RoundTrip => f.write_str("round-trip"),
        }
    }
}

/// Diagnostics for one mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MismatchReport {
    /// Detection point
    pub stage: MismatchStage,
    /// Digest the data should have had
    pub expected: Digest,
    /// Digest actually observed
    pub actual: Digest,
    /// Bytes streamed into the transform
    pub input_len: u64,
    /// Bytes observed on the checked side
    pub output_len: u64,
    /// Captured stderr of the transform, when stderr capture is on
    pub stderr: Option<String>,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Input Size {} != Roundtrip Size {}",
            self.input_len, self.output_len
        )?;
        write!(f, "{} != {}", self.expected, self.actual)?;
        if let Some(stderr) = &self.stderr {
            write!(f, "\nTransform stderr: {stderr}")?;
        }
        Ok(())
    }
}

/// Verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Pipe(#[from] PipeError),

    #[error("{} digest mismatch: {} != {}", .0.stage, .0.expected, .0.actual)]
    DigestMismatch(MismatchReport),
}

/// Result of the first encode
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    /// Captured encoder output, decode workers stream this
    pub encoded: Payload,
    /// Digest of the raw payload
    pub payload_digest: Digest,
    /// Digest of the encoded bytes
    pub encoded_digest: Digest,
}

/// Launches transforms and checks their output digests
pub struct RoundTripVerifier<L> {
    launcher: L,
    engine: PipeTransferEngine,
    policy: MismatchPolicy,
    mismatches: AtomicU64,
}

impl<L: Launcher> RoundTripVerifier<L> {
    /// Verifier with the default engine and [`MismatchPolicy::Abort`]
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            engine: PipeTransferEngine::new(),
            policy: MismatchPolicy::default(),
            mismatches: AtomicU64::new(0),
        }
    }

    /// Use a custom transfer engine
    pub fn with_engine(mut self, engine: PipeTransferEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Choose the mismatch reaction
    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mismatch reaction in effect
    pub fn policy(&self) -> MismatchPolicy {
        self.policy
    }

    /// Underlying launcher
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Mismatches observed so far
    pub fn mismatch_count(&self) -> u64 {
        self.mismatches.load(Ordering::SeqCst)
    }

    /// Encode `payload` once and keep the output for decode workers.
    ///
    /// The first bytes are written as a separate header block. The digest
    /// the engine recorded while streaming must equal the digest of the
    /// payload computed directly, otherwise the harness itself is broken.
    pub fn encode_and_capture(
        &self,
        payload: &Payload,
        command: &CommandSpec,
    ) -> Result<EncodedPayload, VerifyError> {
        let payload_digest = payload.digest();
        let request = TransferRequest::new(payload.as_bytes())
            .with_header(FIRST_ENCODE_HEADER_LEN.min(payload.len()))?
            .capture(true);
        let (result, stderr) = self.run(command, &request)?;

        if result.input_digest != payload_digest {
            return Err(self.mismatch(MismatchReport {
                stage: MismatchStage::Baseline,
                expected: payload_digest,
                actual: result.input_digest,
                input_len: payload.len() as u64,
                output_len: result.bytes_written,
                stderr,
            }));
        }

        let encoded = Payload::from_vec(result.captured_output.unwrap_or_default());
        let encoded_digest = encoded.digest();
        if encoded_digest != result.output_digest {
            return Err(self.mismatch(MismatchReport {
                stage: MismatchStage::Baseline,
                expected: result.output_digest,
                actual: encoded_digest,
                input_len: result.bytes_transferred,
                output_len: encoded.len() as u64,
                stderr,
            }));
        }

        debug!(
            payload_bytes = payload.len(),
            encoded_bytes = encoded.len(),
            encoded_digest = %encoded_digest,
            "first encode complete"
        );

        Ok(EncodedPayload {
            encoded,
            payload_digest,
            encoded_digest,
        })
    }

    /// Stream `candidate` through a fresh `command` process and require its
    /// output to digest to `expected`
    pub fn check_round_trip(
        &self,
        candidate: &[u8],
        expected: Digest,
        command: &CommandSpec,
    ) -> Result<TransferResult, VerifyError> {
        let (result, stderr) = self.run(command, &TransferRequest::new(candidate))?;
        if result.output_digest != expected {
            return Err(self.mismatch(MismatchReport {
                stage: MismatchStage::RoundTrip,
                expected,
                actual: result.output_digest,
                input_len: candidate.len() as u64,
                output_len: result.bytes_transferred,
                stderr,
            }));
        }
        Ok(result)
    }

    /// Stream `candidate` through a fresh `command` process without comparing
    pub fn transform(
        &self,
        candidate: &[u8],
        command: &CommandSpec,
    ) -> Result<TransferResult, VerifyError> {
        self.run(command, &TransferRequest::new(candidate))
            .map(|(result, _)| result)
    }

    /// One launch and transfer; also returns the captured stderr excerpt
    fn run(
        &self,
        command: &CommandSpec,
        request: &TransferRequest<'_>,
    ) -> Result<(TransferResult, Option<String>), VerifyError> {
        let mut process = self.launcher.launch(command)?;
        let transferred = self.engine.transfer(&mut process, request);

        // Reap before looking at the transfer outcome so no process outlives a failure.
        let stderr = match process.close() {
            Ok(exit) => {
                let stderr = stderr_excerpt(&exit);
                if !exit.success() {
                    warn!(
                        command = %command,
                        code = ?exit.code,
                        stderr = stderr.as_deref().unwrap_or(""),
                        "transform exited unsuccessfully"
                    );
                }
                stderr
            }
            Err(e) => {
                warn!(command = %command, error = %e, "failed to reap transform process");
                None
            }
        };

        Ok((transferred?, stderr))
    }

    fn mismatch(&self, report: MismatchReport) -> VerifyError {
        self.mismatches.fetch_add(1, Ordering::SeqCst);
        match self.policy {
            MismatchPolicy::Abort => abort_on_mismatch(&report),
            MismatchPolicy::Report => {
                error!(
                    stage = %report.stage,
                    expected = %report.expected,
                    actual = %report.actual,
                    input_len = report.input_len,
                    output_len = report.output_len,
                    stderr = report.stderr.as_deref().unwrap_or(""),
                    "digest mismatch"
                );
                VerifyError::DigestMismatch(report)
            }
        }
    }
}

impl<L: fmt::Debug> fmt::Debug for RoundTripVerifier<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundTripVerifier")
            .field("launcher", &self.launcher)
            .field("engine", &self.engine)
            .field("policy", &self.policy)
            .field("mismatches", &self.mismatches)
            .finish()
    }
}

/// Lossy, trimmed and truncated view of captured stderr; `None` when
/// nothing was captured or the child wrote nothing
fn stderr_excerpt(exit: &ProcessExit) -> Option<String> {
    let text = String::from_utf8_lossy(exit.stderr.as_deref()?);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut excerpt: String = text.chars().take(STDERR_EXCERPT_LEN).collect();
    if text.chars().nth(STDERR_EXCERPT_LEN).is_some() {
        excerpt.push_str("...");
    }
    Some(excerpt)
}

fn abort_on_mismatch(report: &MismatchReport) -> ! {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{report}");
    let _ = stderr.flush();
    std::process::abort()
}
