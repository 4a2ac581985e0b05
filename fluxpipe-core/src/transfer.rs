//! Pipe Transfer Engine
//!
//! Streams a payload into a subprocess while draining its output.
//!
//! OS pipes have bounded buffers: writing the whole input before reading any
//! output deadlocks as soon as the child blocks on a full output pipe. Every
//! transfer therefore runs two tasks:
//!
//! ```text
//!   payload ──► writer thread ──► [input pipe] ──► transform
//!                 (64 KiB blocks,                      │
//!                  input digest)                       ▼
//!   TransferResult ◄── calling thread ◄── [output pipe]
//!                 (output digest, optional capture)
//! ```
//!
//! Backpressure is expressed only through blocking reads and writes. The
//! writer stops silently on any non-interrupt write error; the digests are
//! what reveal lost bytes.

use crate::CHUNK_SIZE;
use crate::digest::{Digest, StreamingDigest};
use crate::error::PipeError;
use crate::process::SubprocessHandle;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// What to stream through a subprocess
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    payload: &'a [u8],
    header_len: usize,
    capture: bool,
}

impl<'a> TransferRequest<'a> {
    /// Stream the whole payload, no header split, no capture
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            header_len: 0,
            capture: false,
        }
    }

    /// Treat the first `header_len` bytes as a separately written header
    pub fn with_header(mut self, header_len: usize) -> Result<Self, PipeError> {
        if header_len > self.payload.len() {
            return Err(PipeError::HeaderOutOfRange {
                header_len,
                payload_len: self.payload.len(),
            });
        }
        self.header_len = header_len;
        Ok(self)
    }

    /// Keep a copy of everything the subprocess emits
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture = capture;
        self
    }

    /// Whole payload
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Leading header bytes
    pub fn header(&self) -> &'a [u8] {
        &self.payload[..self.header_len]
    }

    /// Bytes after the header
    pub fn body(&self) -> &'a [u8] {
        &self.payload[self.header_len..]
    }

    /// Whether output is captured
    pub fn captures(&self) -> bool {
        self.capture
    }
}

/// Outcome of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Digest of the bytes the subprocess accepted on its input
    pub input_digest: Digest,
    /// Digest of everything read from the subprocess output
    pub output_digest: Digest,
    /// Bytes accepted on the input
    pub bytes_written: u64,
    /// Bytes read from the output
    pub bytes_transferred: u64,
    /// Output bytes, when capture was requested
    pub captured_output: Option<Vec<u8>>,
}

/// Moves bytes through a subprocess with one writer and one reader task
#[derive(Debug, Clone, Copy)]
pub struct PipeTransferEngine {
    chunk_size: usize,
    timeout: Option<Duration>,
}

impl PipeTransferEngine {
    /// Engine with 64 KiB blocks and no timeout
    pub fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            timeout: None,
        }
    }

    /// Kill the subprocess if a transfer outlives `timeout` (unix only)
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Override the write/read block size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Configured timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Stream `request` into `process` and drain its output until end-of-data.
    ///
    /// Takes both stream halves from `process`; the caller still owns the
    /// handle and is responsible for closing it.
    pub fn transfer<P: SubprocessHandle>(
        &self,
        process: &mut P,
        request: &TransferRequest<'_>,
    ) -> Result<TransferResult, PipeError> {
        let input = process
            .take_input()
            .ok_or(PipeError::StreamUnavailable("input"))?;
        let output = process
            .take_output()
            .ok_or(PipeError::StreamUnavailable("output"))?;

        if !request.header().is_empty() {
            trace!(header = %hex::encode(request.header()), "streaming payload header");
        }

        let watchdog = match (self.timeout, process.pid()) {
            (Some(timeout), Some(pid)) => Some(Watchdog::arm(pid, timeout)?),
            (Some(_), None) => {
                debug!("subprocess has no pid, transfer timeout not enforced");
                None
            }
            (None, _) => None,
        };

        let chunk_size = self.chunk_size;
        let segments = [request.header(), request.body()];
        let capture_hint = request.captures().then_some(request.payload().len());

        let outcome = thread::scope(|scope| -> Result<(WriterOutcome, DrainOutcome), PipeError> {
            let writer = thread::Builder::new()
                .name("fluxpipe-writer".to_string())
                .spawn_scoped(scope, move || stream_input(input, segments, chunk_size))?;
            let drained = drain_output(output, capture_hint, chunk_size);
            if let Some(watchdog) = &watchdog {
                watchdog.output_finished();
            }
            let written = writer.join().map_err(|_| PipeError::WriterPanicked)?;
            Ok((written?, drained?))
        });

        if let Some(watchdog) = watchdog {
            let timeout = watchdog.timeout;
            if watchdog.disarm() {
                return Err(PipeError::Timeout(timeout));
            }
        }

        let (written, drained) = outcome?;
        if written.bytes < request.payload().len() as u64 {
            debug!(
                written = written.bytes,
                expected = request.payload().len(),
                "subprocess accepted a truncated input"
            );
        }

        Ok(TransferResult {
            input_digest: written.digest,
            output_digest: drained.digest,
            bytes_written: written.bytes,
            bytes_transferred: drained.bytes,
            captured_output: drained.captured,
        })
    }
}

impl Default for PipeTransferEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct WriterOutcome {
    digest: Digest,
    bytes: u64,
}

struct DrainOutcome {
    digest: Digest,
    bytes: u64,
    captured: Option<Vec<u8>>,
}

fn stream_input<W: Write>(
    mut input: W,
    segments: [&[u8]; 2],
    chunk_size: usize,
) -> Result<WriterOutcome, PipeError> {
    let mut digest = StreamingDigest::new();
    let mut written = 0u64;

    'segments: for segment in segments {
        let mut remaining = segment;
        while !remaining.is_empty() {
            let block = &remaining[..remaining.len().min(chunk_size)];
            match input.write(block) {
                Ok(0) => {
                    debug!(written, "subprocess input accepted no bytes, stopping writer");
                    break 'segments;
                }
                Ok(n) => {
                    digest.update(&block[..n])?;
                    written += n as u64;
                    remaining = &remaining[n..];
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, written, "subprocess input closed early, stopping writer");
                    break 'segments;
                }
            }
        }
    }

    // Closing the input is the end-of-data signal.
    drop(input);

    Ok(WriterOutcome {
        digest: digest.finalize()?,
        bytes: written,
    })
}

fn drain_output<R: Read>(
    mut output: R,
    capture_hint: Option<usize>,
    chunk_size: usize,
) -> Result<DrainOutcome, PipeError> {
    let mut digest = StreamingDigest::new();
    let mut captured = capture_hint.map(Vec::with_capacity);
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;

    loop {
        match output.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                digest.update(&buf[..n])?;
                if let Some(captured) = captured.as_mut() {
                    captured.extend_from_slice(&buf[..n]);
                }
                total += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(PipeError::Io(e)),
        }
    }

    Ok(DrainOutcome {
        digest: digest.finalize()?,
        bytes: total,
        captured,
    })
}

const WATCHDOG_ARMED: u8 = 0;
const WATCHDOG_DRAINED: u8 = 1;
const WATCHDOG_FIRED: u8 = 2;

/// Kills a subprocess when a transfer runs past its deadline.
///
/// Disarmed before the process is reaped, so the pid cannot be recycled
/// while the watchdog may still signal it. Once the output reached
/// end-of-data the transfer can no longer time out; the watchdog then only
/// kills a child that keeps the writer blocked for another full timeout.
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    state: Arc<AtomicU8>,
    handle: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl Watchdog {
    fn arm(pid: u32, timeout: Duration) -> Result<Self, PipeError> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let state = Arc::new(AtomicU8::new(WATCHDOG_ARMED));
        let shared = Arc::clone(&state);

        let handle = thread::Builder::new()
            .name("fluxpipe-watchdog".to_string())
            .spawn(move || {
                if !matches!(cancelled.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                    return;
                }
                let claimed = shared.compare_exchange(
                    WATCHDOG_ARMED,
                    WATCHDOG_FIRED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                if claimed.is_ok() {
                    warn!(pid, ?timeout, "transfer timed out, killing transform process");
                    kill_process(pid);
                } else if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(timeout) {
                    warn!(pid, ?timeout, "transform output finished but input stalled, killing it");
                    kill_process(pid);
                }
            })?;

        Ok(Self {
            cancel: Some(cancel),
            state,
            handle: Some(handle),
            timeout,
        })
    }

    /// Output reached end-of-data before the deadline
    fn output_finished(&self) {
        let _ = self.state.compare_exchange(
            WATCHDOG_ARMED,
            WATCHDOG_DRAINED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Stop the watchdog; returns whether the deadline passed before the
    /// output finished
    fn disarm(mut self) -> bool {
        self.stop();
        self.state.load(Ordering::SeqCst) == WATCHDOG_FIRED
    }

    fn stop(&mut self) {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(unix)]
fn kill_process(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if ret == -1 {
        warn!(pid, error = %std::io::Error::last_os_error(), "failed to kill transform process");
    }
}

#[cfg(not(unix))]
fn kill_process(pid: u32) {
    warn!(pid, "transfer timeouts are only enforced on unix");
}
