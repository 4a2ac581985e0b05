//! Subprocess Handles
//!
//! A transform process is consumed only as "bytes in, transformed bytes out".
//! [`SubprocessHandle`] exposes its input and output as independently owned
//! halves so a writer task and a reader task can drive them concurrently.
//!
//! Two implementations:
//! - [`OsProcess`]: a real child process with piped stdin/stdout
//! - [`LoopbackProcess`]: an in-memory pipe pair with bounded buffers and a
//!   per-chunk transform, for deterministic tests without real processes
//!
//! Every handle is closed and reaped on every exit path: `close()` on the
//! happy path, `Drop` otherwise.

use crate::error::PipeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Program and argument vector for one transform invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    /// Command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Copy of this command with one extra trailing flag
    pub fn with_flag(&self, flag: &str) -> Self {
        self.clone().arg(flag)
    }

    /// Program path or name
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments after the program
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Whether `flag` appears among the arguments
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What to do with a child's stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StderrMode {
    /// Share the harness stderr (default)
    #[default]
    Inherit,
    /// Discard
    Null,
    /// Drain on a background thread and return it from `close()`
    Capture,
}

/// Outcome of closing a subprocess
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    /// Captured stderr, when requested
    pub stderr: Option<Vec<u8>>,
}

impl ProcessExit {
    /// Whether the process exited with status zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// One spawned transform process.
///
/// The input and output halves can each be taken once; dropping the input
/// signals end-of-data to the process.
pub trait SubprocessHandle: Send {
    /// Writable half connected to the process input
    type Input: Write + Send;
    /// Readable half connected to the process output
    type Output: Read + Send;

    /// Take the input half (`None` if already taken)
    fn take_input(&mut self) -> Option<Self::Input>;

    /// Take the output half (`None` if already taken)
    fn take_output(&mut self) -> Option<Self::Output>;

    /// OS process id, when the handle is backed by a real process
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Close any remaining streams and reap the process
    fn close(self) -> Result<ProcessExit, PipeError>
    where
        Self: Sized;
}

/// Factory for subprocess handles, shared by all workers of a run
pub trait Launcher: Send + Sync {
    /// Handle type produced by this launcher
    type Process: SubprocessHandle;

    /// Spawn a fresh process for `command`
    fn launch(&self, command: &CommandSpec) -> Result<Self::Process, PipeError>;
}

// ─── OS processes ────────────────────────────────────────────────────────────

/// Launches real child processes with piped stdin/stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLauncher {
    stderr: StderrMode,
}

impl OsLauncher {
    /// Launcher inheriting the harness stderr
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose how child stderr is handled
    pub fn with_stderr(mut self, stderr: StderrMode) -> Self {
        self.stderr = stderr;
        self
    }
}

impl Launcher for OsLauncher {
    type Process = OsProcess;

    fn launch(&self, command: &CommandSpec) -> Result<OsProcess, PipeError> {
        OsProcess::spawn(command, self.stderr)
    }
}

/// Real child process
pub struct OsProcess {
    child: Child,
    stderr_drain: Option<JoinHandle<Vec<u8>>>,
    reaped: bool,
}

impl OsProcess {
    /// Spawn `command` with fresh stdin/stdout pipes
    pub fn spawn(command: &CommandSpec, stderr: StderrMode) -> Result<Self, PipeError> {
        let stderr_cfg = match stderr {
            StderrMode::Inherit => Stdio::inherit(),
            StderrMode::Null => Stdio::null(),
            StderrMode::Capture => Stdio::piped(),
        };

        let child = Command::new(command.program())
            .args(command.arguments())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr_cfg)
            .spawn()
            .map_err(|source| PipeError::Spawn {
                program: command.program().to_string(),
                source,
            })?;

        debug!(pid = child.id(), command = %command, "spawned transform process");

        let mut process = Self {
            child,
            stderr_drain: None,
            reaped: false,
        };

        // An undrained stderr pipe can block the child, so drain it concurrently.
        if let Some(mut err) = process.child.stderr.take() {
            let drain = thread::Builder::new()
                .name("fluxpipe-stderr".to_string())
                .spawn(move || {
                    let mut buf = Vec::new();
                    let _ = err.read_to_end(&mut buf);
                    buf
                })?;
            process.stderr_drain = Some(drain);
        }

        Ok(process)
    }
}

impl SubprocessHandle for OsProcess {
    type Input = ChildStdin;
    type Output = ChildStdout;

    fn take_input(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    fn take_output(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn close(mut self) -> Result<ProcessExit, PipeError> {
        drop(self.child.stdin.take());
        drop(self.child.stdout.take());

        let status = self.child.wait()?;
        self.reaped = true;

        let stderr = match self.stderr_drain.take() {
            Some(drain) => drain.join().ok(),
            None => None,
        };

        debug!(pid = self.child.id(), ?status, "transform process exited");
        Ok(ProcessExit {
            code: status.code(),
            stderr,
        })
    }
}

impl Drop for OsProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        drop(self.child.stdin.take());
        drop(self.child.stdout.take());
        if matches!(self.child.try_wait(), Ok(None)) {
            warn!(pid = self.child.id(), "killing transform process still running at drop");
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
        if let Some(drain) = self.stderr_drain.take() {
            let _ = drain.join();
        }
    }
}

// ─── Loopback processes ──────────────────────────────────────────────────────

/// Per-chunk transform applied by a loopback process.
///
/// Receives each chunk as written by the harness; may rewrite it in place,
/// resize it, or sleep to emulate slow transforms.
pub type ChunkTransform = Box<dyn FnMut(&mut Vec<u8>) + Send>;

type TransformFactory = Box<dyn Fn(&CommandSpec) -> ChunkTransform + Send + Sync>;

/// Launches in-memory loopback processes.
///
/// The factory picks a transform per command, so a single launcher can act
/// as both encoder and decoder.
pub struct LoopbackLauncher {
    capacity: usize,
    factory: TransformFactory,
}

impl LoopbackLauncher {
    /// Launcher using `factory` to pick the transform for each command
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&CommandSpec) -> ChunkTransform + Send + Sync + 'static,
    {
        Self {
            capacity: crate::LOOPBACK_CAPACITY,
            factory: Box::new(factory),
        }
    }

    /// Launcher whose processes echo their input unchanged
    pub fn echo() -> Self {
        Self::new(|_| Box::new(|_chunk: &mut Vec<u8>| {}))
    }

    /// Number of chunks each direction buffers before blocking the writer
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

impl Launcher for LoopbackLauncher {
    type Process = LoopbackProcess;

    fn launch(&self, command: &CommandSpec) -> Result<LoopbackProcess, PipeError> {
        LoopbackProcess::spawn(self.capacity, (self.factory)(command))
    }
}

impl fmt::Debug for LoopbackLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackLauncher")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// In-memory process: a thread moving chunks from a bounded input channel
/// to a bounded output channel through a [`ChunkTransform`].
pub struct LoopbackProcess {
    input: Option<ChannelWriter>,
    output: Option<ChannelReader>,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackProcess {
    /// Start the loopback thread
    pub fn spawn(capacity: usize, mut transform: ChunkTransform) -> Result<Self, PipeError> {
        let (in_tx, in_rx) = sync_channel::<Vec<u8>>(capacity);
        let (out_tx, out_rx) = sync_channel::<Vec<u8>>(capacity);

        let worker = thread::Builder::new()
            .name("fluxpipe-loopback".to_string())
            .spawn(move || {
                for mut chunk in in_rx {
                    transform(&mut chunk);
                    if chunk.is_empty() {
                        continue;
                    }
                    if out_tx.send(chunk).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            input: Some(ChannelWriter { tx: in_tx }),
            output: Some(ChannelReader {
                rx: out_rx,
                pending: Vec::new(),
                pos: 0,
            }),
            worker: Some(worker),
        })
    }

    fn shutdown(&mut self) -> bool {
        drop(self.input.take());
        drop(self.output.take());
        match self.worker.take() {
            Some(worker) => worker.join().is_ok(),
            None => true,
        }
    }
}

impl SubprocessHandle for LoopbackProcess {
    type Input = ChannelWriter;
    type Output = ChannelReader;

    fn take_input(&mut self) -> Option<ChannelWriter> {
        self.input.take()
    }

    fn take_output(&mut self) -> Option<ChannelReader> {
        self.output.take()
    }

    fn close(mut self) -> Result<ProcessExit, PipeError> {
        let clean = self.shutdown();
        Ok(ProcessExit {
            code: Some(if clean { 0 } else { 101 }),
            stderr: None,
        })
    }
}

impl Drop for LoopbackProcess {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Input half of a loopback process
pub struct ChannelWriter {
    tx: SyncSender<Vec<u8>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Output half of a loopback process
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                // Sender gone: end of stream
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
