//! Parallel Load Runner
//!
//! Runs one test configuration: a pool of workers per round, each worker
//! launching `reps_per_round` fresh transform processes in sequence.
//!
//! Round lifecycle:
//!
//! ```text
//! SPAWNING ──► RUNNING ──► JOINING ──► (next round)
//!    │            │           │
//!    │            │           └─ synchronous: join before the next round
//!    │            │              deferred: join once, after the timer stops
//!    │            └─ spawned workers on the pool, one worker inline
//!    └─ round_started
//! ```
//!
//! The calling thread always runs one worker's share itself, so total
//! concurrency equals the configured worker count.

use fluxpipe_core::{CommandSpec, Launcher, Payload, Timer};
use fluxpipe_logic::{EncodedPayload, RoundTripVerifier, VerifyError};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid test configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Verify(#[from] VerifyError),
}

/// Shape of one measured run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestConfiguration {
    /// Concurrent encode workers per round
    pub parallel_encode_workers: u32,
    /// Concurrent decode workers per round
    pub parallel_decode_workers: u32,
    /// Transform invocations per worker per round
    pub reps_per_round: u32,
    /// Number of rounds
    pub round_count: u32,
    /// Join every round before starting the next
    pub synchronize_every_round: bool,
    /// Compare output digests (off: throughput only)
    pub verify: bool,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            parallel_encode_workers: 1,
            parallel_decode_workers: 1,
            reps_per_round: 1,
            round_count: 1,
            synchronize_every_round: true,
            verify: true,
        }
    }
}

impl TestConfiguration {
    /// Reject configurations that would measure nothing, or whose
    /// invocation count does not fit in a `u32`
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.total_invocations().is_none() {
            return Err(RunnerError::InvalidConfiguration(format!(
                "{} workers x {} reps x {} rounds exceeds {} invocations",
                u64::from(self.parallel_encode_workers) + u64::from(self.parallel_decode_workers),
                self.reps_per_round,
                self.round_count,
                u32::MAX
            )));
        }
        if self.concurrency() == 0 {
            return Err(RunnerError::InvalidConfiguration(
                "at least one encode or decode worker is required".to_string(),
            ));
        }
        if self.reps_per_round == 0 {
            return Err(RunnerError::InvalidConfiguration(
                "reps_per_round must be at least 1".to_string(),
            ));
        }
        if self.round_count == 0 {
            return Err(RunnerError::InvalidConfiguration(
                "round_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Every transform invocation of the run, `None` on overflow.
    ///
    /// Bounds every other product below once [`validate`](Self::validate)
    /// passed.
    pub fn total_invocations(&self) -> Option<u32> {
        self.parallel_encode_workers
            .checked_add(self.parallel_decode_workers)?
            .checked_mul(self.reps_per_round)?
            .checked_mul(self.round_count)
    }

    /// Workers running at once within a round
    pub fn concurrency(&self) -> u32 {
        self.parallel_encode_workers + self.parallel_decode_workers
    }

    /// Operations per iteration: one per role present
    pub fn operation_count(&self) -> u32 {
        u32::from(self.parallel_encode_workers > 0) + u32::from(self.parallel_decode_workers > 0)
    }

    /// Iterations covered by the measured interval
    pub fn iterations(&self) -> u32 {
        self.round_count * self.reps_per_round
    }

    /// Which workers go to the pool and which one runs inline.
    ///
    /// With decode workers present the inline share is a decode, otherwise
    /// an encode.
    pub fn worker_plan(&self) -> WorkerPlan {
        let mut spawned = Vec::with_capacity(self.concurrency() as usize);
        let inline = if self.parallel_decode_workers > 0 {
            spawned.extend((0..self.parallel_encode_workers).map(|_| WorkerRole::Encode));
            spawned.extend((1..self.parallel_decode_workers).map(|_| WorkerRole::Decode));
            WorkerRole::Decode
        } else {
            spawned.extend((1..self.parallel_encode_workers).map(|_| WorkerRole::Encode));
            WorkerRole::Encode
        };
        WorkerPlan { spawned, inline }
    }
}

/// Worker assignment for one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    /// Workers submitted to the pool
    pub spawned: Vec<WorkerRole>,
    /// Worker run on the calling thread
    pub inline: WorkerRole,
}

/// What a worker streams and what it expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Raw payload through the encoder, checked against the encoded digest
    Encode,
    /// Encoded payload through the decoder, checked against the payload digest
    Decode,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Encode => f.write_str("encode"),
            WorkerRole::Decode => f.write_str("decode"),
        }
    }
}

/// Encoder and decoder invocations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformCommands {
    pub encode: CommandSpec,
    pub decode: CommandSpec,
}

impl TransformCommands {
    /// Same program and flags for both directions
    pub fn symmetric(command: CommandSpec) -> Self {
        Self {
            encode: command.clone(),
            decode: command,
        }
    }

    /// Both commands with one extra trailing flag
    pub fn with_flag(&self, flag: &str) -> Self {
        Self {
            encode: self.encode.with_flag(flag),
            decode: self.decode.with_flag(flag),
        }
    }
}

/// Timing of one measured span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundMetric {
    pub elapsed: Duration,
    /// Transform invocations started within the span
    pub operation_count: u32,
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeasurement {
    /// Whole measured interval, first encode excluded
    pub elapsed: Duration,
    /// One entry per round when synchronized, one spanning entry otherwise
    pub rounds: Vec<RoundMetric>,
    /// `round_count * reps_per_round`
    pub iterations: u32,
    /// Operations per iteration
    pub operation_count: u32,
}

/// Hooks into round and worker boundaries
pub trait RunObserver: Send + Sync {
    fn round_started(&self, _round: u32) {}
    fn worker_started(&self, _round: u32, _role: WorkerRole) {}
    fn worker_finished(&self, _round: u32, _role: WorkerRole) {}
}

/// Drives a [`TestConfiguration`] through a [`RoundTripVerifier`]
pub struct ParallelLoadRunner<'a, L> {
    verifier: &'a RoundTripVerifier<L>,
    commands: &'a TransformCommands,
    observer: Option<&'a dyn RunObserver>,
}

/// Data shared by every worker of one run
struct Workload<'a> {
    config: TestConfiguration,
    payload: &'a Payload,
    encoded: &'a EncodedPayload,
    failed: AtomicBool,
}

impl<'a, L: Launcher> ParallelLoadRunner<'a, L> {
    pub fn new(verifier: &'a RoundTripVerifier<L>, commands: &'a TransformCommands) -> Self {
        Self {
            verifier,
            commands,
            observer: None,
        }
    }

    /// Receive round and worker events
    pub fn with_observer(mut self, observer: &'a dyn RunObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// First encode followed by the measured run
    pub fn run_scenario(
        &self,
        config: TestConfiguration,
        payload: &Payload,
    ) -> Result<RunMeasurement, RunnerError> {
        config.validate()?;
        let encoded = self
            .verifier
            .encode_and_capture(payload, &self.commands.encode)?;
        self.run(config, payload, &encoded)
    }

    /// Measured run against an already encoded payload
    pub fn run(
        &self,
        config: TestConfiguration,
        payload: &Payload,
        encoded: &EncodedPayload,
    ) -> Result<RunMeasurement, RunnerError> {
        config.validate()?;
        let plan = config.worker_plan();
        let pool = ThreadPoolBuilder::new()
            .num_threads(plan.spawned.len().max(1))
            .thread_name(|i| format!("fluxpipe-worker-{}", i))
            .build()?;

        let workload = Workload {
            config,
            payload,
            encoded,
            failed: AtomicBool::new(false),
        };
        let (err_tx, err_rx) = mpsc::channel::<VerifyError>();

        debug!(
            encode_workers = config.parallel_encode_workers,
            decode_workers = config.parallel_decode_workers,
            reps = config.reps_per_round,
            rounds = config.round_count,
            synchronized = config.synchronize_every_round,
            "starting run"
        );

        let per_round_ops = config.concurrency() * config.reps_per_round;
        let (elapsed, rounds) = if config.synchronize_every_round {
            let timer = Timer::start();
            let mut rounds = Vec::with_capacity(config.round_count as usize);
            for round in 0..config.round_count {
                let round_timer = Timer::start();
                pool.in_place_scope(|scope| {
                    self.submit_round(scope, round, &plan, &workload, &err_tx);
                });
                rounds.push(RoundMetric {
                    elapsed: round_timer.stop(),
                    operation_count: per_round_ops,
                });
                debug!(round, "round joined");
            }
            (timer.stop(), rounds)
        } else {
            let elapsed = self.run_deferred(&pool, &plan, &workload, &err_tx);
            let span = RoundMetric {
                elapsed,
                operation_count: per_round_ops * config.round_count,
            };
            (elapsed, vec![span])
        };

        drop(err_tx);
        if let Some(first) = err_rx.iter().next() {
            return Err(first.into());
        }

        Ok(RunMeasurement {
            elapsed,
            rounds,
            iterations: config.iterations(),
            operation_count: config.operation_count(),
        })
    }

    /// Submit every round without joining; the timer stops when the inline
    /// share of the last round is done, outstanding pool work joins after.
    fn run_deferred(
        &self,
        pool: &ThreadPool,
        plan: &WorkerPlan,
        workload: &Workload<'_>,
        err_tx: &mpsc::Sender<VerifyError>,
    ) -> Duration {
        pool.in_place_scope(|scope| {
            let timer = Timer::start();
            for round in 0..workload.config.round_count {
                self.submit_round(scope, round, plan, workload, err_tx);
            }
            timer.stop()
        })
    }

    fn submit_round<'scope>(
        &'scope self,
        scope: &rayon::Scope<'scope>,
        round: u32,
        plan: &WorkerPlan,
        workload: &'scope Workload<'scope>,
        err_tx: &mpsc::Sender<VerifyError>,
    ) {
        if let Some(observer) = self.observer {
            observer.round_started(round);
        }
        for &role in &plan.spawned {
            let err_tx = err_tx.clone();
            scope.spawn(move |_| self.work(round, role, workload, &err_tx));
        }
        self.work(round, plan.inline, workload, err_tx);
    }

    fn work(
        &self,
        round: u32,
        role: WorkerRole,
        workload: &Workload<'_>,
        err_tx: &mpsc::Sender<VerifyError>,
    ) {
        if let Some(observer) = self.observer {
            observer.worker_started(round, role);
        }

        let (candidate, expected, command) = match role {
            WorkerRole::Encode => (
                workload.payload.as_bytes(),
                workload.encoded.encoded_digest,
                &self.commands.encode,
            ),
            WorkerRole::Decode => (
                workload.encoded.encoded.as_bytes(),
                workload.encoded.payload_digest,
                &self.commands.decode,
            ),
        };

        for _ in 0..workload.config.reps_per_round {
            // Another worker already failed; the run is lost.
            if workload.failed.load(Ordering::Relaxed) {
                break;
            }
            let outcome = if workload.config.verify {
                self.verifier.check_round_trip(candidate, expected, command)
            } else {
                self.verifier.transform(candidate, command)
            };
            if let Err(e) = outcome {
                workload.failed.store(true, Ordering::Relaxed);
                let _ = err_tx.send(e);
                break;
            }
        }

        if let Some(observer) = self.observer {
            observer.worker_finished(round, role);
        }
    }
}
