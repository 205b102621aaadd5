//! # Watchdog and Supervisor
//!
//! Hosts the generations of one stream. Two things start a generation:
//!
//! - the **watchdog**, a fixed-interval tick that fires unconditionally and
//!   whose generation is rejected by the lease while another one is alive;
//! - a **continuation**, the checkpoint a finishing generation emitted.
//!
//! Each generation runs as its own task under a hard wall-clock limit of
//! budget plus lease grace. A generation exceeding it is dropped mid-flight,
//! exactly like a host killing the execution, and the watchdog recovers the
//! stream once the lease expires.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{error::Elapsed, interval, timeout, MissedTickBehavior};

use crate::core::continuation::{Checkpoint, Trigger};
use crate::core::domain::StreamDomain;
use crate::core::generation::{EngineError, Generation, GenerationReport, StreamContext};

type GenerationOutcome = Result<Result<GenerationReport, EngineError>, Elapsed>;

/// Counters of a supervisor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorSummary {
    /// Generations that ran to completion.
    pub completed: u64,
    /// Triggers rejected because a generation held the lease.
    pub rejected: u64,
    /// Generations that ended with an error or panicked.
    pub failed: u64,
    /// Generations killed at the hard limit.
    pub timed_out: u64,
    /// Successful cycles across all completed generations.
    pub cycles: u64,
    /// Sequence number of the most recently completed generation.
    pub last_generation: u64,
}

/// Watchdog and continuation receiver of one stream.
pub struct Supervisor<D: StreamDomain> {
    ctx: Arc<StreamContext<D>>,
    continuations: mpsc::UnboundedReceiver<Bytes>,
    summary: SupervisorSummary,
}

impl<D: StreamDomain> Supervisor<D> {
    /// Creates a supervisor reading checkpoints from `continuations`.
    pub fn new(ctx: Arc<StreamContext<D>>, continuations: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            ctx,
            continuations,
            summary: SupervisorSummary::default(),
        }
    }

    /// Runs until the context's shutdown token is cancelled.
    ///
    /// The first watchdog tick fires immediately. On shutdown no new
    /// generation starts and running ones are awaited; they stop at their
    /// next pause.
    pub async fn run(mut self) -> SupervisorSummary {
        let stream = self.ctx.settings.stream.clone();
        let mut watchdog = interval(self.ctx.settings.watchdog_interval);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks: JoinSet<GenerationOutcome> = JoinSet::new();

        log::info!(
            "[{}] Supervisor started. Watchdog every {:?}.",
            stream,
            self.ctx.settings.watchdog_interval
        );

        loop {
            tokio::select! {
                biased;

                _ = self.ctx.shutdown.cancelled() => {
                    log::info!("[{}] Shutdown requested. Waiting for {} generation(s).", stream, tasks.len());
                    break;
                }
                Some(payload) = self.continuations.recv() => {
                    match Checkpoint::<D::Listing>::decode(&payload) {
                        Ok(checkpoint) => {
                            log::info!("[{}] Continuation of generation {} received", stream, checkpoint.generation);
                            self.spawn(&mut tasks, Trigger::Continuation(checkpoint));
                        }
                        Err(e) => log::error!("[{}] Dropping undecodable checkpoint: {}", stream, e),
                    }
                }
                Some(joined) = tasks.join_next() => self.record(joined),
                _ = watchdog.tick() => {
                    log::debug!("[{}] Watchdog tick", stream);
                    self.spawn(&mut tasks, Trigger::Watchdog);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            self.record(joined);
        }
        log::info!("[{}] Supervisor stopped: {:?}", stream, self.summary);
        self.summary
    }

    fn spawn(&self, tasks: &mut JoinSet<GenerationOutcome>, trigger: Trigger<D::Listing>) {
        let ctx = self.ctx.clone();
        let hard_limit = ctx.settings.lease_ttl();
        tasks.spawn(async move { timeout(hard_limit, Generation::run(ctx, trigger)).await });
    }

    fn record(&mut self, joined: Result<GenerationOutcome, JoinError>) {
        let stream = &self.ctx.settings.stream;
        match joined {
            Ok(Ok(Ok(report))) => {
                log::info!(
                    "[{}#{}] Generation finished: {} cycles, {} failed, {} broadcasts, {} pruned, handed off: {}",
                    stream,
                    report.generation,
                    report.cycles,
                    report.failed_cycles,
                    report.broadcasts,
                    report.pruned_connections,
                    report.handed_off
                );
                self.summary.completed += 1;
                self.summary.cycles += u64::from(report.cycles);
                self.summary.last_generation = report.generation;
            }
            Ok(Ok(Err(EngineError::GenerationAlreadyRunning { .. }))) => {
                self.summary.rejected += 1;
            }
            Ok(Ok(Err(e))) => {
                log::error!("[{}] Generation failed: {}", stream, e);
                self.summary.failed += 1;
            }
            Ok(Err(_)) => {
                log::error!("[{}] Generation killed at the hard time limit", stream);
                self.summary.timed_out += 1;
            }
            Err(e) => {
                log::error!("[{}] Generation task crashed: {}", stream, e);
                self.summary.failed += 1;
            }
        }
    }
}
