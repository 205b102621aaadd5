//! # Poll Loop Controller
//!
//! Runs one bounded generation of a stream:
//!
//! ```text
//! COLD_START -> RUN_CYCLE -> RUN_CYCLE -> ... -> HANDOFF
//! ```
//!
//! - **COLD_START**: takes the stream lease under a fresh owner token (a
//!   continuation takes it over from the owner named in its checkpoint), adopts the checkpoint cache if
//!   the trigger carried one (otherwise the first successful cycle is a
//!   forced resync), and resolves the partitions to poll.
//! - **RUN_CYCLE**: fetch, diff against the cache, broadcast non-empty
//!   deltas, persist changed partitions, replace the cache, pause. Repeats
//!   while the budget has more than the safety margin left. A failed fetch
//!   abandons the cycle and leaves the cache untouched.
//! - **HANDOFF**: shortens the lease to the grace period and emits a
//!   checkpoint carrying the cache and this generation's lease owner.
//!   When emission fails the lease is released so the watchdog can restart
//!   the stream on its next tick.
//!
//! All state lives in the [`Generation`] value; nothing is process-global.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::connections::state_store::{StateStore, StoreError};
use crate::core::budget::ExecutionBudget;
use crate::core::continuation::{Checkpoint, ContinuationSink, HandoffError, Trigger};
use crate::core::dispatcher::Broadcaster;
use crate::core::domain::StreamDomain;
use crate::core::fetcher::SnapshotFetcher;
use crate::core::settings::{EngineSettings, SettingsError};
use crate::core::snapshot::Snapshot;
use crate::retrieve::upstream_http::{UpstreamClient, UpstreamError};

/// Store partition holding the durable listing per resource partition.
pub const CACHE_PARTITION: &str = "cache";
/// Store partition holding the generation lease.
pub const LEASE_PARTITION: &str = "lease";
/// Store partition holding resolved configuration.
pub const CONFIG_PARTITION: &str = "config";
/// Key of the discovered partition list inside [`CONFIG_PARTITION`].
pub const PARTITIONS_KEY: &str = "partitions";

/// Errors that end a generation before or during cold start.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Another generation of the stream holds the lease.
    #[error("A generation of '{stream}' is already running")]
    GenerationAlreadyRunning {
        /// Stream whose lease is taken.
        stream: String,
    },

    /// Required configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings failed validation.
    #[error("Invalid engine settings: {0}")]
    Settings(#[from] SettingsError),

    /// The state store failed outside a cycle.
    #[error("State store failure: {0}")]
    Store(#[from] StoreError),

    /// Partition discovery failed.
    #[error("Upstream failure: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Collaborators shared by every generation of one stream.
pub struct StreamContext<D: StreamDomain> {
    /// Entity-specific fetch and diff behaviour.
    pub domain: Arc<D>,
    /// Shared upstream client.
    pub client: Arc<UpstreamClient>,
    /// Durable state of the stream.
    pub store: Arc<dyn StateStore>,
    /// Fan-out to the stream's subscribers.
    pub broadcaster: Broadcaster,
    /// Where checkpoints go at hand-off.
    pub continuation: Arc<dyn ContinuationSink>,
    /// Settings cloned into each generation at start.
    pub settings: EngineSettings,
    /// Process shutdown; checked between cycles only.
    pub shutdown: CancellationToken,
}

/// Phase of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    /// Taking the lease and loading the cache.
    ColdStart,
    /// Inside the poll loop.
    RunCycle,
    /// Passing control to the successor.
    Handoff,
    /// Done; nothing else happens in this generation.
    Finished,
}

/// Summary of a finished generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Stream name.
    pub stream: String,
    /// Sequence number within the continuation chain.
    pub generation: u64,
    /// Cycles whose snapshot replaced the cache.
    pub cycles: u32,
    /// Cycles abandoned after a fetch failure.
    pub failed_cycles: u32,
    /// Cycles that broadcast a delta.
    pub broadcasts: u32,
    /// Connections pruned as gone by this generation's broadcasts.
    pub pruned_connections: usize,
    /// Whether a checkpoint was emitted to a successor.
    pub handed_off: bool,
}

/// One bounded run of the poll loop.
pub struct Generation<D: StreamDomain> {
    ctx: Arc<StreamContext<D>>,
    settings: EngineSettings,
    fetcher: SnapshotFetcher<D>,
    budget: ExecutionBudget,
    lease_owner: String,
    cache: Option<Snapshot<D::Listing>>,
    forced_resync: bool,
    partitions: Vec<String>,
    state: GenerationState,
    report: GenerationReport,
}

impl<D: StreamDomain> Generation<D> {
    /// Runs a full generation for `trigger` and reports what it did.
    ///
    /// # Errors
    /// Fails without polling when the settings are invalid, the lease is held
    /// by another generation, or no partitions can be resolved.
    pub async fn run(
        ctx: Arc<StreamContext<D>>,
        trigger: Trigger<D::Listing>,
    ) -> Result<GenerationReport, EngineError> {
        let settings = ctx.settings.clone();
        settings.validate()?;
        let budget = ExecutionBudget::start(settings.execution_budget);

        let lease_owner = uuid::Uuid::new_v4().to_string();
        let (number, predecessor, cache) = match trigger {
            Trigger::Watchdog => (1, None, None),
            Trigger::Continuation(checkpoint) => {
                if checkpoint.stream != settings.stream {
                    return Err(EngineError::Config(format!(
                        "checkpoint of stream '{}' delivered to '{}'",
                        checkpoint.stream, settings.stream
                    )));
                }
                (
                    checkpoint.generation + 1,
                    Some(checkpoint.lease_owner),
                    checkpoint.cache,
                )
            }
        };

        let acquired = Self::claim_lease(&ctx, &settings, predecessor.as_deref(), &lease_owner).await?;
        if !acquired {
            log::info!(
                "[{}] Lease held by another generation. Generation {} rejected.",
                settings.stream,
                number
            );
            return Err(EngineError::GenerationAlreadyRunning {
                stream: settings.stream,
            });
        }

        let mut generation = Generation {
            fetcher: SnapshotFetcher::new(ctx.domain.clone(), ctx.client.clone()),
            forced_resync: cache.is_none(),
            report: GenerationReport {
                stream: settings.stream.clone(),
                generation: number,
                ..Default::default()
            },
            ctx,
            settings,
            budget,
            lease_owner,
            cache,
            partitions: Vec::new(),
            state: GenerationState::ColdStart,
        };

        if let Err(e) = generation.cold_start().await {
            log::error!("[{}] Cold start failed: {}", generation.settings.stream, e);
            generation.release_lease().await;
            return Err(e);
        }

        generation.poll_loop().await;
        if generation.state == GenerationState::Handoff {
            generation.handoff().await;
        }
        generation.transition(GenerationState::Finished);
        Ok(generation.report)
    }

    /// Takes the stream lease under a fresh owner token.
    ///
    /// A continuation first tries to take the lease over from the owner named
    /// in its checkpoint. The takeover is a compare-and-swap, so a checkpoint
    /// delivered twice starts at most one successor. When the predecessor's
    /// lease is already gone, the lease is acquired like a watchdog start.
    async fn claim_lease(
        ctx: &StreamContext<D>,
        settings: &EngineSettings,
        predecessor: Option<&str>,
        owner: &str,
    ) -> Result<bool, EngineError> {
        let ttl = settings.lease_ttl();
        if let Some(previous) = predecessor {
            if ctx
                .store
                .transfer_lease(LEASE_PARTITION, &settings.stream, previous, owner, ttl)
                .await?
            {
                return Ok(true);
            }
        }
        Ok(ctx
            .store
            .try_acquire_lease(LEASE_PARTITION, &settings.stream, owner, ttl)
            .await?)
    }

    fn transition(&mut self, next: GenerationState) {
        log::debug!(
            "[{}#{}] {:?} -> {:?}",
            self.settings.stream,
            self.report.generation,
            self.state,
            next
        );
        self.state = next;
    }

    async fn cold_start(&mut self) -> Result<(), EngineError> {
        match &self.cache {
            Some(cache) => log::info!(
                "[{}#{}] Resuming from checkpoint with {} partitions",
                self.settings.stream,
                self.report.generation,
                cache.len()
            ),
            None => log::info!(
                "[{}#{}] Cold start without cache. First cycle is a forced resync.",
                self.settings.stream,
                self.report.generation
            ),
        }
        self.partitions = self.resolve_partitions().await?;
        self.transition(GenerationState::RunCycle);
        Ok(())
    }

    /// Configured list, then the stored list, then upstream discovery.
    async fn resolve_partitions(&self) -> Result<Vec<String>, EngineError> {
        if !self.settings.partitions.is_empty() {
            return Ok(self.settings.partitions.clone());
        }

        let stored = self.ctx.store.query_by_partition(CONFIG_PARTITION).await?;
        if let Some((_, value)) = stored.into_iter().find(|(key, _)| key == PARTITIONS_KEY) {
            let partitions: Vec<String> = serde_json::from_value(value).map_err(StoreError::from)?;
            if !partitions.is_empty() {
                return Ok(partitions);
            }
        }

        match self.ctx.domain.discover_partitions(&self.ctx.client).await? {
            Some(partitions) if !partitions.is_empty() => {
                log::info!(
                    "[{}] Discovered {} partitions",
                    self.settings.stream,
                    partitions.len()
                );
                let value = serde_json::to_value(&partitions).map_err(StoreError::from)?;
                self.ctx.store.put(CONFIG_PARTITION, PARTITIONS_KEY, value).await?;
                Ok(partitions)
            }
            _ => Err(EngineError::Config(format!(
                "no partitions configured or discoverable for stream '{}'",
                self.settings.stream
            ))),
        }
    }

    async fn poll_loop(&mut self) {
        while self.budget.has_more_than(self.settings.safety_margin) {
            self.run_cycle().await;

            tokio::select! {
                biased;

                _ = self.ctx.shutdown.cancelled() => {
                    log::info!("[{}#{}] Shutdown requested. Leaving the poll loop.", self.settings.stream, self.report.generation);
                    self.release_lease().await;
                    return;
                }
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }
        log::info!(
            "[{}#{}] {:?} left of the budget after {} cycles. Handing off.",
            self.settings.stream,
            self.report.generation,
            self.budget.remaining(),
            self.report.cycles
        );
        self.transition(GenerationState::Handoff);
    }

    async fn run_cycle(&mut self) {
        let current = match self.fetcher.fetch_snapshot(&self.partitions).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.report.failed_cycles += 1;
                log::warn!(
                    "[{}#{}] Cycle abandoned: {}",
                    self.settings.stream,
                    self.report.generation,
                    e
                );
                return;
            }
        };

        let changes = match &self.cache {
            Some(previous) => self.ctx.domain.diff(previous, &current),
            None => Default::default(),
        };

        if let Some(delta) = &changes.delta {
            match self.ctx.broadcaster.broadcast(delta).await {
                Ok(outcome) => {
                    self.report.broadcasts += 1;
                    self.report.pruned_connections += outcome.pruned;
                }
                Err(e) => log::warn!("[{}] Broadcast failed: {}", self.settings.stream, e),
            }
        }

        let to_persist: Vec<&String> = if self.forced_resync {
            current.partition_keys().collect()
        } else {
            changes
                .changed_partitions
                .iter()
                .filter(|p| current.contains(p))
                .collect()
        };
        match self.persist(&current, &to_persist).await {
            Ok(()) => {
                if self.forced_resync {
                    log::info!(
                        "[{}#{}] Forced resync persisted {} partitions",
                        self.settings.stream,
                        self.report.generation,
                        to_persist.len()
                    );
                }
                self.forced_resync = false;
            }
            Err(e) => log::warn!("[{}] Persisting cache failed: {}", self.settings.stream, e),
        }

        self.cache = Some(current);
        self.report.cycles += 1;
    }

    async fn persist(
        &self,
        snapshot: &Snapshot<D::Listing>,
        partitions: &[&String],
    ) -> Result<(), StoreError> {
        for partition in partitions {
            if let Some(listing) = snapshot.get(partition) {
                let value = serde_json::to_value(listing)?;
                self.ctx.store.put(CACHE_PARTITION, partition, value).await?;
            }
        }
        Ok(())
    }

    async fn handoff(&mut self) {
        // The successor gets the grace period to claim the lease.
        match self
            .ctx
            .store
            .try_acquire_lease(
                LEASE_PARTITION,
                &self.settings.stream,
                &self.lease_owner,
                self.settings.lease_grace,
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => log::warn!(
                "[{}#{}] Lease was taken over before hand-off",
                self.settings.stream,
                self.report.generation
            ),
            Err(e) => log::warn!("[{}] Could not shorten lease: {}", self.settings.stream, e),
        }

        let checkpoint = Checkpoint {
            stream: self.settings.stream.clone(),
            generation: self.report.generation,
            lease_owner: self.lease_owner.clone(),
            cache: self.cache.take(),
        };
        match self.emit(&checkpoint).await {
            Ok(()) => {
                self.report.handed_off = true;
                log::info!(
                    "[{}#{}] Checkpoint emitted to the next generation",
                    self.settings.stream,
                    self.report.generation
                );
            }
            Err(e) => {
                log::error!(
                    "[{}#{}] Hand-off failed, the watchdog will restart the stream: {}",
                    self.settings.stream,
                    self.report.generation,
                    e
                );
                self.release_lease().await;
            }
        }
    }

    async fn emit(&self, checkpoint: &Checkpoint<D::Listing>) -> Result<(), HandoffError> {
        let payload = checkpoint.encode()?;
        self.ctx.continuation.emit(payload).await
    }

    async fn release_lease(&self) {
        if let Err(e) = self
            .ctx
            .store
            .release_lease(LEASE_PARTITION, &self.settings.stream, &self.lease_owner)
            .await
        {
            log::warn!("[{}] Failed to release lease: {}", self.settings.stream, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::{settings, Harness, ScriptedDomain};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn listing(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn checkpoint(cache: Option<Snapshot<Vec<String>>>) -> Checkpoint<Vec<String>> {
        Checkpoint {
            stream: "scripted".into(),
            generation: 3,
            lease_owner: "previous-owner".into(),
            cache,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_equal_to_first_fetch_produces_no_events() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A", "B"])])]),
            settings(&["OE"]),
        );
        harness.registry.register("ws-1").await.unwrap();

        let mut cache = Snapshot::new();
        cache.insert("OE", listing(&["A", "B"]));
        let report = Generation::run(
            harness.context.clone(),
            Trigger::Continuation(checkpoint(Some(cache))),
        )
        .await
        .unwrap();

        assert_eq!(report.generation, 4);
        assert!(report.cycles > 0);
        assert_eq!(report.broadcasts, 0);
        assert!(harness.channel.payloads().is_empty());
        // Adopted cache means no forced resync.
        assert!(harness.store.query_by_partition(CACHE_PARTITION).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_persists_every_partition_without_broadcasting() {
        let harness = Harness::new(
            ScriptedDomain::new(&[
                ("OE", vec![Some(vec!["A"])]),
                ("XV", vec![Some(vec!["B", "C"])]),
            ]),
            settings(&["OE", "XV"]),
        );
        harness.registry.register("ws-1").await.unwrap();

        let report = Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap();

        let stored = harness.store.query_by_partition(CACHE_PARTITION).await.unwrap();
        assert_eq!(
            stored,
            vec![
                ("OE".to_string(), serde_json::json!(["A"])),
                ("XV".to_string(), serde_json::json!(["B", "C"])),
            ]
        );
        assert_eq!(report.broadcasts, 0);
        assert!(harness.channel.payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_keeps_the_cache_for_the_next_diff() {
        let harness = Harness::new(
            ScriptedDomain::new(&[(
                "OE",
                vec![Some(vec!["A", "B"]), None, Some(vec!["B", "C"])],
            )]),
            settings(&["OE"]),
        );
        harness.registry.register("ws-1").await.unwrap();
        harness.registry.register("ws-2").await.unwrap();

        let report = Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap();

        assert_eq!(report.failed_cycles, 1);
        assert_eq!(report.broadcasts, 1);
        let payloads = harness.channel.payloads();
        assert_eq!(payloads.len(), 2);
        for payload in payloads {
            assert_eq!(payload, serde_json::json!(["+C", "-A"]));
        }
        let stored = harness.store.query_by_partition(CACHE_PARTITION).await.unwrap();
        assert_eq!(stored, vec![("OE".to_string(), serde_json::json!(["B", "C"]))]);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_stops_at_the_safety_margin_and_hands_off_the_cache() {
        let mut harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"]), Some(vec!["A", "Z"])])]),
            settings(&["OE"]),
        );

        let started = tokio::time::Instant::now();
        let report = Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap();

        // 10s budget, 1s margin, 1s pause: cycles at t = 0..=8.
        assert_eq!(report.cycles, 9);
        assert_eq!(started.elapsed(), Duration::from_secs(9));
        assert!(report.handed_off);

        let payload = harness.continuations.recv().await.unwrap();
        let next: Checkpoint<Vec<String>> = Checkpoint::decode(&payload).unwrap();
        assert_eq!(next.generation, 1);
        assert_eq!(next.cache.unwrap().get("OE").unwrap(), &listing(&["A", "Z"]));

        // The lease now belongs to the successor.
        let store = &harness.context.store;
        assert!(!store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "intruder", Duration::from_secs(1))
            .await
            .unwrap());
        assert!(store
            .try_acquire_lease(LEASE_PARTITION, "scripted", &next.lease_owner, Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn generation_is_rejected_while_the_lease_is_held() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]),
            settings(&["OE"]),
        );
        harness
            .store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "live-generation", Duration::from_secs(60))
            .await
            .unwrap();

        let err = Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::GenerationAlreadyRunning { .. }));
        assert_eq!(harness.domain.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_inherits_the_predecessor_lease() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]),
            settings(&["OE"]),
        );
        harness
            .store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "previous-owner", Duration::from_secs(5))
            .await
            .unwrap();

        let report = Generation::run(harness.context.clone(), Trigger::Continuation(checkpoint(None)))
            .await
            .unwrap();
        assert!(report.cycles > 0);
        // The successor holds the lease under its own token.
        assert!(!harness
            .store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "previous-owner", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_delivered_twice_starts_one_successor() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]),
            settings(&["OE"]),
        );
        harness
            .store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "previous-owner", Duration::from_secs(5))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            Generation::run(harness.context.clone(), Trigger::Continuation(checkpoint(None))),
            Generation::run(harness.context.clone(), Trigger::Continuation(checkpoint(None))),
        );

        let (winner, loser) = match (first, second) {
            (Ok(report), Err(err)) | (Err(err), Ok(report)) => (report, err),
            (first, second) => panic!("expected exactly one successor, got {first:?} and {second:?}"),
        };
        assert!(matches!(loser, EngineError::GenerationAlreadyRunning { .. }));
        assert_eq!(winner.generation, 4);
        assert_eq!(
            harness.domain.fetches.load(Ordering::SeqCst),
            winner.cycles as usize + winner.failed_cycles as usize
        );
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_after_an_expired_lease_acquires_it_afresh() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]),
            settings(&["OE"]),
        );

        let report = Generation::run(harness.context.clone(), Trigger::Continuation(checkpoint(None)))
            .await
            .unwrap();
        assert!(report.cycles > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_handoff_releases_the_lease() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]),
            settings(&["OE"]),
        );
        let Harness {
            context,
            continuations,
            store,
            ..
        } = harness;
        drop(continuations);

        let report = Generation::run(context, Trigger::Watchdog).await.unwrap();
        assert!(!report.handed_off);
        assert!(store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "watchdog", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn discovered_partitions_are_persisted() {
        let harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]).with_discovery(&["OE"]),
            settings(&[]),
        );

        Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap();

        let stored = harness.store.query_by_partition(CONFIG_PARTITION).await.unwrap();
        assert_eq!(stored, vec![(PARTITIONS_KEY.to_string(), serde_json::json!(["OE"]))]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_partitions_abort_the_generation_and_free_the_lease() {
        let harness = Harness::new(ScriptedDomain::new(&[]), settings(&[]));

        let err = Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(harness
            .store
            .try_acquire_lease(LEASE_PARTITION, "scripted", "next", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_between_cycles_ends_without_handoff() {
        let mut harness = Harness::new(
            ScriptedDomain::new(&[("OE", vec![Some(vec!["A"])])]),
            settings(&["OE"]),
        );
        harness.context.shutdown.cancel();

        let report = Generation::run(harness.context.clone(), Trigger::Watchdog)
            .await
            .unwrap();
        assert_eq!(report.cycles, 1);
        assert!(!report.handed_off);
        assert!(harness.continuations.try_recv().is_err());
    }
}
