//! Test doubles shared by the controller and supervisor tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::connections::state_store::{MemoryStore, StateStore};
use crate::core::continuation::ChannelContinuation;
use crate::core::dispatcher::{Broadcaster, DeliveryOutcome, PushChannel};
use crate::core::domain::{ChangeSet, StreamDomain};
use crate::core::generation::StreamContext;
use crate::core::registry::ConnectionRegistry;
use crate::core::settings::EngineSettings;
use crate::core::snapshot::Snapshot;
use crate::retrieve::upstream_http::{RetrySettings, UpstreamClient, UpstreamError};

/// Domain answering each partition from a script of rounds.
///
/// A round of `None` fails that fetch. The last round repeats forever.
#[derive(Default)]
pub struct ScriptedDomain {
    rounds: Mutex<HashMap<String, VecDeque<Option<Vec<String>>>>>,
    discovered: Option<Vec<String>>,
    pub fetches: AtomicUsize,
}

impl ScriptedDomain {
    pub fn new(script: &[(&str, Vec<Option<Vec<&str>>>)]) -> Self {
        let rounds = script
            .iter()
            .map(|(partition, rounds)| {
                let rounds = rounds
                    .iter()
                    .map(|round| {
                        round
                            .as_ref()
                            .map(|ids| ids.iter().map(|id| id.to_string()).collect())
                    })
                    .collect();
                (partition.to_string(), rounds)
            })
            .collect();
        Self {
            rounds: Mutex::new(rounds),
            ..Default::default()
        }
    }

    pub fn with_discovery(mut self, partitions: &[&str]) -> Self {
        self.discovered = Some(partitions.iter().map(|p| p.to_string()).collect());
        self
    }
}

#[async_trait]
impl StreamDomain for ScriptedDomain {
    type Listing = Vec<String>;
    type Delta = Vec<String>;

    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_partition(
        &self,
        _client: &UpstreamClient,
        partition: &str,
    ) -> Result<(String, Vec<String>), UpstreamError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let round = {
            let mut rounds = self.rounds.lock().unwrap();
            let queue = rounds.get_mut(partition).expect("unscripted partition");
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            }
        };
        round
            .map(|ids| (partition.to_string(), ids))
            .ok_or_else(|| UpstreamError::Status {
                status: 503,
                path: partition.to_string(),
                body: None,
            })
    }

    fn entity_ids(&self, listing: &Vec<String>) -> Vec<String> {
        listing.clone()
    }

    /// Presence-style diff tagging ids with `+` and `-`.
    fn diff(
        &self,
        previous: &Snapshot<Vec<String>>,
        current: &Snapshot<Vec<String>>,
    ) -> ChangeSet<Vec<String>> {
        let mut events = Vec::new();
        let mut changed = BTreeSet::new();
        for (partition, ids) in current.iter() {
            let before = previous.get(partition).cloned().unwrap_or_default();
            for id in ids.iter().filter(|id| !before.contains(id)) {
                events.push(format!("+{id}"));
                changed.insert(partition.clone());
            }
            for id in before.iter().filter(|id| !ids.contains(id)) {
                events.push(format!("-{id}"));
                changed.insert(partition.clone());
            }
        }
        ChangeSet {
            delta: (!events.is_empty()).then_some(events),
            changed_partitions: changed,
        }
    }

    async fn discover_partitions(
        &self,
        _client: &UpstreamClient,
    ) -> Result<Option<Vec<String>>, UpstreamError> {
        Ok(self.discovered.clone())
    }
}

/// Channel recording every delivered payload.
#[derive(Default)]
pub struct RecordingChannel {
    pub received: Mutex<Vec<(String, Bytes)>>,
}

impl RecordingChannel {
    /// Delivered payloads decoded as JSON.
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(_, bytes)| serde_json::from_slice(bytes).unwrap())
            .collect()
    }
}

#[async_trait]
impl PushChannel for RecordingChannel {
    async fn send(&self, connection_id: &str, payload: Bytes) -> DeliveryOutcome {
        self.received
            .lock()
            .unwrap()
            .push((connection_id.to_string(), payload));
        DeliveryOutcome::Delivered
    }
}

pub fn settings(partitions: &[&str]) -> EngineSettings {
    EngineSettings {
        stream: "scripted".into(),
        partitions: partitions.iter().map(|p| p.to_string()).collect(),
        poll_interval: Duration::from_secs(1),
        execution_budget: Duration::from_secs(10),
        safety_margin: Duration::from_secs(1),
        watchdog_interval: Duration::from_secs(60),
        lease_grace: Duration::from_secs(5),
    }
}

/// Everything a test needs to drive and observe one stream.
pub struct Harness {
    pub domain: Arc<ScriptedDomain>,
    pub store: Arc<MemoryStore>,
    pub channel: Arc<RecordingChannel>,
    pub registry: ConnectionRegistry,
    pub continuations: tokio::sync::mpsc::UnboundedReceiver<Bytes>,
    pub context: Arc<StreamContext<ScriptedDomain>>,
}

impl Harness {
    pub fn new(domain: ScriptedDomain, settings: EngineSettings) -> Self {
        let domain = Arc::new(domain);
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let registry = ConnectionRegistry::new(store.clone());
        let (sink, continuations) = ChannelContinuation::channel();
        let client =
            UpstreamClient::new("http://127.0.0.1:9/", None, &RetrySettings::default()).unwrap();
        let context = Arc::new(StreamContext {
            domain: domain.clone(),
            client: Arc::new(client),
            store: store.clone() as Arc<dyn StateStore>,
            broadcaster: Broadcaster::new(registry.clone(), channel.clone()),
            continuation: Arc::new(sink),
            settings,
            shutdown: tokio_util::sync::CancellationToken::new(),
        });
        Self {
            domain,
            store,
            channel,
            registry,
            continuations,
            context,
        }
    }
}
