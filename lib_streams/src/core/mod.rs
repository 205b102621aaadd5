//! # Core Engine Module
//!
//! The resumable poll-diff-broadcast engine. Everything here is generic over
//! a [`StreamDomain`]; the concrete flight plan and marketplace streams live
//! in `crate::ingestors`.
//!
//! ## Core Components:
//!
//! - **`snapshot`** and **`domain`**: the observed state of a stream and the
//!   seam that teaches the engine how to fetch and diff one kind of entity.
//!
//! - **`fetcher`**: concurrent fan-out/fan-in over every partition of a
//!   stream, all-or-nothing per cycle.
//!
//! - **`diff`**: pure presence and value diffs.
//!
//! - **`registry`** and **`dispatcher`**: the subscriber set and the
//!   serialize-once broadcast that prunes connections found to be gone.
//!
//! - **`generation`**: the bounded poll loop with its cold start and
//!   hand-off, guarded by a lease so at most one generation of a stream is
//!   alive.
//!
//! - **`supervisor`**: the watchdog and continuation receiver that keep
//!   generations coming for as long as the process runs.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Execution budget measured on the tokio clock.
pub mod budget;
/// Checkpoints and the continuation sink.
pub mod continuation;
/// Pure diff functions.
pub mod diff;
/// Serialize-once broadcast with stale connection pruning.
pub mod dispatcher;
/// The stream domain seam.
pub mod domain;
/// Concurrent snapshot fetcher.
pub mod fetcher;
/// The poll loop controller.
pub mod generation;
/// Subscriber connection registry.
pub mod registry;
/// Per-stream engine settings.
pub mod settings;
/// Per-partition snapshot of observed state.
pub mod snapshot;
/// Watchdog and generation hosting.
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

// --- Public API Re-exports ---
pub use budget::ExecutionBudget;
pub use continuation::{ChannelContinuation, Checkpoint, ContinuationSink, HandoffError, Trigger};
pub use dispatcher::{BroadcastReport, Broadcaster, DeliveryOutcome, DispatchError, PushChannel};
pub use domain::{ChangeSet, StreamDomain};
pub use fetcher::{FetchError, SnapshotFetcher};
pub use generation::{EngineError, Generation, GenerationReport, GenerationState, StreamContext};
pub use registry::ConnectionRegistry;
pub use settings::{EngineSettings, SettingsError};
pub use snapshot::Snapshot;
pub use supervisor::{Supervisor, SupervisorSummary};
