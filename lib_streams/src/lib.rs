//! # lib_streams
//!
//! Resumable poll-diff-broadcast engine. A stream repeatedly polls the
//! upstream game API, diffs what it sees against the previous cycle, and
//! pushes only the deltas to its subscribed connections. Each run of the
//! poll loop is bounded; it hands its cache to a successor before its budget
//! runs out, and a watchdog restarts the stream whenever that chain breaks.

// Declare the modules to re-export
pub mod connections; // Durable state store and its backends
pub mod core;        // Engine: fetch, diff, broadcast, generations
pub mod ingestors;   // Flight plan and marketplace streams
pub mod markets;     // Upstream API models and calls
pub mod retrieve;    // Upstream HTTP client with retries
