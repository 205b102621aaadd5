//! # Stream Ingestors Module
//!
//! The concrete streams served by the engine. Each one is a `StreamDomain`
//! pairing an upstream endpoint with a diff shape.
//!
//! ## Contained Modules:
//! - **`flight_plans`**: ships launching and landing, found with a presence
//!   diff over every system's flight plans.
//! - **`market`**: buy and sell price changes at tracked marketplaces, found
//!   with a value diff.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Flight plan stream.
pub mod flight_plans;
/// Marketplace stream.
pub mod market;

// --- Public API Re-exports ---
pub use flight_plans::{FlightPlanEvent, FlightPlanEventKind, FlightPlansDomain};
pub use market::{MarketDelta, MarketDomain};
