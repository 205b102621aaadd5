//! # Diff Engine
//!
//! Pure functions computing the delta between two observations. Nothing in
//! here performs I/O or mutates its inputs; the controller replaces its cache
//! wholesale after each diff.
//!
//! - **`presence`**: which entities appeared or disappeared (flight plans).
//! - **`value`**: which goods changed price at a location (marketplaces).

/// Appeared/disappeared diff by entity identity.
pub mod presence;
/// Price-change diff grouped by location.
pub mod value;

pub use presence::{presence_diff, Identified, Presence, PresenceDiff, PresenceEvent};
pub use value::{value_diff, value_diff_listing, Priced, PricedListing};
