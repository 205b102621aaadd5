//! # SpaceTraders API
//!
//! - **`model`**: response shapes. Unknown fields are kept so broadcasts echo
//!   whatever upstream sent.
//! - **`apicall`**: endpoint paths and the typed calls built on them.

/// Endpoint paths and typed calls.
pub mod apicall;
/// Upstream response models.
pub mod model;

pub use apicall::{get_marketplace, list_flight_plans, list_systems};
pub use model::{FlightPlan, MarketGood, MarketLocation};
