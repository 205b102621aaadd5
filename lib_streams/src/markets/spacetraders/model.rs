//! Response models of the game API (camelCase JSON).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A ship's flight between two locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightPlan {
    /// Flight plan identity.
    pub id: String,
    /// Ship flying the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_id: Option<String>,
    /// Ship model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_type: Option<String>,
    /// Owner of the ship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Departure location symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub departure: Option<String>,
    /// Destination location symbol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Creation timestamp as sent upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Arrival timestamp as sent upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrives_at: Option<String>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A good traded at a marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketGood {
    /// Good symbol, unique within a location.
    pub symbol: String,
    /// Price paid per unit when buying.
    #[serde(default)]
    pub purchase_price_per_unit: Option<f64>,
    /// Price received per unit when selling.
    #[serde(default)]
    pub sell_price_per_unit: Option<f64>,
    /// Units on offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_available: Option<i64>,
    /// Cargo volume of one unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_per_unit: Option<i64>,
    /// Reference price per unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<f64>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A location and the goods its marketplace lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketLocation {
    /// Location symbol.
    pub symbol: String,
    /// Goods currently listed.
    #[serde(default)]
    pub marketplace: Vec<MarketGood>,
    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET game/systems/{symbol}/flight-plans`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightPlansResponse {
    /// Active flight plans of the system.
    pub flight_plans: Vec<FlightPlan>,
}

/// `GET game/locations/{symbol}/marketplace`
#[derive(Debug, Deserialize)]
pub struct MarketplaceResponse {
    /// The location with its marketplace.
    pub location: MarketLocation,
}

/// One entry of `GET game/systems`.
#[derive(Debug, Deserialize)]
pub struct SystemSummary {
    /// System symbol.
    pub symbol: String,
}

/// `GET game/systems`
#[derive(Debug, Deserialize)]
pub struct SystemsResponse {
    /// Every system of the game.
    pub systems: Vec<SystemSummary>,
}
