//! Endpoint paths and typed calls of the game API.
//!
//! Paths are relative so they join under the client's base URL.

use crate::markets::spacetraders::model::{
    FlightPlan, FlightPlansResponse, MarketLocation, MarketplaceResponse, SystemsResponse,
};
use crate::retrieve::upstream_http::{UpstreamClient, UpstreamError};

/// Lists every system of the game.
pub const SYSTEMS_PATH: &str = "game/systems";

/// Active flight plans of `system`.
pub fn flight_plans_path(system: &str) -> String {
    format!("game/systems/{}/flight-plans", system)
}

/// Marketplace of `location`.
pub fn marketplace_path(location: &str) -> String {
    format!("game/locations/{}/marketplace", location)
}

/// Fetches the active flight plans of one system.
pub async fn list_flight_plans(
    client: &UpstreamClient,
    system: &str,
) -> Result<Vec<FlightPlan>, UpstreamError> {
    let response: FlightPlansResponse = client.get_json(&flight_plans_path(system)).await?;
    Ok(response.flight_plans)
}

/// Fetches the marketplace listing of one location.
pub async fn get_marketplace(
    client: &UpstreamClient,
    location: &str,
) -> Result<MarketLocation, UpstreamError> {
    let response: MarketplaceResponse = client.get_json(&marketplace_path(location)).await?;
    Ok(response.location)
}

/// Fetches the symbols of every system.
pub async fn list_systems(client: &UpstreamClient) -> Result<Vec<String>, UpstreamError> {
    let response: SystemsResponse = client.get_json(SYSTEMS_PATH).await?;
    Ok(response.systems.into_iter().map(|s| s.symbol).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_relative_to_the_base() {
        assert_eq!(flight_plans_path("OE"), "game/systems/OE/flight-plans");
        assert_eq!(marketplace_path("OE-PM"), "game/locations/OE-PM/marketplace");
        assert!(!SYSTEMS_PATH.starts_with('/'));
    }
}
