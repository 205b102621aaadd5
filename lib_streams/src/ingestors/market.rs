//! # Marketplace Stream
//!
//! Polls the marketplace of every configured location and broadcasts goods
//! whose buy or sell price changed, grouped by location. A location seen
//! for the first time only sets the baseline.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::core::diff::value::{value_diff, Priced, PricedListing};
use crate::core::domain::{ChangeSet, StreamDomain};
use crate::core::snapshot::Snapshot;
use crate::markets::spacetraders::apicall::get_marketplace;
use crate::markets::spacetraders::model::{MarketGood, MarketLocation};
use crate::retrieve::upstream_http::{UpstreamClient, UpstreamError};

/// Stream name of the marketplace stream.
pub const MARKET_STREAM: &str = "market";

/// Broadcast shape: a one-element array wrapping `{location: [goods]}`.
pub type MarketDelta = Vec<BTreeMap<String, Vec<MarketGood>>>;

impl Priced for MarketGood {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn buy_price(&self) -> Option<f64> {
        self.purchase_price_per_unit
    }

    fn sell_price(&self) -> Option<f64> {
        self.sell_price_per_unit
    }
}

impl PricedListing for MarketLocation {
    type Good = MarketGood;

    fn goods(&self) -> &[MarketGood] {
        &self.marketplace
    }
}

/// Marketplace listing per location.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarketDomain;

impl MarketDomain {
    /// Creates the domain.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamDomain for MarketDomain {
    type Listing = MarketLocation;
    type Delta = MarketDelta;

    fn name(&self) -> &str {
        MARKET_STREAM
    }

    async fn fetch_partition(
        &self,
        client: &UpstreamClient,
        partition: &str,
    ) -> Result<(String, MarketLocation), UpstreamError> {
        let location = get_marketplace(client, partition).await?;
        Ok((location.symbol.clone(), location))
    }

    fn entity_ids(&self, listing: &MarketLocation) -> Vec<String> {
        listing
            .marketplace
            .iter()
            .map(|good| format!("{}/{}", listing.symbol, good.symbol))
            .collect()
    }

    fn diff(
        &self,
        previous: &Snapshot<MarketLocation>,
        current: &Snapshot<MarketLocation>,
    ) -> ChangeSet<MarketDelta> {
        let differences = value_diff(previous, current);
        if differences.is_empty() {
            return ChangeSet::default();
        }
        ChangeSet {
            changed_partitions: differences.keys().cloned().collect(),
            delta: Some(vec![differences]),
        }
    }
}
