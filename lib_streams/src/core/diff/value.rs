//! Value diff: price changes of goods present in both observations.
//!
//! A location seen for the first time reports nothing (its listing only
//! becomes the baseline). Goods that appear or disappear between cycles are
//! not reported either; only goods present on both sides whose buy or sell
//! price differs are.

use std::collections::{BTreeMap, HashMap};

use crate::core::snapshot::Snapshot;

/// A good carrying the two compared prices.
pub trait Priced {
    /// Good symbol, unique within one location.
    fn symbol(&self) -> &str;
    /// Price paid when buying one unit.
    fn buy_price(&self) -> Option<f64>;
    /// Price received when selling one unit.
    fn sell_price(&self) -> Option<f64>;
}

/// A location listing made of priced goods.
pub trait PricedListing {
    /// The good type of this listing.
    type Good: Priced + Clone;
    /// Goods currently offered at the location.
    fn goods(&self) -> &[Self::Good];
}

fn prices_differ<G: Priced>(before: &G, after: &G) -> bool {
    before.buy_price() != after.buy_price() || before.sell_price() != after.sell_price()
}

/// Goods of `current` whose prices differ from the same good in `previous`.
///
/// Returns nothing when `previous` is `None` (first observation).
pub fn value_diff_listing<L: PricedListing>(previous: Option<&L>, current: &L) -> Vec<L::Good> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let before: HashMap<&str, &L::Good> = previous
        .goods()
        .iter()
        .map(|good| (good.symbol(), good))
        .collect();

    current
        .goods()
        .iter()
        .filter(|good| {
            before
                .get(good.symbol())
                .is_some_and(|old| prices_differ(*old, *good))
        })
        .cloned()
        .collect()
}

/// Changed goods grouped by location symbol.
///
/// Locations without changes are omitted, so an empty map means no
/// broadcast for the cycle.
pub fn value_diff<L: PricedListing>(
    previous: &Snapshot<L>,
    current: &Snapshot<L>,
) -> BTreeMap<String, Vec<L::Good>> {
    current
        .iter()
        .filter_map(|(location, listing)| {
            let changed = value_diff_listing(previous.get(location), listing);
            (!changed.is_empty()).then(|| (location.clone(), changed))
        })
        .collect()
}
