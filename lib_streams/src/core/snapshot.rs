//! # Entity Snapshot
//!
//! The full observed state of a stream at one instant: one listing per
//! resource partition (a system symbol for flight plans, a location symbol
//! for marketplaces). Partitions iterate in key order so every consumer sees
//! the same aggregation order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Listing per resource partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot<L> {
    partitions: BTreeMap<String, L>,
}

impl<L> Default for Snapshot<L> {
    fn default() -> Self {
        Self {
            partitions: BTreeMap::new(),
        }
    }
}

impl<L> Snapshot<L> {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the listing of `partition`, returning the one it replaced.
    pub fn insert(&mut self, partition: impl Into<String>, listing: L) -> Option<L> {
        self.partitions.insert(partition.into(), listing)
    }

    /// Listing of `partition`, if it was observed.
    pub fn get(&self, partition: &str) -> Option<&L> {
        self.partitions.get(partition)
    }

    /// Whether `partition` was observed.
    pub fn contains(&self, partition: &str) -> bool {
        self.partitions.contains_key(partition)
    }

    /// Partitions and their listings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &L)> {
        self.partitions.iter()
    }

    /// Observed partition symbols in key order.
    pub fn partition_keys(&self) -> impl Iterator<Item = &String> {
        self.partitions.keys()
    }

    /// Number of observed partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Whether nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl<L> FromIterator<(String, L)> for Snapshot<L> {
    fn from_iter<I: IntoIterator<Item = (String, L)>>(iter: I) -> Self {
        Self {
            partitions: iter.into_iter().collect(),
        }
    }
}
