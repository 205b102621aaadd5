//! Presence diff: entities compared by identity only.
//!
//! `appeared` holds entities of `current` whose id is not in `previous`,
//! `disappeared` the entities of `previous` whose id is not in `current`.
//! An entity present in both produces nothing, whatever its fields did.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// An entity with a stable identity.
pub trait Identified {
    /// The identity compared across snapshots.
    fn identity(&self) -> &str;
}

/// Classification of a presence change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Presence {
    /// Present now, absent before.
    Appeared,
    /// Present before, absent now.
    Disappeared,
}

/// An entity tagged with its presence change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceEvent<T> {
    /// The entity as last observed.
    #[serde(flatten)]
    pub entity: T,
    /// What happened to it.
    #[serde(rename = "type")]
    pub presence: Presence,
}

/// Both halves of a presence diff.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceDiff<T> {
    /// Entities new in the current observation.
    pub appeared: Vec<T>,
    /// Entities gone from the current observation.
    pub disappeared: Vec<T>,
}

impl<T> PresenceDiff<T> {
    /// Whether neither side changed.
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }

    /// Flattens into one tagged batch, appeared first.
    pub fn into_events(self) -> Vec<PresenceEvent<T>> {
        let appeared = self.appeared.into_iter().map(|entity| PresenceEvent {
            entity,
            presence: Presence::Appeared,
        });
        let disappeared = self.disappeared.into_iter().map(|entity| PresenceEvent {
            entity,
            presence: Presence::Disappeared,
        });
        appeared.chain(disappeared).collect()
    }
}

/// Computes which entities appeared in and disappeared from `current`.
pub fn presence_diff<T>(previous: &[T], current: &[T]) -> PresenceDiff<T>
where
    T: Identified + Clone,
{
    let previous_ids: HashSet<&str> = previous.iter().map(Identified::identity).collect();
    let current_ids: HashSet<&str> = current.iter().map(Identified::identity).collect();

    PresenceDiff {
        appeared: current
            .iter()
            .filter(|entity| !previous_ids.contains(entity.identity()))
            .cloned()
            .collect(),
        disappeared: previous
            .iter()
            .filter(|entity| !current_ids.contains(entity.identity()))
            .cloned()
            .collect(),
    }
}
