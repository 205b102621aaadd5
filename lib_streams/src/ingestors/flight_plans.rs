//! # Flight Plan Stream
//!
//! Polls the flight plans of every tracked system and broadcasts ships that
//! launched (a plan appeared) or landed (a plan disappeared) since the last
//! cycle. Plans are compared by id across all systems at once.
//!
//! Systems come from configuration or, when none are configured, from the
//! game's system listing.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Serialize;

use crate::core::diff::presence::{presence_diff, Identified, Presence};
use crate::core::domain::{ChangeSet, StreamDomain};
use crate::core::snapshot::Snapshot;
use crate::markets::spacetraders::apicall::{list_flight_plans, list_systems};
use crate::markets::spacetraders::model::FlightPlan;
use crate::retrieve::upstream_http::{UpstreamClient, UpstreamError};

/// Stream name of the flight plan stream.
pub const FLIGHT_PLANS_STREAM: &str = "flightplans";

impl Identified for FlightPlan {
    fn identity(&self) -> &str {
        &self.id
    }
}

/// Wire tag of a flight plan event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightPlanEventKind {
    /// A new plan: the ship took off.
    Launched,
    /// A plan is gone: the ship arrived.
    Landed,
}

impl From<Presence> for FlightPlanEventKind {
    fn from(presence: Presence) -> Self {
        match presence {
            Presence::Appeared => FlightPlanEventKind::Launched,
            Presence::Disappeared => FlightPlanEventKind::Landed,
        }
    }
}

/// A flight plan with its event tag, serialized flat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightPlanEvent {
    /// The plan as last observed.
    #[serde(flatten)]
    pub plan: FlightPlan,
    /// Launched or landed.
    #[serde(rename = "type")]
    pub kind: FlightPlanEventKind,
}

/// Flight plans per system.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlightPlansDomain;

impl FlightPlansDomain {
    /// Creates the domain.
    pub fn new() -> Self {
        Self
    }
}

fn flatten(snapshot: &Snapshot<Vec<FlightPlan>>) -> (Vec<FlightPlan>, HashMap<String, String>) {
    let mut plans = Vec::new();
    let mut owners = HashMap::new();
    for (system, listing) in snapshot.iter() {
        for plan in listing {
            owners.insert(plan.id.clone(), system.clone());
            plans.push(plan.clone());
        }
    }
    (plans, owners)
}

#[async_trait]
impl StreamDomain for FlightPlansDomain {
    type Listing = Vec<FlightPlan>;
    type Delta = Vec<FlightPlanEvent>;

    fn name(&self) -> &str {
        FLIGHT_PLANS_STREAM
    }

    async fn fetch_partition(
        &self,
        client: &UpstreamClient,
        partition: &str,
    ) -> Result<(String, Vec<FlightPlan>), UpstreamError> {
        let plans = list_flight_plans(client, partition).await?;
        Ok((partition.to_string(), plans))
    }

    fn entity_ids(&self, listing: &Vec<FlightPlan>) -> Vec<String> {
        listing.iter().map(|plan| plan.id.clone()).collect()
    }

    fn diff(
        &self,
        previous: &Snapshot<Vec<FlightPlan>>,
        current: &Snapshot<Vec<FlightPlan>>,
    ) -> ChangeSet<Vec<FlightPlanEvent>> {
        let (before, before_owners) = flatten(previous);
        let (now, now_owners) = flatten(current);
        let diff = presence_diff(&before, &now);

        let mut changed_partitions = BTreeSet::new();
        for plan in &diff.appeared {
            changed_partitions.extend(now_owners.get(&plan.id).cloned());
        }
        for plan in &diff.disappeared {
            changed_partitions.extend(before_owners.get(&plan.id).cloned());
        }

        let events: Vec<FlightPlanEvent> = diff
            .into_events()
            .into_iter()
            .map(|event| FlightPlanEvent {
                plan: event.entity,
                kind: event.presence.into(),
            })
            .collect();

        ChangeSet {
            delta: (!events.is_empty()).then_some(events),
            changed_partitions,
        }
    }

    async fn discover_partitions(
        &self,
        client: &UpstreamClient,
    ) -> Result<Option<Vec<String>>, UpstreamError> {
        list_systems(client).await.map(Some)
    }
}
