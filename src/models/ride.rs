//! This file defines the type `Ride`, a single trip performed within a cycle.

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    database_id::{CycleId, EntryId},
    money::{Distance, Money},
};

/// A single trip with a fare and a distance, belonging to exactly one cycle.
///
/// Rides are created through [Cycle::add_ride](crate::models::Cycle::add_ride)
/// while the owning cycle is open and cannot be edited in place; corrections
/// are modelled as delete and recreate to keep an auditable trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ride {
    /// The ID of the ride, unique within its owning cycle.
    pub id: EntryId,
    /// The ID of the owning cycle.
    pub cycle_id: CycleId,
    /// How much the passenger paid.
    pub fare: Money,
    /// How far the trip was in kilometres.
    pub distance_km: Distance,
    /// When the ride took place.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}
