//! Defines the cycle store trait, the persistence boundary of the core.

use std::ops::RangeInclusive;

use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    database_id::CycleId,
    models::{Cycle, CycleStatus, Totals},
};

/// Handles the durable persistence of cycles and their children.
///
/// All mutating operations are atomic: a cycle and its child records change
/// together or not at all. Implementations must serialise concurrent
/// mutation attempts against the same cycle so that lost updates and
/// duplicate open cycles cannot occur under race.
pub trait CycleStore {
    /// Start a new cycle, open as of `started_at`.
    ///
    /// # Errors
    /// Returns [Error::CycleAlreadyOpen] if another cycle is already open.
    fn create(&mut self, started_at: OffsetDateTime) -> Result<Cycle, Error>;

    /// Retrieve the single open cycle, or `None` if no cycle is open.
    fn get_active(&self) -> Result<Option<Cycle>, Error>;

    /// Retrieve a cycle with its children by its `id`.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if `id` does not refer to a cycle.
    fn get(&self, id: CycleId) -> Result<Cycle, Error>;

    /// Retrieve cycle summaries in the way defined by `query`, most
    /// recently started first.
    fn get_query(&self, query: CycleQuery) -> Result<Vec<CycleSummary>, Error>;

    /// Persist the cycle and all of its children.
    ///
    /// On success the aggregate's revision is advanced to match the stored
    /// row.
    ///
    /// # Errors
    /// Returns [Error::WriteConflict] if the stored cycle moved on from the
    /// revision this aggregate was loaded at, or [Error::NotFound] if the
    /// cycle was never created.
    fn save(&mut self, cycle: &mut Cycle) -> Result<(), Error>;

    /// Archive every closed cycle whose close time is at or before
    /// `cutoff`, returning how many cycles were archived.
    fn archive_older_than(&mut self, cutoff: OffsetDateTime) -> Result<usize, Error>;
}

/// Defines which cycles should be fetched from [CycleStore::get_query].
#[derive(Debug, Default, Clone)]
pub struct CycleQuery {
    /// Include only cycles with this status. `None` returns all statuses.
    pub status: Option<CycleStatus>,
    /// Include only cycles started within `date_range` (inclusive, UTC).
    pub date_range: Option<RangeInclusive<Date>>,
}

/// A cycle without its child records but with its computed totals, as
/// produced by [CycleStore::get_query].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    /// The ID of the cycle.
    pub id: CycleId,
    /// The status of the cycle.
    pub status: CycleStatus,
    /// When the cycle was started.
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// When the cycle was closed, if it has been.
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    /// The free-text note attached when the cycle was closed, if any.
    pub note: Option<String>,
    /// How many rides the cycle holds.
    pub ride_count: i64,
    /// The derived totals of the cycle.
    pub totals: Totals,
}
