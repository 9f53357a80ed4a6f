//! Database ID type definitions.

/// Alias for the integer type used for mapping to database IDs.
pub type DatabaseID = i64;

/// The ID of a [Cycle](crate::models::Cycle).
pub type CycleId = DatabaseID;

/// The ID of a ride or expense within its owning cycle.
///
/// Entry IDs are allocated by the cycle aggregate and are unique per cycle,
/// not globally.
pub type EntryId = DatabaseID;
