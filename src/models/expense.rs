//! This file defines the type `Expense`, a single cost entry within a cycle.

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    database_id::{CycleId, EntryId},
    money::Money,
};

/// A single dated cost tied to a cycle, e.g. fuel, a car wash, or a snack.
///
/// Expenses are created through
/// [Cycle::add_expense](crate::models::Cycle::add_expense) while the owning
/// cycle is open. Like rides, they are never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expense {
    /// The ID of the expense, unique within its owning cycle.
    pub id: EntryId,
    /// The ID of the owning cycle.
    pub cycle_id: CycleId,
    /// What the money was spent on.
    pub description: String,
    /// How much was spent.
    pub amount: Money,
    /// When the expense was incurred.
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}
