//! This file defines the type `Cycle`, the aggregate at the centre of the
//! accounting model.
//!
//! A cycle owns its rides and expenses: children are only ever created,
//! removed, and persisted through the aggregate, which is what lets it
//! enforce the status rules and keep totals a pure function of its contents.

use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    Error,
    database_id::{CycleId, EntryId},
    models::{Expense, Ride},
    money::{Distance, Money},
};

/// The status of a [Cycle].
///
/// Valid transitions are open → closed (`close`), closed → open (`reopen`)
/// and closed → archived (`archive`). Archived is terminal; nothing exits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// The driver is on shift; rides and expenses may be added and removed.
    Open,
    /// The shift is done for now. Totals are frozen for review, but the
    /// cycle can still be reopened for corrections.
    Closed,
    /// The cycle is permanently sealed and only visible to historical
    /// reports.
    Archived,
}

impl CycleStatus {
    /// The lowercase name stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Open => "open",
            CycleStatus::Closed => "closed",
            CycleStatus::Archived => "archived",
        }
    }

    /// Parses the lowercase name stored in the database.
    pub fn parse(text: &str) -> Result<Self, Error> {
        match text {
            "open" => Ok(CycleStatus::Open),
            "closed" => Ok(CycleStatus::Closed),
            "archived" => Ok(CycleStatus::Archived),
            other => Err(Error::Validation(format!(
                "\"{other}\" is not a valid cycle status"
            ))),
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The derived totals of a cycle.
///
/// Never stored; recomputed from the child records on every read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Totals {
    /// The gross revenue from all rides.
    pub total_fare: Money,
    /// The distance covered across all rides.
    pub total_distance_km: Distance,
    /// The sum of all expense amounts.
    pub total_expenses: Money,
    /// `total_fare` minus `total_expenses`.
    pub net_earning: Money,
    /// `total_fare` divided by `total_distance_km`, or `None` when no
    /// distance was covered.
    pub yield_per_km: Option<Money>,
}

/// A bounded work shift aggregating rides and expenses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cycle {
    id: CycleId,
    status: CycleStatus,
    #[serde(with = "time::serde::rfc3339")]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    closed_at: Option<OffsetDateTime>,
    note: Option<String>,
    rides: Vec<Ride>,
    expenses: Vec<Expense>,
    #[serde(skip)]
    next_entry_id: EntryId,
    #[serde(skip)]
    revision: i64,
}

impl Cycle {
    /// Creates a new open cycle with no children.
    pub fn new(id: CycleId, started_at: OffsetDateTime) -> Self {
        Self {
            id,
            status: CycleStatus::Open,
            started_at,
            closed_at: None,
            note: None,
            rides: Vec::new(),
            expenses: Vec::new(),
            next_entry_id: 1,
            revision: 0,
        }
    }

    /// Reassembles a cycle from its persisted parts.
    ///
    /// Only the store should call this; it bypasses the creation rules
    /// because the parts were validated when they were first persisted.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_storage(
        id: CycleId,
        status: CycleStatus,
        started_at: OffsetDateTime,
        closed_at: Option<OffsetDateTime>,
        note: Option<String>,
        rides: Vec<Ride>,
        expenses: Vec<Expense>,
        next_entry_id: EntryId,
        revision: i64,
    ) -> Self {
        Self {
            id,
            status,
            started_at,
            closed_at,
            note,
            rides,
            expenses,
            next_entry_id,
            revision,
        }
    }

    /// The ID of the cycle.
    pub fn id(&self) -> CycleId {
        self.id
    }

    /// The current status of the cycle.
    pub fn status(&self) -> CycleStatus {
        self.status
    }

    /// When the cycle was started.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// When the cycle was closed, if it has been.
    pub fn closed_at(&self) -> Option<OffsetDateTime> {
        self.closed_at
    }

    /// The free-text note attached when the cycle was closed, if any.
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// The rides of the cycle in insertion order.
    pub fn rides(&self) -> &[Ride] {
        &self.rides
    }

    /// The expenses of the cycle in insertion order.
    pub fn expenses(&self) -> &[Expense] {
        &self.expenses
    }

    /// The next child ID the aggregate will hand out.
    pub(crate) fn next_entry_id(&self) -> EntryId {
        self.next_entry_id
    }

    /// The persisted revision this aggregate was loaded from.
    ///
    /// [CycleStore::save](crate::stores::CycleStore::save) uses the revision
    /// as a compare-and-swap token to detect concurrent writers.
    pub fn revision(&self) -> i64 {
        self.revision
    }

    pub(crate) fn bump_revision(&mut self) {
        self.revision += 1;
    }

    /// Records a ride against the cycle and returns it.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not open, or
    /// [Error::Validation] if `fare` or `distance_km` is negative.
    pub fn add_ride(
        &mut self,
        fare: Money,
        distance_km: Distance,
        occurred_at: OffsetDateTime,
    ) -> Result<&Ride, Error> {
        self.ensure_open("add a ride")?;

        if fare.is_negative() {
            return Err(Error::Validation("the fare must not be negative".to_owned()));
        }

        if distance_km.is_negative() {
            return Err(Error::Validation(
                "the distance must not be negative".to_owned(),
            ));
        }

        let ride = Ride {
            id: self.allocate_entry_id(),
            cycle_id: self.id,
            fare,
            distance_km,
            occurred_at,
        };
        self.rides.push(ride);

        Ok(self.rides.last().expect("ride just pushed"))
    }

    /// Records an expense against the cycle and returns it.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not open, or
    /// [Error::Validation] if `amount` is negative or `description` is
    /// empty.
    pub fn add_expense(
        &mut self,
        description: &str,
        amount: Money,
        occurred_at: OffsetDateTime,
    ) -> Result<&Expense, Error> {
        self.ensure_open("add an expense")?;

        if amount.is_negative() {
            return Err(Error::Validation(
                "the amount must not be negative".to_owned(),
            ));
        }

        let description = description.trim();
        if description.is_empty() {
            return Err(Error::Validation(
                "the description must not be empty".to_owned(),
            ));
        }

        let expense = Expense {
            id: self.allocate_entry_id(),
            cycle_id: self.id,
            description: description.to_owned(),
            amount,
            occurred_at,
        };
        self.expenses.push(expense);

        Ok(self.expenses.last().expect("expense just pushed"))
    }

    /// Removes the ride with `id` and returns it.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not open, or
    /// [Error::NotFound] if no ride has the given ID.
    pub fn remove_ride(&mut self, id: EntryId) -> Result<Ride, Error> {
        self.ensure_open("remove a ride")?;

        let index = self
            .rides
            .iter()
            .position(|ride| ride.id == id)
            .ok_or(Error::NotFound)?;

        Ok(self.rides.remove(index))
    }

    /// Removes the expense with `id` and returns it.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not open, or
    /// [Error::NotFound] if no expense has the given ID.
    pub fn remove_expense(&mut self, id: EntryId) -> Result<Expense, Error> {
        self.ensure_open("remove an expense")?;

        let index = self
            .expenses
            .iter()
            .position(|expense| expense.id == id)
            .ok_or(Error::NotFound)?;

        Ok(self.expenses.remove(index))
    }

    /// Closes the cycle, freezing it for review.
    ///
    /// An optional free-text `note` (e.g. "rained all evening") is kept with
    /// the cycle and carried into the archive.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not open.
    pub fn close(&mut self, closed_at: OffsetDateTime, note: Option<String>) -> Result<(), Error> {
        if self.status != CycleStatus::Open {
            return Err(Error::InvalidState(format!(
                "cannot close a cycle that is {}",
                self.status
            )));
        }

        self.status = CycleStatus::Closed;
        self.closed_at = Some(closed_at);
        if note.is_some() {
            self.note = note;
        }

        Ok(())
    }

    /// Reopens a closed cycle for corrections.
    ///
    /// Rides, expenses, and therefore totals are left untouched.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not closed.
    pub fn reopen(&mut self) -> Result<(), Error> {
        if self.status != CycleStatus::Closed {
            return Err(Error::InvalidState(format!(
                "cannot reopen a cycle that is {}",
                self.status
            )));
        }

        self.status = CycleStatus::Open;
        self.closed_at = None;

        Ok(())
    }

    /// Permanently seals the cycle for historical reporting.
    ///
    /// Only a closed cycle may be archived; archiving mid-shift data would
    /// capture an incomplete shift as history.
    ///
    /// # Errors
    /// Returns [Error::InvalidState] if the cycle is not closed.
    pub fn archive(&mut self) -> Result<(), Error> {
        if self.status != CycleStatus::Closed {
            return Err(Error::InvalidState(format!(
                "cannot archive a cycle that is {}",
                self.status
            )));
        }

        self.status = CycleStatus::Archived;

        Ok(())
    }

    /// Computes the derived totals of the cycle.
    ///
    /// A pure read over the child records: no caching, no side effects,
    /// callable in any status.
    pub fn totals(&self) -> Totals {
        let total_fare: Money = self.rides.iter().map(|ride| ride.fare).sum();
        let total_distance_km: Distance = self.rides.iter().map(|ride| ride.distance_km).sum();
        let total_expenses: Money = self.expenses.iter().map(|expense| expense.amount).sum();

        Totals {
            total_fare,
            total_distance_km,
            total_expenses,
            net_earning: total_fare - total_expenses,
            yield_per_km: total_fare.per_km(total_distance_km),
        }
    }

    fn ensure_open(&self, action: &str) -> Result<(), Error> {
        if self.status == CycleStatus::Open {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {action} while the cycle is {}",
                self.status
            )))
        }
    }

    fn allocate_entry_id(&mut self) -> EntryId {
        let id = self.next_entry_id;
        self.next_entry_id += 1;
        id
    }
}

#[cfg(test)]
mod cycle_tests {
    use time::OffsetDateTime;
    use time::macros::datetime;

    use crate::{
        Error,
        money::{Distance, Money},
    };

    use super::{Cycle, CycleStatus};

    fn some_time() -> OffsetDateTime {
        datetime!(2024-07-15 18:30 UTC)
    }

    fn money(text: &str) -> Money {
        text.parse().expect("invalid money literal")
    }

    fn km(text: &str) -> Distance {
        text.parse().expect("invalid distance literal")
    }

    fn open_cycle() -> Cycle {
        Cycle::new(1, some_time())
    }

    #[test]
    fn new_cycle_is_open_and_empty() {
        let cycle = open_cycle();

        assert_eq!(cycle.status(), CycleStatus::Open);
        assert!(cycle.rides().is_empty());
        assert!(cycle.expenses().is_empty());
        assert_eq!(cycle.closed_at(), None);
    }

    #[test]
    fn totals_match_worked_example() {
        let mut cycle = open_cycle();
        cycle
            .add_ride(money("50.00"), km("20"), some_time())
            .unwrap();
        cycle
            .add_expense("fuel", money("10.00"), some_time())
            .unwrap();

        let totals = cycle.totals();

        assert_eq!(totals.total_fare, money("50.00"));
        assert_eq!(totals.total_distance_km, km("20"));
        assert_eq!(totals.total_expenses, money("10.00"));
        assert_eq!(totals.net_earning, money("40.00"));
        assert_eq!(totals.yield_per_km, Some(money("2.50")));
    }

    #[test]
    fn totals_sum_every_child() {
        let mut cycle = open_cycle();
        for (fare, distance) in [("12.50", "4.2"), ("8.00", "2"), ("30.75", "15.55")] {
            cycle.add_ride(money(fare), km(distance), some_time()).unwrap();
        }
        cycle.add_expense("car wash", money("15.00"), some_time()).unwrap();
        cycle.add_expense("lunch", money("22.10"), some_time()).unwrap();

        let totals = cycle.totals();

        assert_eq!(totals.total_fare, money("51.25"));
        assert_eq!(totals.total_distance_km, km("21.75"));
        assert_eq!(totals.total_expenses, money("37.10"));
        assert_eq!(totals.net_earning, money("14.15"));
    }

    #[test]
    fn yield_is_undefined_with_no_distance() {
        let mut cycle = open_cycle();
        cycle
            .add_expense("parking", money("5.00"), some_time())
            .unwrap();

        assert_eq!(cycle.totals().yield_per_km, None);
    }

    #[test]
    fn net_earning_can_go_negative() {
        let mut cycle = open_cycle();
        cycle.add_ride(money("5.00"), km("3"), some_time()).unwrap();
        cycle
            .add_expense("new tyre", money("120.00"), some_time())
            .unwrap();

        assert_eq!(cycle.totals().net_earning, money("-115.00"));
    }

    #[test]
    fn rejects_negative_fare_and_distance() {
        let mut cycle = open_cycle();

        assert!(matches!(
            cycle.add_ride(money("-1.00"), km("5"), some_time()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            cycle.add_ride(money("5.00"), km("-1"), some_time()),
            Err(Error::Validation(_))
        ));
        assert!(cycle.rides().is_empty());
    }

    #[test]
    fn rejects_negative_or_unnamed_expense() {
        let mut cycle = open_cycle();

        assert!(matches!(
            cycle.add_expense("fuel", money("-0.01"), some_time()),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            cycle.add_expense("   ", money("5.00"), some_time()),
            Err(Error::Validation(_))
        ));
        assert!(cycle.expenses().is_empty());
    }

    #[test]
    fn children_keep_insertion_order_and_unique_ids() {
        let mut cycle = open_cycle();
        let first = cycle.add_ride(money("1.00"), km("1"), some_time()).unwrap().id;
        let second = cycle.add_ride(money("2.00"), km("1"), some_time()).unwrap().id;
        let third = cycle
            .add_expense("toll", money("3.00"), some_time())
            .unwrap()
            .id;

        assert!(first < second && second < third);
        assert_eq!(
            cycle.rides().iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![first, second]
        );
    }

    #[test]
    fn remove_ride_only_touches_the_target() {
        let mut cycle = open_cycle();
        let keep = cycle.add_ride(money("1.00"), km("1"), some_time()).unwrap().id;
        let gone = cycle.add_ride(money("2.00"), km("2"), some_time()).unwrap().id;

        let removed = cycle.remove_ride(gone).unwrap();

        assert_eq!(removed.id, gone);
        assert_eq!(cycle.rides().len(), 1);
        assert_eq!(cycle.rides()[0].id, keep);
        assert_eq!(cycle.totals().total_fare, money("1.00"));
    }

    #[test]
    fn remove_missing_child_is_not_found() {
        let mut cycle = open_cycle();

        assert_eq!(cycle.remove_ride(42), Err(Error::NotFound));
        assert_eq!(cycle.remove_expense(42), Err(Error::NotFound));
    }

    #[test]
    fn closed_cycle_rejects_mutation_and_keeps_totals() {
        let mut cycle = open_cycle();
        cycle.add_ride(money("9.00"), km("4"), some_time()).unwrap();
        cycle.close(some_time(), None).unwrap();
        let totals_before = cycle.totals();

        assert!(matches!(
            cycle.add_ride(money("1.00"), km("1"), some_time()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            cycle.add_expense("fuel", money("1.00"), some_time()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(cycle.remove_ride(1), Err(Error::InvalidState(_))));
        assert_eq!(cycle.totals(), totals_before);
    }

    #[test]
    fn close_sets_closed_at_and_note() {
        let mut cycle = open_cycle();
        let closed_at = datetime!(2024-07-16 02:00 UTC);

        cycle
            .close(closed_at, Some("rained all evening".to_owned()))
            .unwrap();

        assert_eq!(cycle.status(), CycleStatus::Closed);
        assert_eq!(cycle.closed_at(), Some(closed_at));
        assert_eq!(cycle.note(), Some("rained all evening"));
    }

    #[test]
    fn close_then_reopen_round_trips() {
        let mut cycle = open_cycle();
        cycle.add_ride(money("9.00"), km("4"), some_time()).unwrap();
        let totals_before = cycle.totals();

        cycle.close(some_time(), None).unwrap();
        cycle.reopen().unwrap();

        assert_eq!(cycle.status(), CycleStatus::Open);
        assert_eq!(cycle.closed_at(), None);
        assert_eq!(cycle.totals(), totals_before);
        assert_eq!(cycle.rides().len(), 1);
    }

    #[test]
    fn cannot_close_twice_or_reopen_an_open_cycle() {
        let mut cycle = open_cycle();

        assert!(matches!(cycle.reopen(), Err(Error::InvalidState(_))));

        cycle.close(some_time(), None).unwrap();
        assert!(matches!(
            cycle.close(some_time(), None),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn archive_requires_a_closed_cycle() {
        let mut cycle = open_cycle();

        assert!(matches!(cycle.archive(), Err(Error::InvalidState(_))));

        cycle.close(some_time(), None).unwrap();
        cycle.archive().unwrap();

        assert_eq!(cycle.status(), CycleStatus::Archived);
    }

    #[test]
    fn archived_is_terminal() {
        let mut cycle = open_cycle();
        cycle.close(some_time(), None).unwrap();
        cycle.archive().unwrap();

        assert!(matches!(cycle.reopen(), Err(Error::InvalidState(_))));
        assert!(matches!(cycle.archive(), Err(Error::InvalidState(_))));
        assert!(matches!(
            cycle.close(some_time(), None),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            cycle.add_ride(money("1.00"), km("1"), some_time()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(cycle.remove_expense(1), Err(Error::InvalidState(_))));
    }

    #[test]
    fn entry_ids_are_not_reused_after_removal() {
        let mut cycle = open_cycle();
        let first = cycle.add_ride(money("1.00"), km("1"), some_time()).unwrap().id;
        cycle.remove_ride(first).unwrap();

        let second = cycle.add_ride(money("2.00"), km("2"), some_time()).unwrap().id;

        assert_ne!(first, second);
    }
}
