//! Implements a SQLite backed cycle store.
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, Row, params};
use time::OffsetDateTime;

use crate::{
    Error,
    database_id::CycleId,
    models::{Cycle, CycleStatus, Expense, Ride, Totals},
    money::{Distance, Money},
    stores::{CycleQuery, CycleStore, CycleSummary},
};

/// Stores cycles and their child records in a SQLite database.
///
/// The whole aggregate is written inside a single SQL transaction, and the
/// cycle row carries a revision counter that [save](CycleStore::save) uses
/// as a compare-and-swap token, so concurrent writers against the same
/// cycle cannot lose updates.
#[derive(Debug, Clone)]
pub struct SQLiteCycleStore {
    connection: Arc<Mutex<Connection>>,
}

impl SQLiteCycleStore {
    /// Create a new store for the SQLite `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, Error> {
        self.connection.lock().map_err(|_| Error::DatabaseLockError)
    }
}

impl CycleStore for SQLiteCycleStore {
    /// Start a new cycle in the database.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::CycleAlreadyOpen] if another cycle is still open,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn create(&mut self, started_at: OffsetDateTime) -> Result<Cycle, Error> {
        let connection = self.lock()?;

        connection
            .execute(
                "INSERT INTO cycle (status, started_at, next_entry_id, revision)
                 VALUES ('open', ?1, 1, 0)",
                params![started_at],
            )
            .map_err(|error| match error {
                // Code 2067 occurs when a UNIQUE constraint failed, here the
                // partial index over open cycles.
                rusqlite::Error::SqliteFailure(error, Some(_)) if error.extended_code == 2067 => {
                    Error::CycleAlreadyOpen
                }
                error => error.into(),
            })?;

        Ok(Cycle::new(connection.last_insert_rowid(), started_at))
    }

    fn get_active(&self) -> Result<Option<Cycle>, Error> {
        let connection = self.lock()?;

        let id: Option<CycleId> = connection
            .prepare("SELECT id FROM cycle WHERE status = 'open'")?
            .query_row([], |row| row.get(0))
            .optional()?;

        match id {
            Some(id) => load_cycle(&connection, id).map(Some),
            None => Ok(None),
        }
    }

    /// Retrieve a cycle in the database by its `id`.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::NotFound] if `id` does not refer to a valid cycle,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn get(&self, id: CycleId) -> Result<Cycle, Error> {
        let connection = self.lock()?;

        load_cycle(&connection, id)
    }

    fn get_query(&self, query: CycleQuery) -> Result<Vec<CycleSummary>, Error> {
        let connection = self.lock()?;

        let sql = "SELECT c.id, c.status, c.started_at, c.closed_at, c.note,
                (SELECT COUNT(*) FROM ride r WHERE r.cycle_id = c.id),
                (SELECT COALESCE(SUM(r.fare_cents), 0) FROM ride r WHERE r.cycle_id = c.id),
                (SELECT COALESCE(SUM(r.distance_hundredths), 0) FROM ride r WHERE r.cycle_id = c.id),
                (SELECT COALESCE(SUM(e.amount_cents), 0) FROM expense e WHERE e.cycle_id = c.id)
             FROM cycle c
             WHERE (?1 IS NULL OR c.status = ?1)
             ORDER BY c.started_at DESC, c.id DESC";

        let status = query.status.map(CycleStatus::as_str);
        let mut statement = connection.prepare(sql)?;
        let rows = statement.query_map(params![status], map_summary_row)?;

        let mut summaries = Vec::new();
        for row in rows {
            let summary = row?.into_summary()?;

            if let Some(range) = &query.date_range {
                let started = summary.started_at.date();
                if !range.contains(&started) {
                    continue;
                }
            }

            summaries.push(summary);
        }

        Ok(summaries)
    }

    /// Persist the cycle and all of its children atomically.
    ///
    /// The cycle row is updated with `UPDATE … WHERE revision = ?`; zero
    /// affected rows means another request saved the cycle first and the
    /// whole transaction is rolled back.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::WriteConflict] if the stored revision no longer matches,
    /// - [Error::NotFound] if the cycle does not exist in the database,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn save(&mut self, cycle: &mut Cycle) -> Result<(), Error> {
        let connection = self.lock()?;
        let tx = connection.unchecked_transaction()?;

        let changed = tx
            .execute(
                "UPDATE cycle
                 SET status = ?1, closed_at = ?2, note = ?3, next_entry_id = ?4,
                     revision = revision + 1
                 WHERE id = ?5 AND revision = ?6",
                params![
                    cycle.status().as_str(),
                    cycle.closed_at(),
                    cycle.note(),
                    cycle.next_entry_id(),
                    cycle.id(),
                    cycle.revision(),
                ],
            )
            .map_err(|error| match error {
                // The CAS update may race another open cycle through the
                // partial unique index when reopening.
                rusqlite::Error::SqliteFailure(error, Some(_)) if error.extended_code == 2067 => {
                    Error::CycleAlreadyOpen
                }
                error => error.into(),
            })?;

        if changed == 0 {
            let exists: bool = tx.query_row(
                "SELECT EXISTS (SELECT 1 FROM cycle WHERE id = ?1)",
                params![cycle.id()],
                |row| row.get(0),
            )?;

            // Dropping the transaction rolls it back.
            return Err(if exists {
                Error::WriteConflict
            } else {
                Error::NotFound
            });
        }

        tx.execute("DELETE FROM ride WHERE cycle_id = ?1", params![cycle.id()])?;
        tx.execute(
            "DELETE FROM expense WHERE cycle_id = ?1",
            params![cycle.id()],
        )?;

        let mut insert_ride = tx.prepare(
            "INSERT INTO ride (cycle_id, id, fare_cents, distance_hundredths, occurred_at, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (position, ride) in cycle.rides().iter().enumerate() {
            insert_ride.execute(params![
                ride.cycle_id,
                ride.id,
                ride.fare,
                ride.distance_km,
                ride.occurred_at,
                position as i64,
            ])?;
        }
        drop(insert_ride);

        let mut insert_expense = tx.prepare(
            "INSERT INTO expense (cycle_id, id, description, amount_cents, occurred_at, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (position, expense) in cycle.expenses().iter().enumerate() {
            insert_expense.execute(params![
                expense.cycle_id,
                expense.id,
                expense.description,
                expense.amount,
                expense.occurred_at,
                position as i64,
            ])?;
        }
        drop(insert_expense);

        tx.commit()?;
        cycle.bump_revision();

        Ok(())
    }

    fn archive_older_than(&mut self, cutoff: OffsetDateTime) -> Result<usize, Error> {
        let connection = self.lock()?;
        let tx = connection.unchecked_transaction()?;

        let ids: Vec<CycleId> = {
            let mut statement =
                tx.prepare("SELECT id, closed_at FROM cycle WHERE status = 'closed'")?;
            let rows = statement.query_map([], |row| {
                Ok((row.get::<_, CycleId>(0)?, row.get::<_, OffsetDateTime>(1)?))
            })?;

            let mut ids = Vec::new();
            for row in rows {
                let (id, closed_at) = row?;
                if closed_at <= cutoff {
                    ids.push(id);
                }
            }
            ids
        };

        for id in &ids {
            tx.execute(
                "UPDATE cycle SET status = 'archived', revision = revision + 1 WHERE id = ?1",
                params![id],
            )?;
        }

        tx.commit()?;

        Ok(ids.len())
    }
}

/// Loads a full cycle aggregate, children included, in insertion order.
fn load_cycle(connection: &Connection, id: CycleId) -> Result<Cycle, Error> {
    let raw = connection
        .prepare(
            "SELECT id, status, started_at, closed_at, note, next_entry_id, revision
             FROM cycle WHERE id = ?1",
        )?
        .query_row(params![id], |row| {
            Ok(RawCycle {
                id: row.get(0)?,
                status: row.get(1)?,
                started_at: row.get(2)?,
                closed_at: row.get(3)?,
                note: row.get(4)?,
                next_entry_id: row.get(5)?,
                revision: row.get(6)?,
            })
        })?;

    let rides = connection
        .prepare(
            "SELECT id, cycle_id, fare_cents, distance_hundredths, occurred_at
             FROM ride WHERE cycle_id = ?1 ORDER BY position",
        )?
        .query_map(params![id], |row| {
            Ok(Ride {
                id: row.get(0)?,
                cycle_id: row.get(1)?,
                fare: row.get(2)?,
                distance_km: row.get(3)?,
                occurred_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let expenses = connection
        .prepare(
            "SELECT id, cycle_id, description, amount_cents, occurred_at
             FROM expense WHERE cycle_id = ?1 ORDER BY position",
        )?
        .query_map(params![id], |row| {
            Ok(Expense {
                id: row.get(0)?,
                cycle_id: row.get(1)?,
                description: row.get(2)?,
                amount: row.get(3)?,
                occurred_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Cycle::from_storage(
        raw.id,
        CycleStatus::parse(&raw.status)?,
        raw.started_at,
        raw.closed_at,
        raw.note,
        rides,
        expenses,
        raw.next_entry_id,
        raw.revision,
    ))
}

struct RawCycle {
    id: CycleId,
    status: String,
    started_at: OffsetDateTime,
    closed_at: Option<OffsetDateTime>,
    note: Option<String>,
    next_entry_id: i64,
    revision: i64,
}

struct RawSummary {
    id: CycleId,
    status: String,
    started_at: OffsetDateTime,
    closed_at: Option<OffsetDateTime>,
    note: Option<String>,
    ride_count: i64,
    total_fare: Money,
    total_distance_km: Distance,
    total_expenses: Money,
}

impl RawSummary {
    fn into_summary(self) -> Result<CycleSummary, Error> {
        Ok(CycleSummary {
            id: self.id,
            status: CycleStatus::parse(&self.status)?,
            started_at: self.started_at,
            closed_at: self.closed_at,
            note: self.note,
            ride_count: self.ride_count,
            totals: Totals {
                total_fare: self.total_fare,
                total_distance_km: self.total_distance_km,
                total_expenses: self.total_expenses,
                net_earning: self.total_fare - self.total_expenses,
                yield_per_km: self.total_fare.per_km(self.total_distance_km),
            },
        })
    }
}

fn map_summary_row(row: &Row) -> rusqlite::Result<RawSummary> {
    Ok(RawSummary {
        id: row.get(0)?,
        status: row.get(1)?,
        started_at: row.get(2)?,
        closed_at: row.get(3)?,
        note: row.get(4)?,
        ride_count: row.get(5)?,
        total_fare: row.get(6)?,
        total_distance_km: row.get(7)?,
        total_expenses: row.get(8)?,
    })
}

#[cfg(test)]
mod sqlite_cycle_store_tests {
    use rusqlite::Connection;
    use time::OffsetDateTime;
    use time::macros::datetime;

    use crate::{
        Error,
        models::CycleStatus,
        money::{Distance, Money},
        stores::{
            CycleQuery, CycleStore,
            sqlite::{SQLAppState, create_app_state},
        },
    };

    fn get_app_state() -> SQLAppState {
        let conn = Connection::open_in_memory().unwrap();
        create_app_state(conn).unwrap()
    }

    fn some_time() -> OffsetDateTime {
        datetime!(2024-07-15 18:30 UTC)
    }

    fn money(text: &str) -> Money {
        text.parse().unwrap()
    }

    fn km(text: &str) -> Distance {
        text.parse().unwrap()
    }

    #[test]
    fn create_returns_an_open_cycle() {
        let mut store = get_app_state().cycle_store;

        let cycle = store.create(some_time()).unwrap();

        assert_eq!(cycle.status(), CycleStatus::Open);
        assert_eq!(cycle.started_at(), some_time());
    }

    #[test]
    fn create_fails_while_a_cycle_is_open() {
        let mut store = get_app_state().cycle_store;
        store.create(some_time()).unwrap();

        let result = store.create(some_time());

        assert_eq!(result.err().map(|e| e.kind()), Some("ConflictError"));
    }

    #[test]
    fn create_succeeds_again_after_close() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(some_time()).unwrap();
        cycle.close(some_time(), None).unwrap();
        store.save(&mut cycle).unwrap();

        assert!(store.create(some_time()).is_ok());
    }

    #[test]
    fn get_active_returns_none_when_nothing_is_open() {
        let store = get_app_state().cycle_store;

        assert_eq!(store.get_active().unwrap(), None);
    }

    #[test]
    fn save_round_trips_the_aggregate() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(some_time()).unwrap();
        cycle.add_ride(money("50.00"), km("20"), some_time()).unwrap();
        cycle
            .add_expense("fuel", money("10.00"), some_time())
            .unwrap();

        store.save(&mut cycle).unwrap();

        let loaded = store.get_active().unwrap().expect("cycle should be open");
        assert_eq!(loaded, cycle);
        assert_eq!(loaded.totals().net_earning, money("40.00"));
    }

    #[test]
    fn save_preserves_insertion_order() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(some_time()).unwrap();
        // Timestamps deliberately out of order; insertion order must win.
        cycle
            .add_ride(money("1.00"), km("1"), datetime!(2024-07-15 20:00 UTC))
            .unwrap();
        cycle
            .add_ride(money("2.00"), km("2"), datetime!(2024-07-15 19:00 UTC))
            .unwrap();
        store.save(&mut cycle).unwrap();

        let loaded = store.get(cycle.id()).unwrap();

        let fares: Vec<_> = loaded.rides().iter().map(|ride| ride.fare).collect();
        assert_eq!(fares, vec![money("1.00"), money("2.00")]);
    }

    #[test]
    fn get_missing_cycle_is_not_found() {
        let store = get_app_state().cycle_store;

        assert_eq!(store.get(999), Err(Error::NotFound));
    }

    #[test]
    fn save_of_a_stale_aggregate_is_a_write_conflict() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(some_time()).unwrap();

        let mut stale = store.get(cycle.id()).unwrap();

        cycle.add_ride(money("5.00"), km("2"), some_time()).unwrap();
        store.save(&mut cycle).unwrap();

        stale.add_ride(money("9.00"), km("3"), some_time()).unwrap();
        assert_eq!(store.save(&mut stale), Err(Error::WriteConflict));

        // The winning write is intact.
        let loaded = store.get(cycle.id()).unwrap();
        assert_eq!(loaded.rides().len(), 1);
        assert_eq!(loaded.rides()[0].fare, money("5.00"));
    }

    #[test]
    fn reload_after_conflict_can_save() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(some_time()).unwrap();
        let mut stale = store.get(cycle.id()).unwrap();
        cycle.add_ride(money("5.00"), km("2"), some_time()).unwrap();
        store.save(&mut cycle).unwrap();
        stale.add_ride(money("9.00"), km("3"), some_time()).unwrap();
        assert_eq!(store.save(&mut stale), Err(Error::WriteConflict));

        let mut reloaded = store.get(cycle.id()).unwrap();
        reloaded
            .add_ride(money("9.00"), km("3"), some_time())
            .unwrap();

        assert_eq!(store.save(&mut reloaded), Ok(()));
        assert_eq!(store.get(cycle.id()).unwrap().rides().len(), 2);
    }

    #[test]
    fn get_query_filters_by_status() {
        let mut store = get_app_state().cycle_store;
        let mut first = store.create(datetime!(2024-07-01 08:00 UTC)).unwrap();
        first.add_ride(money("10.00"), km("5"), some_time()).unwrap();
        first.close(datetime!(2024-07-01 16:00 UTC), None).unwrap();
        first.archive().unwrap();
        store.save(&mut first).unwrap();

        let mut second = store.create(datetime!(2024-07-02 08:00 UTC)).unwrap();
        second.close(datetime!(2024-07-02 16:00 UTC), None).unwrap();
        store.save(&mut second).unwrap();

        let archived = store
            .get_query(CycleQuery {
                status: Some(CycleStatus::Archived),
                date_range: None,
            })
            .unwrap();

        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].id, first.id());
        assert_eq!(archived[0].ride_count, 1);
        assert_eq!(archived[0].totals.total_fare, money("10.00"));
        assert_eq!(archived[0].totals.yield_per_km, Some(money("2.00")));
    }

    #[test]
    fn get_query_orders_most_recent_first() {
        let mut store = get_app_state().cycle_store;
        for day in 1..=3 {
            let started = datetime!(2024-07-01 08:00 UTC) + time::Duration::days(day);
            let mut cycle = store.create(started).unwrap();
            cycle.close(started, None).unwrap();
            store.save(&mut cycle).unwrap();
        }

        let summaries = store.get_query(CycleQuery::default()).unwrap();

        let starts: Vec<_> = summaries.iter().map(|s| s.started_at).collect();
        let mut sorted = starts.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(starts, sorted);
    }

    #[test]
    fn get_query_filters_by_date_range() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(datetime!(2024-06-30 22:00 UTC)).unwrap();
        cycle.close(datetime!(2024-07-01 04:00 UTC), None).unwrap();
        store.save(&mut cycle).unwrap();
        store.create(datetime!(2024-07-02 08:00 UTC)).unwrap();

        let in_june = store
            .get_query(CycleQuery {
                status: None,
                date_range: Some(
                    time::macros::date!(2024-06-01)..=time::macros::date!(2024-06-30),
                ),
            })
            .unwrap();

        assert_eq!(in_june.len(), 1);
        assert_eq!(in_june[0].id, cycle.id());
    }

    #[test]
    fn archive_older_than_only_touches_closed_cycles() {
        let mut store = get_app_state().cycle_store;

        let mut old = store.create(datetime!(2024-07-01 08:00 UTC)).unwrap();
        old.close(datetime!(2024-07-01 16:00 UTC), None).unwrap();
        store.save(&mut old).unwrap();

        let mut recent = store.create(datetime!(2024-07-10 08:00 UTC)).unwrap();
        recent.close(datetime!(2024-07-10 16:00 UTC), None).unwrap();
        store.save(&mut recent).unwrap();

        let still_open = store.create(datetime!(2024-07-15 08:00 UTC)).unwrap();

        let archived = store
            .archive_older_than(datetime!(2024-07-05 00:00 UTC))
            .unwrap();

        assert_eq!(archived, 1);
        assert_eq!(store.get(old.id()).unwrap().status(), CycleStatus::Archived);
        assert_eq!(
            store.get(recent.id()).unwrap().status(),
            CycleStatus::Closed
        );
        assert_eq!(
            store.get(still_open.id()).unwrap().status(),
            CycleStatus::Open
        );
    }

    #[test]
    fn archived_bulk_transition_invalidates_stale_saves() {
        let mut store = get_app_state().cycle_store;
        let mut cycle = store.create(some_time()).unwrap();
        cycle.close(some_time(), None).unwrap();
        store.save(&mut cycle).unwrap();

        store.archive_older_than(some_time()).unwrap();

        // The aggregate loaded before the bulk archive is now stale.
        assert_eq!(store.save(&mut cycle), Err(Error::WriteConflict));
    }
}
