//! Sets up the application's database schema.

use rusqlite::Connection;

use crate::Error;

/// Create the tables and indexes for the domain models.
///
/// The partial unique index over `status = 'open'` is what enforces the
/// at-most-one-open-cycle invariant at the store layer; violating inserts
/// and updates fail atomically inside their transaction.
///
/// # Errors
/// Returns an [Error::SqlError] if the schema could not be created.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    connection.execute_batch(
        "PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS cycle (
            id INTEGER PRIMARY KEY,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            closed_at TEXT,
            note TEXT,
            next_entry_id INTEGER NOT NULL DEFAULT 1,
            revision INTEGER NOT NULL DEFAULT 0
        );

        CREATE UNIQUE INDEX IF NOT EXISTS one_open_cycle
            ON cycle (status) WHERE status = 'open';

        CREATE TABLE IF NOT EXISTS ride (
            cycle_id INTEGER NOT NULL REFERENCES cycle (id) ON DELETE CASCADE,
            id INTEGER NOT NULL,
            fare_cents INTEGER NOT NULL,
            distance_hundredths INTEGER NOT NULL,
            occurred_at TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (cycle_id, id)
        );

        CREATE TABLE IF NOT EXISTS expense (
            cycle_id INTEGER NOT NULL REFERENCES cycle (id) ON DELETE CASCADE,
            id INTEGER NOT NULL,
            description TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            occurred_at TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (cycle_id, id)
        );",
    )?;

    Ok(())
}
