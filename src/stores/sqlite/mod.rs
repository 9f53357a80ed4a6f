//! Contains a convenience type alias and function for [AppState] that uses
//! the SQLite backend.

mod cycle;

pub use cycle::SQLiteCycleStore;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::{AppState, Error, db::initialize};

/// An alias for an [AppState] that uses SQLite for the backend.
pub type SQLAppState = AppState<SQLiteCycleStore>;

/// Creates an [AppState] instance that uses SQLite for the backend.
///
/// This function will modify the database by adding the tables for the
/// domain models to the database.
pub fn create_app_state(db_connection: Connection) -> Result<SQLAppState, Error> {
    initialize(&db_connection)?;

    let connection = Arc::new(Mutex::new(db_connection));
    let cycle_store = SQLiteCycleStore::new(connection);

    Ok(AppState::new(cycle_store))
}
