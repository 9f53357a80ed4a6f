//! The JSON REST API on top of the cycle accounting core.
//!
//! Handlers here are thin: they parse the request, call into the aggregate
//! and the store, and map [Error] kinds onto status codes via its
//! [IntoResponse](axum::response::IntoResponse) impl.

pub mod endpoints;

mod cycle;
mod entry;
mod extract;
mod report;
mod state;

use axum::{
    Router,
    routing::{delete, get, post},
};
use serde::Serialize;

use crate::{
    AppState, Error,
    models::{Cycle, CycleStatus, Totals},
    stores::{CycleQuery, CycleStore},
};

pub use cycle::{
    archive_cycle_endpoint, archive_older_than_endpoint, close_cycle_endpoint,
    reopen_cycle_endpoint, start_cycle_endpoint,
};
pub use entry::{
    create_expense_endpoint, create_ride_endpoint, delete_expense_endpoint, delete_ride_endpoint,
};
pub use report::{get_archives_endpoint, get_report_endpoint};
pub use state::get_state_endpoint;

/// Return a router with all the app's routes.
pub fn build_router<C>(state: AppState<C>) -> Router
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    Router::new()
        .route(endpoints::STATE, get(get_state_endpoint::<C>))
        .route(endpoints::CYCLES, post(start_cycle_endpoint::<C>))
        .route(endpoints::CLOSE_CYCLE, post(close_cycle_endpoint::<C>))
        .route(endpoints::REOPEN_CYCLE, post(reopen_cycle_endpoint::<C>))
        .route(endpoints::ARCHIVE_CYCLE, post(archive_cycle_endpoint::<C>))
        .route(endpoints::RIDES, post(create_ride_endpoint::<C>))
        .route(endpoints::DELETE_RIDE, delete(delete_ride_endpoint::<C>))
        .route(endpoints::EXPENSES, post(create_expense_endpoint::<C>))
        .route(
            endpoints::DELETE_EXPENSE,
            delete(delete_expense_endpoint::<C>),
        )
        .route(endpoints::ARCHIVES, get(get_archives_endpoint::<C>))
        .route(
            endpoints::ARCHIVE_OLDER_THAN,
            post(archive_older_than_endpoint::<C>),
        )
        .route(endpoints::REPORTS, get(get_report_endpoint::<C>))
        .with_state(state)
}

/// A cycle as returned by the API: the aggregate's fields plus its
/// computed totals.
#[derive(Debug, Serialize)]
pub struct CycleView {
    #[serde(flatten)]
    cycle: Cycle,
    totals: Totals,
}

impl From<Cycle> for CycleView {
    fn from(cycle: Cycle) -> Self {
        let totals = cycle.totals();
        Self { cycle, totals }
    }
}

/// Loads a cycle, applies `apply` to it, and saves it back, retrying a
/// write conflict at most once with a freshly loaded aggregate.
fn with_write_retry<C, L, F>(store: &mut C, load: L, mut apply: F) -> Result<Cycle, Error>
where
    C: CycleStore,
    L: Fn(&C) -> Result<Cycle, Error>,
    F: FnMut(&mut Cycle) -> Result<(), Error>,
{
    let mut attempt = |store: &mut C| -> Result<Cycle, Error> {
        let mut cycle = load(store)?;
        apply(&mut cycle)?;
        store.save(&mut cycle)?;
        Ok(cycle)
    };

    match attempt(store) {
        Err(Error::WriteConflict) => attempt(store),
        result => result,
    }
}

#[cfg(test)]
mod write_retry_tests {
    use std::sync::{Arc, Mutex};

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use time::{OffsetDateTime, macros::datetime};

    use crate::{
        AppState, Error,
        database_id::CycleId,
        models::{Cycle, CycleStatus},
        stores::{CycleQuery, CycleStore, CycleSummary},
    };

    use super::{build_router, endpoints};

    /// An in-memory store whose `save` fails with a write conflict a set
    /// number of times before succeeding, for exercising the handlers'
    /// reload-and-retry path.
    #[derive(Debug, Clone)]
    struct ContendedCycleStore {
        state: Arc<Mutex<Inner>>,
    }

    #[derive(Debug)]
    struct Inner {
        cycle: Option<Cycle>,
        conflicts_left: usize,
        save_calls: usize,
    }

    impl ContendedCycleStore {
        fn with_open_cycle(conflicts: usize) -> Self {
            Self {
                state: Arc::new(Mutex::new(Inner {
                    cycle: Some(Cycle::new(1, datetime!(2024-07-15 18:30 UTC))),
                    conflicts_left: conflicts,
                    save_calls: 0,
                })),
            }
        }

        fn save_calls(&self) -> usize {
            self.state.lock().unwrap().save_calls
        }

        fn stored_cycle(&self) -> Cycle {
            self.state.lock().unwrap().cycle.clone().unwrap()
        }
    }

    impl CycleStore for ContendedCycleStore {
        fn create(&mut self, started_at: OffsetDateTime) -> Result<Cycle, Error> {
            let cycle = Cycle::new(1, started_at);
            self.state.lock().unwrap().cycle = Some(cycle.clone());
            Ok(cycle)
        }

        fn get_active(&self) -> Result<Option<Cycle>, Error> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .cycle
                .clone()
                .filter(|cycle| cycle.status() == CycleStatus::Open))
        }

        fn get(&self, id: CycleId) -> Result<Cycle, Error> {
            self.state
                .lock()
                .unwrap()
                .cycle
                .clone()
                .filter(|cycle| cycle.id() == id)
                .ok_or(Error::NotFound)
        }

        fn get_query(&self, _query: CycleQuery) -> Result<Vec<CycleSummary>, Error> {
            Ok(Vec::new())
        }

        fn save(&mut self, cycle: &mut Cycle) -> Result<(), Error> {
            let mut state = self.state.lock().unwrap();
            state.save_calls += 1;

            if state.conflicts_left > 0 {
                state.conflicts_left -= 1;
                return Err(Error::WriteConflict);
            }

            cycle.bump_revision();
            state.cycle = Some(cycle.clone());
            Ok(())
        }

        fn archive_older_than(&mut self, _cutoff: OffsetDateTime) -> Result<usize, Error> {
            Ok(0)
        }
    }

    fn new_server(store: ContendedCycleStore) -> TestServer {
        TestServer::new(build_router(AppState::new(store)))
    }

    #[tokio::test]
    async fn a_single_write_conflict_is_retried() {
        let store = ContendedCycleStore::with_open_cycle(1);
        let server = new_server(store.clone());

        let response = server
            .post(endpoints::RIDES)
            .json(&json!({ "fare": "10.00", "distance_km": "5" }))
            .await;

        response.assert_status(StatusCode::CREATED);
        assert_eq!(store.save_calls(), 2);

        // The retry reloads the aggregate, so the ride lands exactly once.
        assert_eq!(store.stored_cycle().rides().len(), 1);
    }

    #[tokio::test]
    async fn a_repeated_write_conflict_surfaces_as_a_persistence_error() {
        let store = ContendedCycleStore::with_open_cycle(2);
        let server = new_server(store.clone());

        let response = server
            .post(endpoints::RIDES)
            .json(&json!({ "fare": "10.00", "distance_km": "5" }))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<Value>()["kind"], "PersistenceError");

        // Exactly one retry: two save attempts, no third.
        assert_eq!(store.save_calls(), 2);
        assert_eq!(store.stored_cycle().rides().len(), 0);
    }
}

/// Applies `apply` to the currently open cycle and persists the result.
fn mutate_active<C, F>(store: &mut C, apply: F) -> Result<Cycle, Error>
where
    C: CycleStore,
    F: FnMut(&mut Cycle) -> Result<(), Error>,
{
    with_write_retry(
        store,
        |store| {
            store.get_active()?.ok_or_else(|| {
                Error::InvalidState("no cycle is currently open".to_owned())
            })
        },
        apply,
    )
}

/// Applies `apply` to the most recently closed cycle and persists the
/// result.
fn mutate_latest_closed<C, F>(store: &mut C, apply: F) -> Result<Cycle, Error>
where
    C: CycleStore,
    F: FnMut(&mut Cycle) -> Result<(), Error>,
{
    with_write_retry(
        store,
        |store| {
            let summaries = store.get_query(CycleQuery {
                status: Some(CycleStatus::Closed),
                date_range: None,
            })?;
            let summary = summaries
                .first()
                .ok_or_else(|| Error::InvalidState("no closed cycle".to_owned()))?;

            store.get(summary.id)
        },
        apply,
    )
}
