//! Defines the endpoint serving the full application state.

use axum::extract::State;
use serde::Serialize;

use crate::{
    AppState, Error,
    models::CycleStatus,
    stores::{CycleQuery, CycleStore, CycleSummary},
};

use super::{CycleView, extract::Json};

/// The full application state: the active cycle (if any) and the archived
/// history, most recently started first.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    /// The single open cycle with its children and totals, or `null`.
    pub current_cycle: Option<CycleView>,
    /// Summaries of all archived cycles.
    pub archived: Vec<CycleSummary>,
}

/// A route handler returning the current cycle and the archived history.
pub async fn get_state_endpoint<C>(
    State(state): State<AppState<C>>,
) -> Result<Json<StateResponse>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let current_cycle = state.cycle_store.get_active()?.map(CycleView::from);
    let archived = state.cycle_store.get_query(CycleQuery {
        status: Some(CycleStatus::Archived),
        date_range: None,
    })?;

    Ok(Json(StateResponse {
        current_cycle,
        archived,
    }))
}
