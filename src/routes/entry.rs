//! Defines the endpoints for adding and removing rides and expenses.
//!
//! There is deliberately no update-in-place: corrections are modelled as
//! delete and recreate so the trail of changes stays auditable.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    database_id::EntryId,
    money::{Distance, Money},
    stores::CycleStore,
};

use super::{
    CycleView,
    extract::{Json, Path},
    mutate_active,
};

/// The request body for adding a ride to the open cycle.
#[derive(Debug, Deserialize)]
pub struct RideRequest {
    /// How much the passenger paid, e.g. `"12.50"`.
    pub fare: Money,
    /// How far the trip was in kilometres, e.g. `"4.2"`.
    pub distance_km: Distance,
    /// When the ride took place; defaults to now.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub occurred_at: Option<OffsetDateTime>,
}

/// A route handler that records a ride against the open cycle and returns
/// the updated cycle.
pub async fn create_ride_endpoint<C>(
    State(state): State<AppState<C>>,
    Json(request): Json<RideRequest>,
) -> Result<impl IntoResponse, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let occurred_at = request.occurred_at.unwrap_or_else(OffsetDateTime::now_utc);

    let mut store = state.cycle_store;
    let cycle = mutate_active(&mut store, |cycle| {
        cycle
            .add_ride(request.fare, request.distance_km, occurred_at)
            .map(|_| ())
    })?;

    Ok((StatusCode::CREATED, Json(CycleView::from(cycle))))
}

/// A route handler that removes a ride from the open cycle and returns the
/// updated cycle.
pub async fn delete_ride_endpoint<C>(
    State(state): State<AppState<C>>,
    Path(ride_id): Path<EntryId>,
) -> Result<Json<CycleView>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let mut store = state.cycle_store;
    let cycle = mutate_active(&mut store, |cycle| cycle.remove_ride(ride_id).map(|_| ()))?;

    Ok(Json(CycleView::from(cycle)))
}

/// The request body for adding an expense to the open cycle.
#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    /// What the money was spent on.
    pub description: String,
    /// How much was spent, e.g. `"10.00"`.
    pub amount: Money,
    /// When the expense was incurred; defaults to now.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub occurred_at: Option<OffsetDateTime>,
}

/// A route handler that records an expense against the open cycle and
/// returns the updated cycle.
pub async fn create_expense_endpoint<C>(
    State(state): State<AppState<C>>,
    Json(request): Json<ExpenseRequest>,
) -> Result<impl IntoResponse, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let occurred_at = request.occurred_at.unwrap_or_else(OffsetDateTime::now_utc);

    let mut store = state.cycle_store;
    let cycle = mutate_active(&mut store, |cycle| {
        cycle
            .add_expense(&request.description, request.amount, occurred_at)
            .map(|_| ())
    })?;

    Ok((StatusCode::CREATED, Json(CycleView::from(cycle))))
}

/// A route handler that removes an expense from the open cycle and returns
/// the updated cycle.
pub async fn delete_expense_endpoint<C>(
    State(state): State<AppState<C>>,
    Path(expense_id): Path<EntryId>,
) -> Result<Json<CycleView>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let mut store = state.cycle_store;
    let cycle = mutate_active(&mut store, |cycle| {
        cycle.remove_expense(expense_id).map(|_| ())
    })?;

    Ok(Json(CycleView::from(cycle)))
}
