//! Defines the endpoints for cycle lifecycle transitions: start, close,
//! reopen, and archive.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AppState, Error, stores::CycleStore};

use super::{CycleView, extract::Json, mutate_active, mutate_latest_closed};

/// A route handler for starting a new cycle.
///
/// Fails with a `ConflictError` if a cycle is already open.
pub async fn start_cycle_endpoint<C>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let mut store = state.cycle_store;
    let cycle = store.create(OffsetDateTime::now_utc())?;

    tracing::info!("started cycle {}", cycle.id());

    Ok((StatusCode::CREATED, Json(CycleView::from(cycle))))
}

/// The optional request body for closing a cycle.
#[derive(Debug, Default, Deserialize)]
pub struct CloseRequest {
    /// A free-text note to keep with the cycle, e.g. "rained all evening".
    pub note: Option<String>,
}

/// A route handler that closes the currently open cycle.
pub async fn close_cycle_endpoint<C>(
    State(state): State<AppState<C>>,
    body: Option<Json<CloseRequest>>,
) -> Result<Json<CycleView>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let note = body.map(|Json(body)| body.note).unwrap_or_default();
    let closed_at = OffsetDateTime::now_utc();

    let mut store = state.cycle_store;
    let cycle = mutate_active(&mut store, |cycle| cycle.close(closed_at, note.clone()))?;

    tracing::info!("closed cycle {}", cycle.id());

    Ok(Json(CycleView::from(cycle)))
}

/// A route handler that reopens the most recently closed cycle for
/// corrections.
pub async fn reopen_cycle_endpoint<C>(
    State(state): State<AppState<C>>,
) -> Result<Json<CycleView>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let mut store = state.cycle_store;
    let cycle = mutate_latest_closed(&mut store, |cycle| cycle.reopen())?;

    tracing::info!("reopened cycle {}", cycle.id());

    Ok(Json(CycleView::from(cycle)))
}

/// A route handler that archives the most recently closed cycle,
/// permanently sealing it.
pub async fn archive_cycle_endpoint<C>(
    State(state): State<AppState<C>>,
) -> Result<Json<CycleView>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let mut store = state.cycle_store;
    let cycle = mutate_latest_closed(&mut store, |cycle| cycle.archive())?;

    tracing::info!("archived cycle {}", cycle.id());

    Ok(Json(CycleView::from(cycle)))
}

/// The request body for the bulk archive endpoint.
#[derive(Debug, Deserialize)]
pub struct ArchiveOlderThanRequest {
    /// Closed cycles whose close time is at or before this instant are
    /// archived.
    #[serde(with = "time::serde::rfc3339")]
    pub cutoff: OffsetDateTime,
}

/// The response body for the bulk archive endpoint.
#[derive(Debug, Serialize)]
pub struct ArchiveOlderThanResponse {
    /// How many cycles were archived.
    pub archived: usize,
}

/// A route handler that archives every closed cycle older than a cutoff.
pub async fn archive_older_than_endpoint<C>(
    State(state): State<AppState<C>>,
    Json(body): Json<ArchiveOlderThanRequest>,
) -> Result<Json<ArchiveOlderThanResponse>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let mut store = state.cycle_store;
    let archived = store.archive_older_than(body.cutoff)?;

    tracing::info!("bulk archived {archived} cycles");

    Ok(Json(ArchiveOlderThanResponse { archived }))
}
