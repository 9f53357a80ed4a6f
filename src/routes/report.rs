//! Defines the read-only endpoints for historical review: listing archived
//! cycles and period reports.

use std::ops::RangeInclusive;

use axum::extract::State;
use serde::Deserialize;
use time::Date;

use crate::{
    AppState, Error,
    models::CycleStatus,
    report::{Period, PeriodReport, summarize_cycles},
    stores::{CycleQuery, CycleStore, CycleSummary},
};

use super::extract::{Json, Query};

/// The query parameters for listing archived cycles.
#[derive(Debug, Default, Deserialize)]
pub struct ArchivesParams {
    /// Include only cycles started on or after this date (`YYYY-MM-DD`).
    pub from: Option<String>,
    /// Include only cycles started on or before this date (`YYYY-MM-DD`).
    pub to: Option<String>,
}

/// A route handler listing archived cycle summaries, most recently started
/// first.
pub async fn get_archives_endpoint<C>(
    State(state): State<AppState<C>>,
    Query(params): Query<ArchivesParams>,
) -> Result<Json<Vec<CycleSummary>>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let archived = state.cycle_store.get_query(CycleQuery {
        status: Some(CycleStatus::Archived),
        date_range: parse_date_range(params.from.as_deref(), params.to.as_deref())?,
    })?;

    Ok(Json(archived))
}

/// The query parameters for the period report endpoint.
#[derive(Debug, Deserialize)]
pub struct ReportParams {
    /// The period boundary to group by: `day`, `week`, or `month`.
    pub period: String,
    /// Include only cycles started on or after this date (`YYYY-MM-DD`).
    pub from: Option<String>,
    /// Include only cycles started on or before this date (`YYYY-MM-DD`).
    pub to: Option<String>,
    /// Also include closed (not yet archived) cycles.
    #[serde(default)]
    pub include_closed: bool,
}

/// A route handler producing per-period sums over the archived history.
pub async fn get_report_endpoint<C>(
    State(state): State<AppState<C>>,
    Query(params): Query<ReportParams>,
) -> Result<Json<Vec<PeriodReport>>, Error>
where
    C: CycleStore + Clone + Send + Sync + 'static,
{
    let period = Period::parse(&params.period)?;
    let date_range = parse_date_range(params.from.as_deref(), params.to.as_deref())?;

    let summaries = state.cycle_store.get_query(CycleQuery {
        status: None,
        date_range,
    })?;

    let summaries: Vec<CycleSummary> = summaries
        .into_iter()
        .filter(|summary| match summary.status {
            CycleStatus::Archived => true,
            CycleStatus::Closed => params.include_closed,
            CycleStatus::Open => false,
        })
        .collect();

    Ok(Json(summarize_cycles(&summaries, period)))
}

fn parse_date_range(
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Option<RangeInclusive<Date>>, Error> {
    let from = from.map(parse_date).transpose()?;
    let to = to.map(parse_date).transpose()?;

    Ok(match (from, to) {
        (None, None) => None,
        (from, to) => Some(from.unwrap_or(Date::MIN)..=to.unwrap_or(Date::MAX)),
    })
}

fn parse_date(text: &str) -> Result<Date, Error> {
    let format = time::macros::format_description!("[year]-[month]-[day]");

    Date::parse(text, format)
        .map_err(|_| Error::Validation(format!("\"{text}\" is not a valid date (YYYY-MM-DD)")))
}
