//! Giro is a web app for tracking a ride-hailing driver's shift finances.
//!
//! A driver works in *cycles* (shifts). While a cycle is open, rides and
//! expenses are recorded against it; closing a cycle freezes it for review
//! and archiving seals it permanently for historical reporting.
//!
//! This library provides the cycle accounting core and a JSON REST API on
//! top of it.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde::Serialize;
use tokio::signal;

mod app_state;
mod database_id;
mod db;
mod models;
mod money;
mod report;
mod routes;
mod stores;

pub use app_state::AppState;
pub use database_id::DatabaseID;
pub use db::initialize as initialize_db;
pub use models::{Cycle, CycleStatus, Expense, Ride, Totals};
pub use money::{Distance, Money};
pub use report::{Period, PeriodReport, summarize_cycles};
pub use routes::{build_router, endpoints};
pub use stores::{
    CycleQuery, CycleStore, CycleSummary,
    sqlite::{SQLAppState, SQLiteCycleStore, create_app_state},
};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The request contained a malformed or out-of-range value, e.g. a
    /// negative fare or an empty expense description.
    #[error("{0}")]
    Validation(String),

    /// The operation is not permitted while the cycle is in its current
    /// status, e.g. adding a ride to a closed cycle.
    #[error("{0}")]
    InvalidState(String),

    /// An attempt was made to start a cycle while another one is still open.
    #[error("a cycle is already open")]
    CycleAlreadyOpen,

    /// The referenced cycle, ride, or expense does not exist.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The cycle was modified by another request since it was loaded.
    ///
    /// Callers should reload the aggregate and retry at most once before
    /// surfacing the error.
    #[error("the cycle was modified by a concurrent request")]
    WriteConflict,

    /// Could not acquire the database lock.
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl Error {
    /// The stable error kind string used in JSON error bodies.
    ///
    /// The transport layer maps these kinds to HTTP status codes; clients
    /// should branch on the kind, not the message.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::InvalidState(_) => "InvalidStateError",
            Error::CycleAlreadyOpen => "ConflictError",
            Error::NotFound => "NotFoundError",
            Error::WriteConflict | Error::DatabaseLockError | Error::SqlError(_) => {
                "PersistenceError"
            }
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::InvalidState(_) | Error::CycleAlreadyOpen => StatusCode::CONFLICT,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::WriteConflict | Error::DatabaseLockError | Error::SqlError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

/// The JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// One of the stable kind strings from [Error::kind].
    pub kind: &'static str,
    /// A human readable description of what went wrong.
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("An unexpected error occurred: {}", self);
        }

        let body = ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
