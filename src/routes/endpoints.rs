//! The API endpoint URIs.

/// The route for the full application state: the active cycle with its
/// children and totals, plus archived cycle summaries.
pub const STATE: &str = "/api/state";
/// The route to start a new cycle.
pub const CYCLES: &str = "/api/cycles";
/// The route to close the currently open cycle.
pub const CLOSE_CYCLE: &str = "/api/cycles/current/close";
/// The route to reopen the most recently closed cycle.
pub const REOPEN_CYCLE: &str = "/api/cycles/current/reopen";
/// The route to archive the most recently closed cycle.
pub const ARCHIVE_CYCLE: &str = "/api/cycles/current/archive";
/// The route to add a ride to the open cycle.
pub const RIDES: &str = "/api/rides";
/// The route to remove a ride from the open cycle.
pub const DELETE_RIDE: &str = "/api/rides/{ride_id}";
/// The route to add an expense to the open cycle.
pub const EXPENSES: &str = "/api/expenses";
/// The route to remove an expense from the open cycle.
pub const DELETE_EXPENSE: &str = "/api/expenses/{expense_id}";
/// The route to list archived cycle summaries.
pub const ARCHIVES: &str = "/api/archives";
/// The route to bulk-archive closed cycles older than a cutoff.
pub const ARCHIVE_OLDER_THAN: &str = "/api/archives/older_than";
/// The route for historical reports grouped by period.
pub const REPORTS: &str = "/api/reports";
