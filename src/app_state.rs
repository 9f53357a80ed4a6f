//! Implements a struct that holds the state of the REST server.

use crate::stores::CycleStore;

/// The state of the REST server.
#[derive(Debug, Clone)]
pub struct AppState<C>
where
    C: CycleStore + Clone + Send + Sync,
{
    /// The store for cycles and their child records.
    pub cycle_store: C,
}

impl<C> AppState<C>
where
    C: CycleStore + Clone + Send + Sync,
{
    /// Create a new [AppState] over `cycle_store`.
    pub fn new(cycle_store: C) -> Self {
        Self { cycle_store }
    }
}
