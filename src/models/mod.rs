//! The domain models for the cycle accounting core.

mod cycle;
mod expense;
mod ride;

pub use cycle::{Cycle, CycleStatus, Totals};
pub use expense::Expense;
pub use ride::Ride;
