//! Contains traits and implementations for objects that store the domain
//! [models](crate::models).

mod cycle;

pub mod sqlite;

pub use cycle::{CycleQuery, CycleStore, CycleSummary};
