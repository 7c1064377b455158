//! Persisted monitoring state.
//!
//! A single JSON document, read once at startup and written once at shutdown.

mod models;
mod store;

pub use models::*;
pub use store::*;
