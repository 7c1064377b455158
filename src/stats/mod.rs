//! Per-target statistics and history views.

mod aggregator;
mod segments;

pub use aggregator::*;
pub use segments::*;
