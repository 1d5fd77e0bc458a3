//! Injectable sources of time and identity.
//!
//! Snapshot names, snapshot ids and diff-job timestamps are produced on the
//! leader only. Routing them through these providers keeps production code on
//! the real clock and random ids while tests pin both for reproducible runs.

mod clock;
mod ids;

pub use clock::{Clock, MockClock, SystemClock};
pub use ids::{IdProvider, RandomIds, SequentialIds};
