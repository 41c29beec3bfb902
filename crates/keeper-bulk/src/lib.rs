//! Bulk contact resolution without a human in the loop.
//!
//! Resolves a large candidate set (typically the whole chat history) against
//! the decision engine and writes the unsaved ones straight to the external
//! address book under a passively derived name, with no capture dialog. A small
//! fixed worker pool pulls candidates from a shared queue, and every worker
//! sleeps a fixed interval after each write out of respect for remote rate
//! limits. Progress lands in the ledger per item, so a crash mid-run keeps
//! everything already processed.

mod bulk_runner;

pub use bulk_runner::{
    BulkCandidate, BulkItemReport, BulkOutcome, BulkRunOptions, BulkRunReport, BulkRunner,
};
