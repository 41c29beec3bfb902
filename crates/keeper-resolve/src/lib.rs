//! Save-state arbitration: is this contact already saved?
//!
//! [`DecisionEngine`] answers with a strictly ordered chain of checks and
//! stops at the first hit: the local ledger, then device-local phonebook
//! evidence, then the merged directory, then a one-off remote lookup. Hits
//! from anything but the ledger are written back through the ledger's
//! write-and-invalidate funnel so the next resolution short-circuits.
//!
//! Remote checks that fail are logged and treated as inconclusive: the
//! engine answers `NotSaved`. A wrong prompt costs the contact one "no"; a
//! wrong `AlreadySaved` permanently hides a real contact.

mod decision_engine;

pub use decision_engine::{
    AggregatorInvalidation, DecisionEngine, NameEvidence, ResolveOptions, SaveState,
};
