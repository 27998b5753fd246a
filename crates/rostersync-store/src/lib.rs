//! Rostersync store - SQLite-backed ledger
//!
//! Persists every pending and provisioned record, and owns the two queue
//! operations everything else hangs off: claiming a batch of unclaimed
//! records and releasing the claims when the batch completes. Also hosts the
//! enrollment event sequencer, which is pure ledger-state manipulation.

pub mod db;
pub mod errors;
pub mod hook;
pub mod ledger;
pub mod migrations;
pub mod sequencer;

pub use hook::{FastTrackHook, GroupFastTrackHook, NoopFastTrackHook};
pub use ledger::Ledger;
pub use sequencer::EventDisposition;
