//! Rostersync engine - resolution, reconciliation, and batch lifecycle
//!
//! Sits between the ledger and the external collaborators: expands claimed
//! course records into payload rows, diffs group membership against the
//! cached downstream state, emits the flat record kinds, and drives each
//! batch from claim through submit and poll to a terminal outcome.

pub mod builders;
pub mod controller;
pub mod reconciler;
pub mod resolver;
pub mod roster;

pub use controller::BatchController;
pub use reconciler::GroupReconciler;
pub use resolver::CourseResolver;
