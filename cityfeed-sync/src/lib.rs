//! # cityfeed-sync
//!
//! Local half of the puller: content-addressed object store, snapshot
//! builder, `current` pointer, root lock and garbage collection, driven by
//! the [`Reconciler`] state machine.
//!
//! Call [`Reconciler::run`] once per invocation; it converges the root on
//! the version the origins publish, or leaves it untouched on failure.

pub mod activate;
pub mod error;
mod fsutil;
pub mod gc;
pub mod index;
pub mod layout;
pub mod lock;
pub mod reconcile;
pub mod snapshot;
pub mod store;

pub use activate::{active_version, switch_current};
pub use error::SyncError;
pub use gc::{plan_retention, sweep_leftovers, GcReport};
pub use index::SnapshotIndex;
pub use layout::RootLayout;
pub use lock::RootLock;
pub use reconcile::{
    ActivationReport, DryRunPlan, FetchStats, Outcome, Phase, PlannedAction, Reconciler,
};
pub use snapshot::{list_snapshots, BuiltSnapshot, SnapshotBuilder, SnapshotInfo};
pub use store::{Ensured, ObjectStore};

#[cfg(test)]
mod tests;
