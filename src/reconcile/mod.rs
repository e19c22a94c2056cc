//! List reconciliation.
//!
//! - [`diff`]: pure minimal edit script between two keyed snapshots
//! - [`BudgetedPatcher`]: applies a script under a per-cycle edit budget
//! - [`ReconcileWorker`]: serializes cycles over a held collection, keeping
//!   only the latest pending target
//!
//! # Example
//!
//! ```ignore
//! let patch = diff(&held, &fresh);
//! if !apply_patch(&patch, &fresh, &mut held, 100) {
//!     held = fresh.clone();
//! }
//! ```

mod cycle;
mod diff;
mod patcher;

pub use cycle::{reconcile_once, CycleReport, ReconcileWorker};
pub use diff::{diff, diff_ids, Patch};
pub use patcher::{apply_patch, content_changes, BudgetedPatcher, PatchOutcome};
