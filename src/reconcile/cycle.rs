//! Serialized, latest-wins reconciliation cycles.
//!
//! Only one cycle mutates the held collection at a time. Targets arriving
//! while a cycle is running overwrite each other in a single pending slot,
//! so the next cycle always works toward the newest target.

use super::diff::diff;
use super::patcher::BudgetedPatcher;
use crate::types::Row;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Result of one reconciliation cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleReport {
    /// The budgeted patch converged.
    Patched {
        removed: usize,
        inserted: usize,
        updated: Vec<usize>,
    },
    /// The patch ran out of budget and the collection was replaced.
    Replaced { len: usize },
}

/// Run one cycle against `rows`.
///
/// The diff is computed on a copy without holding the lock; the lock is held
/// only while the patch (and the replacement fallback) is applied.
pub fn reconcile_once(
    rows: &Mutex<Vec<Row>>,
    target: &[Row],
    patcher: &BudgetedPatcher,
) -> CycleReport {
    let current = rows.lock().clone();
    let patch = diff(&current, target);

    let mut held = rows.lock();
    let outcome = patcher.apply(&patch, target, &mut held);
    if outcome.converged {
        CycleReport::Patched {
            removed: outcome.removed,
            inserted: outcome.inserted,
            updated: outcome.updated,
        }
    } else {
        info!(
            edits = patch.len(),
            budget = patcher.max_operations(),
            "patch budget exhausted, replacing collection"
        );
        *held = target.to_vec();
        CycleReport::Replaced { len: held.len() }
    }
}

/// Background worker owning the mutation path of a held collection.
pub struct ReconcileWorker {
    pending: Arc<Mutex<Option<Vec<Row>>>>,
    wake: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ReconcileWorker {
    /// Spawn a worker reconciling `rows`. `on_cycle` runs after each cycle,
    /// outside the collection lock.
    pub fn spawn<F>(rows: Arc<Mutex<Vec<Row>>>, patcher: BudgetedPatcher, on_cycle: F) -> Self
    where
        F: FnMut(CycleReport) + Send + 'static,
    {
        let pending = Arc::new(Mutex::new(None));
        let (wake, woken) = bounded(1);
        let slot = Arc::clone(&pending);
        let handle = thread::Builder::new()
            .name("rowsync-reconcile".into())
            .spawn(move || run(rows, patcher, slot, woken, on_cycle))
            .ok();
        Self {
            pending,
            wake: Some(wake),
            handle,
        }
    }

    /// Queue `target`, superseding any target not yet picked up.
    pub fn submit(&self, target: Vec<Row>) {
        if self.pending.lock().replace(target).is_some() {
            debug!("superseded pending reconcile target");
        }
        // A full channel already guarantees another cycle.
        if let Some(wake) = &self.wake {
            let _ = wake.try_send(());
        }
    }
}

impl Drop for ReconcileWorker {
    fn drop(&mut self) {
        self.pending.lock().take();
        // Dropping the only sender ends the worker loop.
        self.wake.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<F>(
    rows: Arc<Mutex<Vec<Row>>>,
    patcher: BudgetedPatcher,
    pending: Arc<Mutex<Option<Vec<Row>>>>,
    woken: Receiver<()>,
    mut on_cycle: F,
) where
    F: FnMut(CycleReport),
{
    while woken.recv().is_ok() {
        let Some(target) = pending.lock().take() else {
            continue;
        };
        let report = reconcile_once(&rows, &target, &patcher);
        on_cycle(report);
    }
    debug!("reconcile worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RowId;
    use std::time::Duration;

    fn row(id: i64) -> Row {
        Row {
            id: RowId(id),
            team_a: "A".into(),
            team_b: "B".into(),
            time: "2025-07-06T12:00:00Z".into(),
            odds_a: "1.00".into(),
            odds_b: "1.00".into(),
        }
    }

    #[test]
    fn test_reconcile_once_patches() {
        let rows = Mutex::new(vec![row(1), row(2)]);
        let target = vec![row(2), row(3)];
        let report = reconcile_once(&rows, &target, &BudgetedPatcher::new(10));
        assert_eq!(
            report,
            CycleReport::Patched {
                removed: 1,
                inserted: 1,
                updated: vec![]
            }
        );
        assert_eq!(*rows.lock(), target);
    }

    #[test]
    fn test_reconcile_once_falls_back() {
        let rows = Mutex::new((0..5).map(row).collect());
        let target: Vec<Row> = (5..10).map(row).collect();
        let report = reconcile_once(&rows, &target, &BudgetedPatcher::new(3));
        assert_eq!(report, CycleReport::Replaced { len: 5 });
        assert_eq!(*rows.lock(), target);
    }

    #[test]
    fn test_worker_converges_on_latest_target() {
        let rows = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = ReconcileWorker::spawn(Arc::clone(&rows), BudgetedPatcher::new(100), move |r| {
            let _ = tx.send(r);
        });

        worker.submit(vec![row(1)]);
        worker.submit(vec![row(1), row(2)]);
        worker.submit(vec![row(3), row(2)]);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while *rows.lock() != vec![row(3), row(2)] && std::time::Instant::now() < deadline {
            let _ = rx.recv_timeout(Duration::from_millis(50));
        }
        assert_eq!(*rows.lock(), vec![row(3), row(2)]);
        drop(worker);
    }
}
