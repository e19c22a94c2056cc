//! Property tests for diffing and budgeted patch application.

use parking_lot::Mutex;
use proptest::prelude::*;
use rowsync::reconcile::{content_changes, diff, reconcile_once, BudgetedPatcher, CycleReport};
use rowsync::{Row, RowId};

fn row(id: i64, salt: i64) -> Row {
    Row {
        id: RowId(id),
        team_a: format!("Team {id}"),
        team_b: "Rivals".into(),
        time: format!("2025-07-{:02}T12:00:00Z", id % 28 + 1),
        odds_a: format!("{}.00", (id + salt) % 3 + 1),
        odds_b: "2.00".into(),
    }
}

/// Unique ids in arbitrary order.
fn arb_ids() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::hash_set(0i64..40, 0..20)
        .prop_map(|ids| ids.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn rows(ids: &[i64], salt: i64) -> Vec<Row> {
    ids.iter().map(|&id| row(id, salt)).collect()
}

proptest! {
    /// Removals then insertions turn the old id order into the new one.
    #[test]
    fn diff_replays_to_new_order(old in arb_ids(), new in arb_ids()) {
        let old_rows = rows(&old, 0);
        let new_rows = rows(&new, 0);
        let patch = diff(&old_rows, &new_rows);

        let mut replay = old_rows.clone();
        for &index in patch.removals.iter().rev() {
            replay.remove(index);
        }
        for (index, row) in &patch.insertions {
            replay.insert(*index, row.clone());
        }

        let ids: Vec<i64> = replay.iter().map(|r| r.id.0).collect();
        prop_assert_eq!(ids, new);
    }

    /// Identical sequences need no structural edits.
    #[test]
    fn diff_is_minimal_for_identical(ids in arb_ids()) {
        let patch = diff(&rows(&ids, 0), &rows(&ids, 0));
        prop_assert!(patch.is_empty());
    }

    /// Enough budget always converges.
    #[test]
    fn patch_converges_within_budget(old in arb_ids(), new in arb_ids(), salt in 0i64..3) {
        let mut collection = rows(&old, 0);
        let target = rows(&new, salt);
        let patch = diff(&collection, &target);
        let budget = patch.len() + content_changes(&collection, &target);

        let outcome = BudgetedPatcher::new(budget).apply(&patch, &target, &mut collection);
        prop_assert!(outcome.converged);
        prop_assert_eq!(collection, target);
    }

    /// Too little budget never converges, and replacement recovers.
    #[test]
    fn exhausted_budget_falls_back(old in arb_ids(), new in arb_ids()) {
        let current = rows(&old, 0);
        let target = rows(&new, 1);
        let patch = diff(&current, &target);
        prop_assume!(patch.len() > 1);

        let mut collection = current.clone();
        let outcome = BudgetedPatcher::new(patch.len() - 1).apply(&patch, &target, &mut collection);
        prop_assert!(!outcome.converged);

        let held = Mutex::new(current);
        let report = reconcile_once(&held, &target, &BudgetedPatcher::new(patch.len() - 1));
        prop_assert_eq!(report, CycleReport::Replaced { len: target.len() });
        prop_assert_eq!(&*held.lock(), &target);
    }
}

#[test]
fn test_single_move_is_one_removal_one_insertion() {
    let old = rows(&[1, 2, 3, 4], 0);
    let new = rows(&[2, 3, 4, 1], 0);
    let patch = diff(&old, &new);
    assert_eq!(patch.removals, vec![0]);
    assert_eq!(patch.insertions.len(), 1);
    assert_eq!(patch.insertions[0].0, 3);
}

#[test]
fn test_content_only_change_costs_budget() {
    let mut collection = rows(&[1, 2, 3], 0);
    let target = rows(&[1, 2, 3], 1);
    let patch = diff(&collection, &target);
    assert!(patch.is_empty());

    let changes = content_changes(&collection, &target);
    assert!(changes > 0);
    let outcome = BudgetedPatcher::new(changes).apply(&patch, &target, &mut collection);
    assert!(outcome.converged);
    assert_eq!(outcome.updated.len(), changes);
}
