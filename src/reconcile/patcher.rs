//! Budgeted application of a [`Patch`] to a live collection.

use super::diff::Patch;
use crate::types::{Row, RowId};
use std::collections::HashMap;
use tracing::debug;

/// What one application did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    /// Collection equals the target after application.
    pub converged: bool,
    pub removed: usize,
    pub inserted: usize,
    /// Positions (after structural edits) whose content was overwritten.
    pub updated: Vec<usize>,
    /// Budget not consumed.
    pub budget_left: usize,
}

/// Applies patches under a fixed per-cycle operation budget.
///
/// Deletions run highest index first, then insertions lowest index first,
/// then in-place content updates. Each edit costs one unit; a phase stops as
/// soon as the budget is spent and the rest carries into the next phase.
#[derive(Clone, Copy, Debug)]
pub struct BudgetedPatcher {
    max_operations: usize,
}

impl BudgetedPatcher {
    pub fn new(max_operations: usize) -> Self {
        Self { max_operations }
    }

    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    /// Mutate `collection` toward `target`.
    ///
    /// When the outcome is not converged the caller must replace the whole
    /// collection with `target`.
    pub fn apply(&self, patch: &Patch, target: &[Row], collection: &mut Vec<Row>) -> PatchOutcome {
        let mut budget = self.max_operations;
        let mut outcome = PatchOutcome::default();

        let mut removals = patch.removals.clone();
        removals.sort_unstable_by(|a, b| b.cmp(a));
        for index in removals {
            if budget == 0 {
                break;
            }
            if index < collection.len() {
                collection.remove(index);
                outcome.removed += 1;
            }
            budget -= 1;
        }

        let mut insertions: Vec<&(usize, Row)> = patch.insertions.iter().collect();
        insertions.sort_by_key(|(index, _)| *index);
        for (index, row) in insertions {
            if budget == 0 {
                break;
            }
            let at = (*index).min(collection.len());
            collection.insert(at, row.clone());
            outcome.inserted += 1;
            budget -= 1;
        }

        let by_id: HashMap<RowId, &Row> = target.iter().map(|r| (r.id, r)).collect();
        for (position, row) in collection.iter_mut().enumerate() {
            if budget == 0 {
                break;
            }
            if let Some(fresh) = by_id.get(&row.id) {
                if row != *fresh {
                    *row = (*fresh).clone();
                    outcome.updated.push(position);
                    budget -= 1;
                }
            }
        }

        outcome.budget_left = budget;
        outcome.converged = collection.as_slice() == target;
        debug!(
            removed = outcome.removed,
            inserted = outcome.inserted,
            updated = outcome.updated.len(),
            converged = outcome.converged,
            "patch applied"
        );
        outcome
    }
}

/// Apply `patch` with at most `max_operations` edits. Returns whether the
/// collection now equals `target`.
pub fn apply_patch(
    patch: &Patch,
    target: &[Row],
    collection: &mut Vec<Row>,
    max_operations: usize,
) -> bool {
    BudgetedPatcher::new(max_operations)
        .apply(patch, target, collection)
        .converged
}

/// Number of rows present on both sides whose content differs.
pub fn content_changes(current: &[Row], target: &[Row]) -> usize {
    let by_id: HashMap<RowId, &Row> = target.iter().map(|r| (r.id, r)).collect();
    current
        .iter()
        .filter(|row| by_id.get(&row.id).is_some_and(|fresh| *row != *fresh))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::diff::diff;

    fn row(id: i64, odds: &str) -> Row {
        Row {
            id: RowId(id),
            team_a: format!("Team {id}"),
            team_b: "Other".into(),
            time: format!("2025-07-0{}T12:00:00Z", id % 9 + 1),
            odds_a: odds.into(),
            odds_b: odds.into(),
        }
    }

    #[test]
    fn test_converges_within_budget() {
        let old = vec![row(1, "1.00"), row(2, "1.00"), row(3, "1.00")];
        let new = vec![row(4, "1.00"), row(1, "2.00"), row(3, "1.00")];
        let patch = diff(&old, &new);

        let mut held = old.clone();
        let outcome = BudgetedPatcher::new(10).apply(&patch, &new, &mut held);

        assert!(outcome.converged);
        assert_eq!(held, new);
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.updated, vec![1]);
        assert_eq!(outcome.budget_left, 7);
    }

    #[test]
    fn test_exact_budget_converges() {
        let old = vec![row(1, "1.00"), row(2, "1.00")];
        let new = vec![row(2, "3.00"), row(5, "1.00")];
        let patch = diff(&old, &new);
        let needed = patch.len() + content_changes(&old, &new);
        assert_eq!(needed, 3);

        let mut held = old.clone();
        assert!(apply_patch(&patch, &new, &mut held, needed));
        assert_eq!(held, new);
    }

    #[test]
    fn test_budget_exhausted_then_replace() {
        let old: Vec<Row> = (0..10).map(|i| row(i, "1.00")).collect();
        let new: Vec<Row> = (10..20).map(|i| row(i, "1.00")).collect();
        let patch = diff(&old, &new);

        let mut held = old.clone();
        let outcome = BudgetedPatcher::new(5).apply(&patch, &new, &mut held);
        assert!(!outcome.converged);
        assert_eq!(outcome.removed, 5);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.budget_left, 0);

        held = new.clone();
        assert_eq!(held, new);
    }

    #[test]
    fn test_budget_carries_into_content_phase() {
        let old = vec![row(1, "1.00"), row(2, "1.00"), row(3, "1.00")];
        let new = vec![row(1, "2.00"), row(2, "2.00"), row(3, "2.00")];
        let patch = diff(&old, &new);
        assert!(patch.is_empty());

        let mut held = old.clone();
        let outcome = BudgetedPatcher::new(2).apply(&patch, &new, &mut held);
        assert!(!outcome.converged);
        assert_eq!(outcome.updated, vec![0, 1]);
        assert_eq!(held[2].odds_a, "1.00");
    }

    #[test]
    fn test_out_of_range_removal_is_not_converged() {
        let target = vec![row(1, "1.00")];
        let patch = Patch {
            removals: vec![5],
            insertions: vec![],
        };
        let mut held = vec![row(1, "1.00"), row(2, "1.00")];
        assert!(!apply_patch(&patch, &target, &mut held, 10));
    }
}
