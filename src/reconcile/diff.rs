//! Minimal edit script between two uniquely-keyed row sequences.

use crate::types::{Row, RowId};
use std::collections::HashMap;

/// Structural edits turning an old snapshot into a new one.
///
/// Removals are positions in the old snapshot, ascending. Insertions are
/// positions in the new snapshot, ascending, carrying the full new row.
/// Content-only changes are not represented here; the patcher handles them
/// as a separate pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    pub removals: Vec<usize>,
    pub insertions: Vec<(usize, Row)>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.insertions.is_empty()
    }

    /// Number of structural edits.
    pub fn len(&self) -> usize {
        self.removals.len() + self.insertions.len()
    }
}

/// Compute the patch from `old` to `new`. Ids must be unique within each side.
pub fn diff(old: &[Row], new: &[Row]) -> Patch {
    let old_ids: Vec<RowId> = old.iter().map(|r| r.id).collect();
    let new_ids: Vec<RowId> = new.iter().map(|r| r.id).collect();
    let (removals, inserted) = diff_ids(&old_ids, &new_ids);

    Patch {
        removals,
        insertions: inserted.into_iter().map(|j| (j, new[j].clone())).collect(),
    }
}

/// Id-level diff: `(removed old positions, inserted new positions)`.
///
/// With unique ids the longest common subsequence is the longest increasing
/// run of old positions taken in new order, found by patience sorting.
pub fn diff_ids(old: &[RowId], new: &[RowId]) -> (Vec<usize>, Vec<usize>) {
    let old_pos: HashMap<RowId, usize> = old.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    // (new position, old position) for ids present on both sides.
    let shared: Vec<(usize, usize)> = new
        .iter()
        .enumerate()
        .filter_map(|(j, id)| old_pos.get(id).map(|&i| (j, i)))
        .collect();

    let kept = longest_increasing(&shared);

    let mut keep_old = vec![false; old.len()];
    let mut keep_new = vec![false; new.len()];
    for &k in &kept {
        let (j, i) = shared[k];
        keep_new[j] = true;
        keep_old[i] = true;
    }

    let removals = (0..old.len()).filter(|&i| !keep_old[i]).collect();
    let insertions = (0..new.len()).filter(|&j| !keep_new[j]).collect();
    (removals, insertions)
}

/// Indices into `pairs` forming a longest run strictly increasing in `.1`.
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<usize> {
    // tails[l] = index into pairs of the smallest tail of a run of length l+1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];

    for (k, &(_, value)) in pairs.iter().enumerate() {
        let len = tails.partition_point(|&t| pairs[t].1 < value);
        if len > 0 {
            prev[k] = Some(tails[len - 1]);
        }
        if len == tails.len() {
            tails.push(k);
        } else {
            tails[len] = k;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(k) = cursor {
        run.push(k);
        cursor = prev[k];
    }
    run.reverse();
    run
}
