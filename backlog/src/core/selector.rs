//! Deterministic selection logic for the worktree scheduler.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::model::BacklogItem;

/// Indices of all items, highest priority score first.
///
/// The sort is stable: equal scores keep their store (intake) order.
pub fn by_priority(items: &[BacklogItem]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|a, b| items[*b].priority_score.cmp(&items[*a].priority_score));
    order
}

/// Indices of items that may hold a working-copy slot, in claim order.
///
/// Eligible items carry an issue number and have not been cleaned up.
pub fn scheduling_candidates(items: &[BacklogItem]) -> Vec<usize> {
    by_priority(items)
        .into_iter()
        .filter(|&idx| items[idx].is_issued() && items[idx].cleaned_up_at.is_none())
        .collect()
}

/// Working copies that live strictly below `root`.
///
/// `worktrees` is the version-control system's own listing; anything outside
/// the root (including the main checkout) does not count against the cap.
pub fn active_under_root(worktrees: &[PathBuf], root: &Path) -> BTreeSet<PathBuf> {
    worktrees
        .iter()
        .filter(|path| path.starts_with(root) && path.as_path() != root)
        .cloned()
        .collect()
}
