//! Semantic invariants of a backlog store not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::naming::BRANCH_PREFIX;
use crate::model::BacklogStore;

/// Check semantic invariants:
/// - No duplicate item ids
/// - No issue number shared by two items
/// - Markers are filled in pipeline order (branch needs an issue, a working
///   copy needs a branch)
/// - Recorded branches carry their own issue number
pub fn validate_invariants(store: &BacklogStore) -> Vec<String> {
    let mut errors = Vec::new();
    let mut ids = HashSet::new();
    let mut issues = HashSet::new();

    for item in &store.items {
        let label = format!("item {}", item.id);
        if !ids.insert(item.id) {
            errors.push(format!("duplicate id {}", item.id));
        }
        if let Some(issue) = item.created_issue_number
            && !issues.insert(issue)
        {
            errors.push(format!("{label}: issue #{issue} already used by another item"));
        }
        if item.branch.is_some() && item.created_issue_number.is_none() {
            errors.push(format!("{label}: branch recorded without an issue number"));
        }
        if item.worktree_path.is_some() && item.branch.is_none() {
            errors.push(format!("{label}: working copy recorded without a branch"));
        }
        if let (Some(branch), Some(issue)) = (&item.branch, item.created_issue_number) {
            let expected = format!("{BRANCH_PREFIX}{issue}");
            let matches = branch == &expected || branch.starts_with(&format!("{expected}-"));
            if !matches {
                errors.push(format!(
                    "{label}: branch '{branch}' does not belong to issue #{issue}"
                ));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{issued_item, store_with};

    #[test]
    fn valid_store_has_no_errors() {
        let mut it = issued_item(1, "Fix login", 50, 42);
        it.branch = Some("issue/42-fix-login".to_string());
        assert!(validate_invariants(&store_with(vec![it])).is_empty());
    }

    #[test]
    fn reports_duplicates_and_out_of_order_markers() {
        let mut a = issued_item(1, "a", 50, 7);
        a.branch = Some("issue/8-a".to_string());
        let mut b = issued_item(1, "b", 50, 7);
        b.created_issue_number = None;
        b.branch = Some("issue/9-b".to_string());

        let errors = validate_invariants(&store_with(vec![a, b]));
        assert!(errors.iter().any(|e| e.contains("duplicate id")));
        assert!(errors.iter().any(|e| e.contains("does not belong to issue #7")));
        assert!(errors.iter().any(|e| e.contains("without an issue number")));
    }
}
