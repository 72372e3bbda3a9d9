//! `backlog merge-pr` and `backlog cleanup`: finish an item by merging its
//! pull request and closing the local working copy bound to its branch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::types::{ChecksStatus, MergeMethod};
use crate::errors::PipelineError;
use crate::io::git::Vcs;
use crate::io::tracker::Tracker;
use crate::model::{BacklogStore, timestamp_now};

/// Which branch a standalone cleanup targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupSelector {
    Branch(String),
    /// Pull request number or URL; its head branch is cleaned.
    Pr(String),
    /// The branch recorded on the item with this issue.
    Issue(u64),
}

impl CleanupSelector {
    /// Exactly one selector must be given.
    pub fn from_args(
        branch: Option<String>,
        pr: Option<String>,
        issue: Option<u64>,
    ) -> Result<Self, PipelineError> {
        match (branch, pr, issue) {
            (Some(branch), None, None) => Ok(Self::Branch(branch)),
            (None, Some(pr), None) => Ok(Self::Pr(pr)),
            (None, None, Some(issue)) => Ok(Self::Issue(issue)),
            (None, None, None) => Err(PipelineError::Usage(
                "cleanup needs one of --branch, --pr or --issue".to_string(),
            )),
            _ => Err(PipelineError::Usage(
                "cleanup takes only one of --branch, --pr or --issue".to_string(),
            )),
        }
    }
}

/// What the local cleanup did. The two outcomes are independent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub branch: String,
    pub worktree_closed: bool,
    pub branch_deleted: bool,
    /// Set when the working copy was left alone because it contains the
    /// current directory.
    pub skipped_current_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions<'a> {
    pub pr: &'a str,
    pub method: MergeMethod,
    /// Keep the remote branch and the local working copy.
    pub keep_branch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub pr: String,
    pub branch: String,
    /// `None` when the branch was kept.
    pub cleanup: Option<CleanupReport>,
}

/// Resolve the branch named by `selector`.
pub fn resolve_target_branch<T: Tracker>(
    selector: &CleanupSelector,
    store: &BacklogStore,
    tracker: &T,
) -> Result<String> {
    match selector {
        CleanupSelector::Branch(branch) => Ok(branch.clone()),
        CleanupSelector::Pr(pr) => tracker
            .pull_request_head(pr)
            .with_context(|| format!("resolve head branch of pull request {pr}")),
        CleanupSelector::Issue(issue) => {
            let item = store.find_by_issue(*issue).ok_or_else(|| {
                PipelineError::Precondition(format!("no backlog item has issue #{issue}"))
            })?;
            let branch = item.branch.clone().ok_or_else(|| {
                PipelineError::Precondition(format!("issue #{issue} has no recorded branch"))
            })?;
            Ok(branch)
        }
    }
}

/// Merge a pull request once its required checks allow it, then close the
/// local working copy unless the branch is kept.
pub fn merge_pull_request<V: Vcs, T: Tracker>(
    store: &mut BacklogStore,
    vcs: &V,
    tracker: &T,
    options: MergeOptions<'_>,
    cwd: &Path,
) -> Result<MergeReport> {
    let pr = options.pr;
    let branch = tracker
        .pull_request_head(pr)
        .with_context(|| format!("resolve head branch of pull request {pr}"))?;

    let checks = tracker
        .required_checks(pr)
        .with_context(|| format!("read required checks of pull request {pr}"))?;
    if !checks.allows_merge() {
        return Err(checks_error(pr, &checks).into());
    }

    let delete_branch = !options.keep_branch;
    tracker
        .merge_pull_request(pr, options.method, delete_branch)
        .with_context(|| format!("merge pull request {pr} ({branch})"))?;
    info!(pr, %branch, method = options.method.flag(), "pull request merged");

    let cleanup = if delete_branch {
        Some(cleanup_branch(store, vcs, &branch, cwd)?)
    } else {
        None
    };
    Ok(MergeReport {
        pr: pr.to_string(),
        branch,
        cleanup,
    })
}

fn checks_error(pr: &str, checks: &ChecksStatus) -> PipelineError {
    let detail = match checks {
        ChecksStatus::Failing(names) => format!("failing: {}", names.join(", ")),
        _ => "still pending".to_string(),
    };
    PipelineError::Precondition(format!(
        "required checks on pull request {pr} do not allow a merge ({detail})"
    ))
}

/// Remove the working copy bound to `branch` and delete the local branch.
///
/// Nothing is removed when `cwd` is inside that working copy. The item
/// carrying the branch is marked cleaned up only once the working copy is
/// closed and the local branch is gone.
pub fn cleanup_branch<V: Vcs>(
    store: &mut BacklogStore,
    vcs: &V,
    branch: &str,
    cwd: &Path,
) -> Result<CleanupReport> {
    let mut report = CleanupReport {
        branch: branch.to_string(),
        worktree_closed: false,
        branch_deleted: false,
        skipped_current_dir: None,
    };

    let worktrees = vcs.list_worktrees().context("list worktrees")?;
    let bound = worktrees
        .iter()
        .find(|entry| entry.branch.as_deref() == Some(branch));

    let mut worktree_left = false;
    if let Some(entry) = bound {
        if contains(&entry.path, cwd) {
            warn!(
                %branch,
                path = %entry.path.display(),
                "current directory is inside the working copy; leaving it in place"
            );
            report.skipped_current_dir = Some(entry.path.clone());
            return Ok(report);
        }
        let removed = if entry.is_live() {
            vcs.remove_worktree(&entry.path)
        } else {
            vcs.prune_worktrees()
        };
        match removed {
            Ok(()) => {
                info!(%branch, path = %entry.path.display(), "working copy closed");
                report.worktree_closed = true;
            }
            Err(err) => {
                warn!(
                    %branch,
                    path = %entry.path.display(),
                    error = %format!("{err:#}"),
                    "could not remove working copy"
                );
                worktree_left = true;
            }
        }
    }

    let had_branch = vcs.local_branch_exists(branch)?;
    if had_branch {
        match vcs.delete_local_branch(branch) {
            Ok(()) => {
                info!(%branch, "local branch deleted");
                report.branch_deleted = true;
            }
            Err(err) => warn!(
                %branch,
                error = %format!("{err:#}"),
                "could not delete local branch"
            ),
        }
    }

    if worktree_left || (had_branch && !report.branch_deleted) {
        warn!(%branch, "cleanup incomplete; item stays schedulable");
    } else if let Some(item) = store.find_by_branch_mut(branch) {
        item.cleaned_up_at = Some(timestamp_now());
    }
    Ok(report)
}

fn contains(worktree: &Path, cwd: &Path) -> bool {
    let worktree = worktree
        .canonicalize()
        .unwrap_or_else(|_| worktree.to_path_buf());
    let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());
    cwd.starts_with(worktree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeTracker, FakeVcs, canonical_tempdir, issued_item, store_with};

    fn branched_store(branch: &str) -> BacklogStore {
        let mut it = issued_item(1, "Fix login", 55, 42);
        it.branch = Some(branch.to_string());
        store_with(vec![it])
    }

    #[test]
    fn selector_requires_exactly_one() {
        assert_eq!(
            CleanupSelector::from_args(None, None, Some(4)).expect("one"),
            CleanupSelector::Issue(4)
        );
        assert!(matches!(
            CleanupSelector::from_args(None, None, None),
            Err(PipelineError::Usage(_))
        ));
        assert!(matches!(
            CleanupSelector::from_args(Some("b".to_string()), Some("7".to_string()), None),
            Err(PipelineError::Usage(_))
        ));
    }

    #[test]
    fn issue_selector_uses_recorded_branch() {
        let store = branched_store("issue/42-fix-login");
        let tracker = FakeTracker::new();
        let branch = resolve_target_branch(&CleanupSelector::Issue(42), &store, &tracker)
            .expect("resolve");
        assert_eq!(branch, "issue/42-fix-login");

        let bare = store_with(vec![issued_item(1, "Fix login", 55, 43)]);
        let err = resolve_target_branch(&CleanupSelector::Issue(43), &bare, &tracker)
            .expect_err("no branch");
        assert!(err.to_string().contains("no recorded branch"));
    }

    #[test]
    fn removes_worktree_and_branch_and_marks_item() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        let wt = root.join("issue-42-fix-login");
        vcs.add_worktree(&wt, "issue/42-fix-login");
        let mut store = branched_store("issue/42-fix-login");

        let report =
            cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &root).expect("cleanup");
        assert!(report.worktree_closed);
        assert!(report.branch_deleted);
        assert!(report.skipped_current_dir.is_none());
        assert!(vcs.worktrees.borrow().is_empty());
        assert!(store.items[0].cleaned_up_at.is_some());
    }

    #[test]
    fn never_removes_the_current_working_copy() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        let wt = root.join("issue-42-fix-login");
        vcs.add_worktree(&wt, "issue/42-fix-login");
        let cwd = wt.join("src");
        std::fs::create_dir_all(&cwd).expect("mkdir");
        let mut store = branched_store("issue/42-fix-login");

        let report = cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &cwd).expect("cleanup");
        assert_eq!(report.skipped_current_dir.as_deref(), Some(wt.as_path()));
        assert!(!report.worktree_closed);
        assert!(!report.branch_deleted);
        assert!(vcs.calls_starting_with("remove").is_empty());
        assert!(vcs.calls_starting_with("delete").is_empty());
        assert!(store.items[0].cleaned_up_at.is_none());
    }

    #[test]
    fn failed_removal_leaves_item_unmarked() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        vcs.remove_fails.set(true);
        vcs.add_worktree(&root.join("issue-42-fix-login"), "issue/42-fix-login");
        let mut store = branched_store("issue/42-fix-login");

        let report =
            cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &root).expect("cleanup");
        assert!(!report.worktree_closed);
        assert!(store.items[0].cleaned_up_at.is_none());
        assert_eq!(vcs.worktrees.borrow().len(), 1);
    }

    #[test]
    fn hand_deleted_working_copy_is_pruned() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        let path = root.join("issue-42-fix-login");
        vcs.add_worktree(&path, "issue/42-fix-login");
        std::fs::remove_dir_all(&path).expect("remove dir");
        let mut store = branched_store("issue/42-fix-login");

        let report =
            cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &root).expect("cleanup");
        assert!(report.worktree_closed);
        assert!(vcs.calls.borrow().iter().any(|call| call == "prune"));
        assert!(vcs.worktrees.borrow().is_empty());
        assert!(store.items[0].cleaned_up_at.is_some());
    }

    #[test]
    fn undeletable_branch_leaves_item_unmarked() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        vcs.delete_fails.set(true);
        vcs.local_branches
            .borrow_mut()
            .insert("issue/42-fix-login".to_string());
        let mut store = branched_store("issue/42-fix-login");

        let report =
            cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &root).expect("cleanup");
        assert!(!report.branch_deleted);
        assert!(store.items[0].cleaned_up_at.is_none());
    }

    #[test]
    fn branch_already_gone_still_marks_item() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        let mut store = branched_store("issue/42-fix-login");

        let report =
            cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &root).expect("cleanup");
        assert!(!report.worktree_closed && !report.branch_deleted);
        assert!(store.items[0].cleaned_up_at.is_some());
    }

    #[test]
    fn branch_without_worktree_is_still_deleted() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        vcs.local_branches
            .borrow_mut()
            .insert("issue/42-fix-login".to_string());
        let mut store = branched_store("issue/42-fix-login");

        let report =
            cleanup_branch(&mut store, &vcs, "issue/42-fix-login", &root).expect("cleanup");
        assert!(!report.worktree_closed);
        assert!(report.branch_deleted);
    }

    #[test]
    fn failing_checks_block_the_merge() {
        let (_temp, root) = canonical_tempdir();
        let tracker = FakeTracker::new();
        tracker
            .pr_heads
            .borrow_mut()
            .insert("501".to_string(), "issue/42-fix-login".to_string());
        *tracker.checks.borrow_mut() = ChecksStatus::Failing(vec!["ci / test".to_string()]);
        let mut store = branched_store("issue/42-fix-login");

        let err = merge_pull_request(
            &mut store,
            &FakeVcs::new(),
            &tracker,
            MergeOptions {
                pr: "501",
                method: MergeMethod::Squash,
                keep_branch: false,
            },
            &root,
        )
        .expect_err("checks failing");
        assert!(err.to_string().contains("ci / test"));
        assert!(tracker.merges.borrow().is_empty());
    }

    #[test]
    fn merge_deletes_branch_and_closes_worktree() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        vcs.add_worktree(&root.join("issue-42-fix-login"), "issue/42-fix-login");
        let tracker = FakeTracker::new();
        tracker
            .pr_heads
            .borrow_mut()
            .insert("501".to_string(), "issue/42-fix-login".to_string());
        *tracker.checks.borrow_mut() = ChecksStatus::NoneRequired;
        let mut store = branched_store("issue/42-fix-login");

        let report = merge_pull_request(
            &mut store,
            &vcs,
            &tracker,
            MergeOptions {
                pr: "501",
                method: MergeMethod::Rebase,
                keep_branch: false,
            },
            &root,
        )
        .expect("merge");
        assert_eq!(
            tracker.merges.borrow()[0],
            ("501".to_string(), MergeMethod::Rebase, true)
        );
        let cleanup = report.cleanup.expect("cleanup ran");
        assert!(cleanup.worktree_closed && cleanup.branch_deleted);
    }

    #[test]
    fn keep_branch_skips_local_cleanup() {
        let (_temp, root) = canonical_tempdir();
        let vcs = FakeVcs::new();
        vcs.add_worktree(&root.join("issue-42-fix-login"), "issue/42-fix-login");
        let tracker = FakeTracker::new();
        tracker
            .pr_heads
            .borrow_mut()
            .insert("501".to_string(), "issue/42-fix-login".to_string());
        let mut store = branched_store("issue/42-fix-login");

        let report = merge_pull_request(
            &mut store,
            &vcs,
            &tracker,
            MergeOptions {
                pr: "501",
                method: MergeMethod::default(),
                keep_branch: true,
            },
            &root,
        )
        .expect("merge");
        assert!(report.cleanup.is_none());
        assert!(!tracker.merges.borrow()[0].2);
        assert_eq!(vcs.worktrees.borrow().len(), 1);
    }
}
