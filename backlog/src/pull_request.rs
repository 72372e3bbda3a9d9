//! `backlog create-pr`: open a pull request for an item's working copy.

use anyhow::{Context, Result};
use tracing::info;

use crate::errors::PipelineError;
use crate::io::git::Vcs;
use crate::io::render::Templates;
use crate::io::tracker::{PullRequestRequest, Tracker};
use crate::model::BacklogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrOptions<'a> {
    pub issue: u64,
    /// Target branch; the repository default when unset.
    pub base: Option<&'a str>,
    /// Open ready for review instead of as a draft.
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrOutcome {
    Created(String),
    /// The item already recorded a pull request; nothing was pushed.
    Existing(String),
}

impl PrOutcome {
    pub fn url(&self) -> &str {
        match self {
            Self::Created(url) | Self::Existing(url) => url,
        }
    }
}

/// Push the item's branch and open a pull request for it.
pub fn create_pull_request<V: Vcs, T: Tracker>(
    store: &mut BacklogStore,
    vcs: &V,
    tracker: &T,
    templates: &Templates,
    remote: &str,
    options: PrOptions<'_>,
) -> Result<PrOutcome> {
    let issue = options.issue;
    let item = store.find_by_issue_mut(issue).ok_or_else(|| {
        PipelineError::Precondition(format!("no backlog item has issue #{issue}"))
    })?;
    let branch = item.branch.clone().ok_or_else(|| {
        PipelineError::Precondition(format!(
            "issue #{issue} has no branch (run backfill-development-branches first)"
        ))
    })?;
    let worktree = item.worktree_path.clone().ok_or_else(|| {
        PipelineError::Precondition(format!(
            "issue #{issue} has no working copy (run provision-worktrees first)"
        ))
    })?;
    if let Some(url) = &item.pr_url {
        info!(issue, %url, "pull request already recorded");
        return Ok(PrOutcome::Existing(url.clone()));
    }

    vcs.push_branch(&worktree, remote, &branch)
        .with_context(|| format!("push {branch} for issue #{issue}"))?;
    let base = match options.base {
        Some(base) => base.to_string(),
        None => tracker.default_branch().context("resolve default branch")?,
    };
    let request = PullRequestRequest {
        title: item.formatted_title.clone(),
        body: templates.pr_body(item, issue)?,
        base,
        head: branch.clone(),
        draft: !options.ready,
    };
    let url = tracker
        .create_pull_request(&request)
        .with_context(|| format!("open pull request for {branch}"))?;
    info!(issue, %url, draft = request.draft, "pull request opened");
    item.pr_url = Some(url.clone());
    Ok(PrOutcome::Created(url))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_support::{FakeTracker, FakeVcs, issued_item, store_with};

    fn provisioned_store() -> BacklogStore {
        let mut it = issued_item(1, "Fix login", 55, 42);
        it.branch = Some("issue/42-fix-login".to_string());
        it.worktree_path = Some(PathBuf::from("/wt/issue-42-fix-login"));
        store_with(vec![it])
    }

    fn options(issue: u64) -> PrOptions<'static> {
        PrOptions {
            issue,
            base: None,
            ready: false,
        }
    }

    #[test]
    fn pushes_and_opens_draft_against_default_branch() {
        let vcs = FakeVcs::new();
        let tracker = FakeTracker::new();
        let mut store = provisioned_store();

        let outcome = create_pull_request(
            &mut store,
            &vcs,
            &tracker,
            &Templates::new(),
            "origin",
            options(42),
        )
        .expect("create pr");
        assert_eq!(outcome.url(), "https://github.com/o/r/pull/501");
        assert_eq!(vcs.calls.borrow()[0], "push origin issue/42-fix-login");
        let prs = tracker.pull_requests.borrow();
        assert!(prs[0].draft);
        assert_eq!(prs[0].base, "main");
        assert!(prs[0].body.contains("Closes #42"));
        assert_eq!(store.items[0].pr_url.as_deref(), Some(outcome.url()));
    }

    #[test]
    fn recorded_pr_is_returned_without_pushing() {
        let vcs = FakeVcs::new();
        let tracker = FakeTracker::new();
        let mut store = provisioned_store();
        store.items[0].pr_url = Some("https://github.com/o/r/pull/9".to_string());

        let outcome = create_pull_request(
            &mut store,
            &vcs,
            &tracker,
            &Templates::new(),
            "origin",
            PrOptions {
                ready: true,
                base: Some("develop"),
                ..options(42)
            },
        )
        .expect("create pr");
        assert_eq!(
            outcome,
            PrOutcome::Existing("https://github.com/o/r/pull/9".to_string())
        );
        assert!(vcs.calls.borrow().is_empty());
    }

    #[test]
    fn missing_working_copy_is_a_precondition_failure() {
        let mut store = store_with(vec![issued_item(1, "Fix login", 55, 42)]);
        store.items[0].branch = Some("issue/42-fix-login".to_string());
        let err = create_pull_request(
            &mut store,
            &FakeVcs::new(),
            &FakeTracker::new(),
            &Templates::new(),
            "origin",
            options(42),
        )
        .expect_err("precondition");
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Precondition(msg)) if msg.contains("no working copy")
        ));
    }

    #[test]
    fn unknown_issue_is_a_precondition_failure() {
        let err = create_pull_request(
            &mut provisioned_store(),
            &FakeVcs::new(),
            &FakeTracker::new(),
            &Templates::new(),
            "origin",
            options(7),
        )
        .expect_err("unknown issue");
        assert!(err.to_string().contains("issue #7"));
    }
}
