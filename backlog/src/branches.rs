//! Development-branch linking, chained from issue creation or run as a
//! standalone backfill.

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::core::naming::branch_name;
use crate::errors::PipelineError;
use crate::io::tracker::Tracker;
use crate::model::{BacklogItem, BacklogStore};

/// Counts reported by `backfill-development-branches`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    pub linked: usize,
    pub failed: usize,
}

/// Issued but not yet branched.
pub fn needs_branch(item: &BacklogItem) -> bool {
    item.is_issued() && item.branch.is_none()
}

/// Create the deterministic branch for `item` off `base`, link it to the
/// item's issue and record it. Returns the branch name.
pub fn link_branch<T: Tracker>(item: &mut BacklogItem, tracker: &T, base: &str) -> Result<String> {
    let issue = item.created_issue_number.ok_or_else(|| {
        PipelineError::Precondition(format!("item {} has no issue number", item.id))
    })?;
    let branch = branch_name(issue, &item.formatted_title);
    tracker
        .create_linked_branch(issue, &branch, base)
        .with_context(|| format!("link branch {branch} to issue #{issue}"))?;
    info!(issue, %branch, base, "branch linked");
    item.branch = Some(branch.clone());
    Ok(branch)
}

/// Link a branch for every issued item that lacks one.
///
/// Per-item failures are logged and counted; the pass always continues.
/// `base` defaults to the repository's default branch, resolved once.
pub fn backfill_branches<T: Tracker>(
    store: &mut BacklogStore,
    tracker: &T,
    base: Option<&str>,
) -> Result<BackfillSummary> {
    let mut summary = BackfillSummary::default();
    if !store.items.iter().any(needs_branch) {
        info!("no items need a development branch");
        return Ok(summary);
    }
    let base = match base {
        Some(base) => base.to_string(),
        None => tracker
            .default_branch()
            .context("resolve default branch for backfill")?,
    };

    for item in store.items.iter_mut().filter(|item| needs_branch(item)) {
        match link_branch(item, tracker, &base) {
            Ok(_) => summary.linked += 1,
            Err(err) => {
                error!(
                    item = item.id,
                    issue = ?item.created_issue_number,
                    error = %format!("{err:#}"),
                    "branch linking failed"
                );
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
