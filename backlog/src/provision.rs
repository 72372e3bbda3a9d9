//! `backlog provision-worktrees`: the bounded working-copy scheduler.
//!
//! Every pass re-derives the active set from the version-control listing,
//! then walks issued items in priority order until the cap is reached. Items
//! that already own a live working copy keep it; the rest claim a new one
//! through exactly one of three branch-origin operations.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentLaunch, launch_agent};
use crate::core::naming::{branch_name, worktree_path};
use crate::core::selector::{active_under_root, scheduling_candidates};
use crate::core::types::{AgentRunStatus, BranchOrigin};
use crate::errors::PipelineError;
use crate::io::config::PipelineConfig;
use crate::io::git::{Vcs, WorktreeEntry};
use crate::io::render::Templates;
use crate::io::tracker::Tracker;
use crate::model::{AgentRun, BacklogItem, BacklogStore};

/// Agent switches for one scheduling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub run_agent: bool,
    /// Abort the pass when an agent run does not succeed.
    pub agent_required: bool,
}

/// Counts reported by `provision-worktrees`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionSummary {
    pub active_before: usize,
    pub active_after: usize,
    /// New working copies created this pass.
    pub provisioned: usize,
    /// Agent re-runs in working copies that already existed.
    pub rerun: usize,
    /// Items whose working copy could not be created.
    pub failed: usize,
    /// Eligible items left for a later pass because the cap was reached.
    pub deferred: usize,
}

/// Create the root if needed and return its canonical form, so it compares
/// equal to the paths in the version-control listing.
pub fn resolve_root(root: &Path) -> Result<PathBuf> {
    fs::create_dir_all(root)
        .with_context(|| format!("create worktree root {}", root.display()))?;
    root.canonicalize()
        .with_context(|| format!("resolve worktree root {}", root.display()))
}

/// Run one scheduling pass over the store.
pub fn provision_worktrees<V: Vcs, T: Tracker>(
    store: &mut BacklogStore,
    vcs: &V,
    tracker: &T,
    config: &PipelineConfig,
    templates: &Templates,
    options: ProvisionOptions,
) -> Result<ProvisionSummary> {
    let root = resolve_root(&config.worktree_root)?;
    // Entries whose directory was deleted by hand stay listed until pruned.
    if let Err(err) = vcs.prune_worktrees() {
        warn!(error = %format!("{err:#}"), "could not prune stale worktrees");
    }
    let listing: Vec<WorktreeEntry> = vcs
        .list_worktrees()
        .context("list worktrees")?
        .into_iter()
        .filter(WorktreeEntry::is_live)
        .collect();
    let paths: Vec<PathBuf> = listing.iter().map(|entry| entry.path.clone()).collect();
    let active = active_under_root(&paths, &root);
    let cap = config.max_active_worktrees;

    let mut summary = ProvisionSummary {
        active_before: active.len(),
        ..ProvisionSummary::default()
    };
    let mut active_count = active.len();
    let mut default_branch: Option<String> = None;
    info!(root = %root.display(), active = active_count, cap, "scheduling pass");

    let candidates = scheduling_candidates(&store.items);
    for (position, &idx) in candidates.iter().enumerate() {
        if active_count >= cap {
            summary.deferred = candidates[position..]
                .iter()
                .filter(|&&rest| {
                    owned_worktree(&store.items[rest], &listing, &active).is_none()
                })
                .count();
            debug!(deferred = summary.deferred, "cap reached");
            break;
        }
        let item = &mut store.items[idx];
        let Some(issue) = item.created_issue_number else {
            continue;
        };

        if let Some(existing) = owned_worktree(item, &listing, &active) {
            let branch = item
                .branch
                .clone()
                .unwrap_or_else(|| branch_name(issue, &item.formatted_title));
            if item.worktree_path.as_ref() != Some(&existing) {
                info!(issue, path = %existing.display(), "adopting existing working copy");
                item.branch = Some(branch.clone());
                item.worktree_path = Some(existing.clone());
            }
            if options.run_agent {
                let run = run_agent(item, issue, &branch, &existing, tracker, config, templates);
                item.record_agent_run(&run);
                summary.rerun += 1;
                require_success(&run, issue, options)?;
            }
            continue;
        }

        let branch = item
            .branch
            .clone()
            .unwrap_or_else(|| branch_name(issue, &item.formatted_title));
        let path = worktree_path(&root, &branch);
        match claim_slot(vcs, tracker, config, &mut default_branch, &path, &branch) {
            Ok(origin) => {
                info!(
                    issue,
                    %branch,
                    ?origin,
                    path = %path.display(),
                    "working copy provisioned"
                );
            }
            Err(err) => {
                error!(
                    issue,
                    %branch,
                    error = %format!("{err:#}"),
                    "working copy creation failed"
                );
                summary.failed += 1;
                continue;
            }
        }
        item.branch = Some(branch.clone());
        item.worktree_path = Some(path.clone());
        active_count += 1;
        summary.provisioned += 1;

        let run = options
            .run_agent
            .then(|| run_agent(item, issue, &branch, &path, tracker, config, templates));
        if let Some(run) = &run {
            item.record_agent_run(run);
            require_success(run, issue, options)?;
        }

        let agent_status = run.as_ref().map_or("not run", |run| run.status.as_str());
        let comment = templates.issue_comment(&branch, &path, agent_status)?;
        if let Err(err) = tracker.comment_on_issue(issue, &comment) {
            warn!(issue, error = %format!("{err:#}"), "failed to comment on issue");
        }
    }

    summary.active_after = active_count;
    Ok(summary)
}

/// The live working copy this item already holds under the root, if any:
/// its recorded path, or a listed working copy checked out on its branch.
fn owned_worktree(
    item: &BacklogItem,
    listing: &[WorktreeEntry],
    active: &BTreeSet<PathBuf>,
) -> Option<PathBuf> {
    if let Some(recorded) = &item.worktree_path
        && active.contains(recorded)
    {
        return Some(recorded.clone());
    }
    let branch = item.branch.as_deref()?;
    listing
        .iter()
        .find(|entry| entry.branch.as_deref() == Some(branch) && active.contains(&entry.path))
        .map(|entry| entry.path.clone())
}

/// Probe for the branch and issue exactly one creation operation.
fn claim_slot<V: Vcs, T: Tracker>(
    vcs: &V,
    tracker: &T,
    config: &PipelineConfig,
    default_branch: &mut Option<String>,
    path: &Path,
    branch: &str,
) -> Result<BranchOrigin> {
    let local = vcs.local_branch_exists(branch)?;
    let remote = !local && vcs.remote_branch_exists(&config.remote, branch)?;
    let origin = BranchOrigin::from_existence(local, remote);
    debug!(branch, ?origin, "branch origin resolved");
    match origin {
        BranchOrigin::AttachLocal => vcs.attach_worktree(path, branch)?,
        BranchOrigin::TrackRemote => vcs.track_remote_worktree(path, &config.remote, branch)?,
        BranchOrigin::CreateFromDefault => {
            let base = match default_branch.clone() {
                Some(base) => base,
                None => {
                    let base = tracker.default_branch().context("resolve default branch")?;
                    *default_branch = Some(base.clone());
                    base
                }
            };
            vcs.create_worktree_from_base(path, &config.remote, &base, branch)?;
        }
    }
    Ok(origin)
}

fn run_agent<T: Tracker>(
    item: &BacklogItem,
    issue: u64,
    branch: &str,
    worktree: &Path,
    tracker: &T,
    config: &PipelineConfig,
    templates: &Templates,
) -> AgentRun {
    let launch = AgentLaunch {
        item,
        issue_number: issue,
        branch,
        worktree_path: worktree,
    };
    launch_agent(&launch, tracker, &config.agent, templates)
}

fn require_success(run: &AgentRun, issue: u64, options: ProvisionOptions) -> Result<()> {
    if options.agent_required && run.status != AgentRunStatus::Succeeded {
        return Err(PipelineError::AgentRequired {
            issue,
            status: run.status.to_string(),
            output: run.output.trim().to_string(),
        }
        .into());
    }
    Ok(())
}
