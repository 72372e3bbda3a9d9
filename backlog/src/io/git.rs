//! Git adapter for the pipeline.
//!
//! Branch and working-copy operations are delegated to the `git` binary. The
//! [`Vcs`] trait is the seam the scheduler and cleanup stages are written
//! against, so tests can substitute a fake.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Short branch name; `None` for detached or bare entries.
    pub branch: Option<String>,
    /// Git flagged the entry as `prunable`: its directory is gone.
    pub prunable: bool,
}

impl WorktreeEntry {
    /// Registered with git and still present on disk.
    pub fn is_live(&self) -> bool {
        !self.prunable && self.path.is_dir()
    }
}

/// Version-control primitives used by the pipeline stages.
pub trait Vcs {
    fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>>;
    /// Drop registrations whose directory no longer exists.
    fn prune_worktrees(&self) -> Result<()>;
    fn local_branch_exists(&self, branch: &str) -> Result<bool>;
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool>;
    /// Check out an existing local branch into a new working copy.
    fn attach_worktree(&self, path: &Path, branch: &str) -> Result<()>;
    /// Fetch `remote/branch` and check it out as a new tracking branch.
    fn track_remote_worktree(&self, path: &Path, remote: &str, branch: &str) -> Result<()>;
    /// Fetch `remote/base` and create `branch` from it in a new working copy.
    fn create_worktree_from_base(
        &self,
        path: &Path,
        remote: &str,
        base: &str,
        branch: &str,
    ) -> Result<()>;
    fn remove_worktree(&self, path: &Path) -> Result<()>;
    fn delete_local_branch(&self, branch: &str) -> Result<()>;
    fn push_branch(&self, worktree: &Path, remote: &str, branch: &str) -> Result<()>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        debug!(remote, branch, "fetching");
        self.run_checked(&["fetch", remote, branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

impl Vcs for Git {
    fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        let out = self.run_capture(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    fn prune_worktrees(&self) -> Result<()> {
        debug!("pruning stale worktrees");
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool> {
        let output = self.run(&["ls-remote", "--exit-code", "--heads", remote, branch])?;
        match output.status.code() {
            Some(0) => Ok(true),
            // `--exit-code` reports "no matching refs" as 2.
            Some(2) => Ok(false),
            _ => Err(anyhow!(
                "git ls-remote --exit-code --heads {remote} {branch} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )),
        }
    }

    #[instrument(skip_all, fields(branch))]
    fn attach_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        debug!(path = %path.display(), "attaching local branch");
        self.run_checked(&["worktree", "add", path_arg(path)?, branch])?;
        Ok(())
    }

    #[instrument(skip_all, fields(remote, branch))]
    fn track_remote_worktree(&self, path: &Path, remote: &str, branch: &str) -> Result<()> {
        self.fetch(remote, branch)?;
        let upstream = format!("{remote}/{branch}");
        debug!(path = %path.display(), %upstream, "creating tracking branch");
        self.run_checked(&[
            "worktree",
            "add",
            "--track",
            "-b",
            branch,
            path_arg(path)?,
            &upstream,
        ])?;
        Ok(())
    }

    #[instrument(skip_all, fields(remote, base, branch))]
    fn create_worktree_from_base(
        &self,
        path: &Path,
        remote: &str,
        base: &str,
        branch: &str,
    ) -> Result<()> {
        self.fetch(remote, base)?;
        let start = format!("{remote}/{base}");
        debug!(path = %path.display(), %start, "creating branch from default");
        self.run_checked(&["worktree", "add", "-b", branch, path_arg(path)?, &start])?;
        Ok(())
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "removing worktree");
        self.run_checked(&["worktree", "remove", "--force", path_arg(path)?])?;
        Ok(())
    }

    fn delete_local_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "deleting local branch");
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    fn push_branch(&self, worktree: &Path, remote: &str, branch: &str) -> Result<()> {
        debug!(worktree = %worktree.display(), remote, branch, "pushing branch");
        Git::new(worktree).run_checked(&["push", "--set-upstream", remote, branch])?;
        Ok(())
    }
}

/// Parse `git worktree list --porcelain` output.
///
/// Records are separated by blank lines; each starts with `worktree <path>`.
pub fn parse_worktree_list(out: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;
    for line in out.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            entries.extend(current.take());
            current = Some(WorktreeEntry {
                path: PathBuf::from(path),
                branch: None,
                prunable: false,
            });
        } else if let Some(entry) = current.as_mut() {
            if let Some(branch) = line.strip_prefix("branch ") {
                let short = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                entry.branch = Some(short.to_string());
            } else if line == "prunable" || line.starts_with("prunable ") {
                entry.prunable = true;
            }
        }
    }
    entries.extend(current);
    entries
}
