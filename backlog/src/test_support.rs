//! Test-only helpers: item builders and in-memory fakes for the external
//! primitives.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::{ChecksStatus, MergeMethod};
use crate::io::git::{Vcs, WorktreeEntry};
use crate::io::tracker::{IssueRequest, PullRequestRequest, Tracker};
use crate::model::{BacklogItem, BacklogStore};

/// Create a deterministic, not-yet-issued item.
pub fn item(id: u64, title: &str, priority_score: i64) -> BacklogItem {
    BacklogItem {
        id,
        raw: title.to_string(),
        formatted_title: title.to_string(),
        formatted_description: format!("{title}."),
        topic: "general".to_string(),
        item_type: "task".to_string(),
        priority: "P2".to_string(),
        priority_score,
        created_issue_number: None,
        created_issue_url: None,
        branch: None,
        worktree_path: None,
        pr_url: None,
        agent_workspace_path: None,
        agent_last_run_at: None,
        agent_last_run_status: None,
        agent_last_run_output: None,
        cleaned_up_at: None,
    }
}

/// Create an item that already carries a tracker issue.
pub fn issued_item(id: u64, title: &str, priority_score: i64, issue: u64) -> BacklogItem {
    let mut item = item(id, title, priority_score);
    item.created_issue_number = Some(issue);
    item.created_issue_url = Some(format!("https://github.com/o/r/issues/{issue}"));
    item
}

pub fn store_with(items: Vec<BacklogItem>) -> BacklogStore {
    BacklogStore {
        created_at: "2026-01-01T00:00:00Z".to_string(),
        source_file: "backlog.txt".to_string(),
        repo: "o/r".to_string(),
        items,
    }
}

/// In-memory version control. Creation operations make the directory on disk
/// so agent workspaces can be written into it.
#[derive(Debug, Default)]
pub struct FakeVcs {
    pub worktrees: RefCell<Vec<WorktreeEntry>>,
    pub local_branches: RefCell<BTreeSet<String>>,
    pub remote_branches: RefCell<BTreeSet<String>>,
    /// Branches whose working-copy creation fails.
    pub fail_branches: RefCell<BTreeSet<String>>,
    pub prune_fails: Cell<bool>,
    pub remove_fails: Cell<bool>,
    pub delete_fails: Cell<bool>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a working copy that exists outside the pipeline's knowledge.
    pub fn add_worktree(&self, path: &Path, branch: &str) {
        fs::create_dir_all(path).expect("create fake worktree dir");
        self.local_branches.borrow_mut().insert(branch.to_string());
        self.worktrees.borrow_mut().push(WorktreeEntry {
            path: path.to_path_buf(),
            branch: Some(branch.to_string()),
            prunable: false,
        });
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn create(&self, call: String, path: &Path, branch: &str) -> Result<()> {
        self.calls.borrow_mut().push(call);
        if self.fail_branches.borrow().contains(branch) {
            return Err(anyhow!("fatal: could not create worktree for {branch}"));
        }
        self.add_worktree(path, branch);
        Ok(())
    }
}

impl Vcs for FakeVcs {
    fn list_worktrees(&self) -> Result<Vec<WorktreeEntry>> {
        Ok(self.worktrees.borrow().clone())
    }

    fn prune_worktrees(&self) -> Result<()> {
        self.calls.borrow_mut().push("prune".to_string());
        if self.prune_fails.get() {
            return Err(anyhow!("fatal: unable to prune worktrees"));
        }
        self.worktrees.borrow_mut().retain(|entry| entry.path.is_dir());
        Ok(())
    }

    fn local_branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.local_branches.borrow().contains(branch))
    }

    fn remote_branch_exists(&self, _remote: &str, branch: &str) -> Result<bool> {
        Ok(self.remote_branches.borrow().contains(branch))
    }

    fn attach_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        self.create(format!("attach {branch}"), path, branch)
    }

    fn track_remote_worktree(&self, path: &Path, remote: &str, branch: &str) -> Result<()> {
        self.create(format!("track {remote}/{branch}"), path, branch)
    }

    fn create_worktree_from_base(
        &self,
        path: &Path,
        remote: &str,
        base: &str,
        branch: &str,
    ) -> Result<()> {
        self.create(format!("create {branch} from {remote}/{base}"), path, branch)
    }

    fn remove_worktree(&self, path: &Path) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("remove {}", path.display()));
        if self.remove_fails.get() {
            return Err(anyhow!("fatal: '{}' contains modified files", path.display()));
        }
        let mut worktrees = self.worktrees.borrow_mut();
        let before = worktrees.len();
        worktrees.retain(|entry| entry.path != path);
        if worktrees.len() == before {
            return Err(anyhow!("fatal: '{}' is not a working tree", path.display()));
        }
        Ok(())
    }

    fn delete_local_branch(&self, branch: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("delete {branch}"));
        if self.delete_fails.get() {
            return Err(anyhow!("error: cannot delete branch '{branch}'"));
        }
        if !self.local_branches.borrow_mut().remove(branch) {
            return Err(anyhow!("error: branch '{branch}' not found"));
        }
        Ok(())
    }

    fn push_branch(&self, _worktree: &Path, remote: &str, branch: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("push {remote} {branch}"));
        self.remote_branches.borrow_mut().insert(branch.to_string());
        Ok(())
    }
}

/// In-memory tracker with configurable failures.
#[derive(Debug)]
pub struct FakeTracker {
    pub labels: Vec<String>,
    pub next_issue: Cell<u64>,
    /// Returned instead of a well-formed issue URL when set.
    pub malformed_issue_url: RefCell<Option<String>>,
    pub issues: RefCell<Vec<IssueRequest>>,
    pub linked: RefCell<Vec<(u64, String, String)>>,
    pub fail_link_for: RefCell<BTreeSet<u64>>,
    pub default_branch: String,
    /// Issues without a body fail to fetch.
    pub bodies: RefCell<HashMap<u64, String>>,
    pub comments: RefCell<Vec<(u64, String)>>,
    pub fail_comments: Cell<bool>,
    pub pull_requests: RefCell<Vec<PullRequestRequest>>,
    pub pr_heads: RefCell<HashMap<String, String>>,
    pub checks: RefCell<ChecksStatus>,
    pub merges: RefCell<Vec<(String, MergeMethod, bool)>>,
    pub repo: Option<String>,
}

impl Default for FakeTracker {
    fn default() -> Self {
        Self {
            labels: vec!["bug".to_string(), "feature".to_string(), "P1".to_string()],
            next_issue: Cell::new(100),
            malformed_issue_url: RefCell::new(None),
            issues: RefCell::new(Vec::new()),
            linked: RefCell::new(Vec::new()),
            fail_link_for: RefCell::new(BTreeSet::new()),
            default_branch: "main".to_string(),
            bodies: RefCell::new(HashMap::new()),
            comments: RefCell::new(Vec::new()),
            fail_comments: Cell::new(false),
            pull_requests: RefCell::new(Vec::new()),
            pr_heads: RefCell::new(HashMap::new()),
            checks: RefCell::new(ChecksStatus::Passing),
            merges: RefCell::new(Vec::new()),
            repo: Some("o/r".to_string()),
        }
    }
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracker for FakeTracker {
    fn list_labels(&self) -> Result<Vec<String>> {
        Ok(self.labels.clone())
    }

    fn create_issue(&self, request: &IssueRequest) -> Result<String> {
        self.issues.borrow_mut().push(request.clone());
        if let Some(url) = self.malformed_issue_url.borrow().clone() {
            return Ok(url);
        }
        let number = self.next_issue.get();
        self.next_issue.set(number + 1);
        Ok(format!("https://github.com/o/r/issues/{number}"))
    }

    fn create_linked_branch(&self, issue: u64, branch: &str, base: &str) -> Result<()> {
        if self.fail_link_for.borrow().contains(&issue) {
            return Err(anyhow!("gh issue develop {issue} failed: HTTP 502"));
        }
        self.linked
            .borrow_mut()
            .push((issue, branch.to_string(), base.to_string()));
        Ok(())
    }

    fn default_branch(&self) -> Result<String> {
        Ok(self.default_branch.clone())
    }

    fn issue_body(&self, issue: u64) -> Result<String> {
        self.bodies
            .borrow()
            .get(&issue)
            .cloned()
            .ok_or_else(|| anyhow!("gh issue view {issue} failed: not found"))
    }

    fn comment_on_issue(&self, issue: u64, body: &str) -> Result<()> {
        if self.fail_comments.get() {
            return Err(anyhow!("gh issue comment {issue} failed: rate limited"));
        }
        self.comments.borrow_mut().push((issue, body.to_string()));
        Ok(())
    }

    fn create_pull_request(&self, request: &PullRequestRequest) -> Result<String> {
        let mut prs = self.pull_requests.borrow_mut();
        prs.push(request.clone());
        let number = 500 + prs.len();
        self.pr_heads
            .borrow_mut()
            .insert(number.to_string(), request.head.clone());
        Ok(format!("https://github.com/o/r/pull/{number}"))
    }

    fn pull_request_head(&self, pr: &str) -> Result<String> {
        self.pr_heads
            .borrow()
            .get(pr)
            .cloned()
            .ok_or_else(|| anyhow!("gh pr view {pr} failed: no pull requests found"))
    }

    fn required_checks(&self, _pr: &str) -> Result<ChecksStatus> {
        Ok(self.checks.borrow().clone())
    }

    fn merge_pull_request(
        &self,
        pr: &str,
        method: MergeMethod,
        delete_branch: bool,
    ) -> Result<()> {
        self.merges
            .borrow_mut()
            .push((pr.to_string(), method, delete_branch));
        Ok(())
    }

    fn repo_name(&self) -> Result<String> {
        self.repo
            .clone()
            .ok_or_else(|| anyhow!("gh repo view failed: not a git repository"))
    }
}

/// Canonical temporary directory for working-copy roots.
pub fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().canonicalize().expect("canonicalize tempdir");
    (temp, path)
}
