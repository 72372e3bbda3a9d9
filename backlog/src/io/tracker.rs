//! Issue-tracker adapter over the GitHub CLI (`gh`).
//!
//! Every call is a blocking, possibly-failing subprocess. Failures carry the
//! rendered command and the most useful output stream.

use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::types::{ChecksStatus, MergeMethod};

/// Input for a new tracker issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Input for a new pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub draft: bool,
}

/// Tracker primitives used by the pipeline stages.
///
/// `pr` arguments accept anything `gh` accepts as a pull-request reference:
/// a number, a URL, or a head branch.
pub trait Tracker {
    fn list_labels(&self) -> Result<Vec<String>>;
    /// Create an issue and return its canonical URL.
    fn create_issue(&self, request: &IssueRequest) -> Result<String>;
    /// Create `branch` from `base` and link it to the issue.
    fn create_linked_branch(&self, issue: u64, branch: &str, base: &str) -> Result<()>;
    fn default_branch(&self) -> Result<String>;
    fn issue_body(&self, issue: u64) -> Result<String>;
    fn comment_on_issue(&self, issue: u64, body: &str) -> Result<()>;
    /// Open a pull request and return its URL.
    fn create_pull_request(&self, request: &PullRequestRequest) -> Result<String>;
    fn pull_request_head(&self, pr: &str) -> Result<String>;
    fn required_checks(&self, pr: &str) -> Result<ChecksStatus>;
    fn merge_pull_request(&self, pr: &str, method: MergeMethod, delete_branch: bool)
    -> Result<()>;
    /// `owner/name` of the repository the tracker talks to.
    fn repo_name(&self) -> Result<String>;
}

/// `gh`-backed tracker. With `repo == None`, `gh` resolves the repository
/// from the current directory.
#[derive(Debug, Clone, Default)]
pub struct GhTracker {
    repo: Option<String>,
}

impl GhTracker {
    pub fn new(repo: Option<String>) -> Self {
        Self {
            repo: repo.filter(|r| !r.trim().is_empty()),
        }
    }

    fn with_repo(&self, mut args: Vec<String>) -> Vec<String> {
        if let Some(repo) = &self.repo {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        args
    }

    fn run_gh_raw(&self, args: &[String]) -> Result<Output> {
        debug!(args = %args.join(" "), "running gh");
        Command::new("gh")
            .args(args)
            .output()
            .with_context(|| format!("spawn gh {}", args.join(" ")))
    }

    fn run_gh(&self, args: &[String]) -> Result<String> {
        let output = self.run_gh_raw(args)?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn command_failed(args: &[String], output: &Output) -> anyhow::Error {
    anyhow!(
        "gh {} failed: {}",
        args.join(" "),
        command_output_detail(output)
    )
}

/// Stderr, else stdout, else the exit status.
fn command_output_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !stdout.is_empty() {
        return stdout;
    }
    format!("exit status {}", output.status)
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

/// Last non-empty line of `gh ... create` output, which is the new URL.
fn last_line(stdout: &str) -> Result<String> {
    stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("gh returned no URL"))
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhCheck {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bucket: Option<String>,
}

/// Fold `gh pr checks --json name,bucket` rows into one merge verdict.
pub fn parse_checks(stdout: &str) -> Result<ChecksStatus> {
    if stdout.trim().is_empty() {
        return Ok(ChecksStatus::NoneRequired);
    }
    let rows: Vec<GhCheck> =
        serde_json::from_str(stdout).context("parse `gh pr checks` JSON output")?;
    if rows.is_empty() {
        return Ok(ChecksStatus::NoneRequired);
    }
    let mut failing = Vec::new();
    let mut pending = false;
    for row in rows {
        let bucket = row
            .bucket
            .as_deref()
            .map(|b| b.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match bucket.as_str() {
            "pass" | "skipping" => {}
            "pending" => pending = true,
            _ => failing.push(row.name.unwrap_or_else(|| "unnamed-check".to_string())),
        }
    }
    if !failing.is_empty() {
        Ok(ChecksStatus::Failing(failing))
    } else if pending {
        Ok(ChecksStatus::Pending)
    } else {
        Ok(ChecksStatus::Passing)
    }
}

impl Tracker for GhTracker {
    fn list_labels(&self) -> Result<Vec<String>> {
        let out = self.run_gh(&self.with_repo(args(&[
            "label", "list", "--limit", "500", "--json", "name",
        ])))?;
        let labels: Vec<GhLabel> = serde_json::from_str(&out).context("parse gh label list")?;
        Ok(labels.into_iter().map(|label| label.name).collect())
    }

    #[instrument(skip_all, fields(title = %request.title))]
    fn create_issue(&self, request: &IssueRequest) -> Result<String> {
        let mut cmd = args(&["issue", "create", "--title"]);
        cmd.push(request.title.clone());
        cmd.push("--body".to_string());
        cmd.push(request.body.clone());
        for label in &request.labels {
            cmd.push("--label".to_string());
            cmd.push(label.clone());
        }
        last_line(&self.run_gh(&self.with_repo(cmd))?)
    }

    #[instrument(skip_all, fields(issue, branch, base))]
    fn create_linked_branch(&self, issue: u64, branch: &str, base: &str) -> Result<()> {
        let cmd = args(&[
            "issue",
            "develop",
            &issue.to_string(),
            "--name",
            branch,
            "--base",
            base,
        ]);
        self.run_gh(&self.with_repo(cmd))?;
        Ok(())
    }

    fn default_branch(&self) -> Result<String> {
        let mut cmd = args(&["repo", "view"]);
        cmd.extend(self.repo.clone());
        cmd.extend(args(&[
            "--json",
            "defaultBranchRef",
            "--jq",
            ".defaultBranchRef.name",
        ]));
        let name = self.run_gh(&cmd)?;
        if name.is_empty() {
            return Err(anyhow!("gh reported an empty default branch"));
        }
        Ok(name)
    }

    fn issue_body(&self, issue: u64) -> Result<String> {
        let cmd = args(&[
            "issue",
            "view",
            &issue.to_string(),
            "--json",
            "body",
            "--jq",
            ".body",
        ]);
        self.run_gh(&self.with_repo(cmd))
    }

    fn comment_on_issue(&self, issue: u64, body: &str) -> Result<()> {
        let cmd = args(&["issue", "comment", &issue.to_string(), "--body", body]);
        self.run_gh(&self.with_repo(cmd))?;
        Ok(())
    }

    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create_pull_request(&self, request: &PullRequestRequest) -> Result<String> {
        let mut cmd = args(&["pr", "create"]);
        if request.draft {
            cmd.push("--draft".to_string());
        }
        for (flag, value) in [
            ("--title", &request.title),
            ("--body", &request.body),
            ("--base", &request.base),
            ("--head", &request.head),
        ] {
            cmd.push(flag.to_string());
            cmd.push(value.clone());
        }
        last_line(&self.run_gh(&self.with_repo(cmd))?)
    }

    fn pull_request_head(&self, pr: &str) -> Result<String> {
        let cmd = args(&["pr", "view", pr, "--json", "headRefName", "--jq", ".headRefName"]);
        let head = self.run_gh(&self.with_repo(cmd))?;
        if head.is_empty() {
            return Err(anyhow!("gh reported no head branch for PR {pr}"));
        }
        Ok(head)
    }

    fn required_checks(&self, pr: &str) -> Result<ChecksStatus> {
        let cmd = self.with_repo(args(&[
            "pr",
            "checks",
            pr,
            "--required",
            "--json",
            "name,bucket",
        ]));
        let output = self.run_gh_raw(&cmd)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // Exit code 8 means checks are still pending; the JSON is still printed.
        if output.status.success() || output.status.code() == Some(8) {
            return parse_checks(&stdout);
        }
        let detail = command_output_detail(&output);
        if detail.to_ascii_lowercase().contains("no required checks") {
            return Ok(ChecksStatus::NoneRequired);
        }
        if !stdout.trim().is_empty() {
            // Failing checks exit non-zero but still report rows.
            if let Ok(status) = parse_checks(&stdout) {
                return Ok(status);
            }
        }
        Err(command_failed(&cmd, &output))
    }

    #[instrument(skip_all, fields(pr, method = ?method, delete_branch))]
    fn merge_pull_request(
        &self,
        pr: &str,
        method: MergeMethod,
        delete_branch: bool,
    ) -> Result<()> {
        let mut cmd = args(&["pr", "merge", pr, method.flag()]);
        if delete_branch {
            cmd.push("--delete-branch".to_string());
        }
        self.run_gh(&self.with_repo(cmd))?;
        Ok(())
    }

    fn repo_name(&self) -> Result<String> {
        if let Some(repo) = &self.repo {
            return Ok(repo.clone());
        }
        let name = self.run_gh(&args(&[
            "repo",
            "view",
            "--json",
            "nameWithOwner",
            "--jq",
            ".nameWithOwner",
        ]))?;
        if name.is_empty() {
            return Err(anyhow!("gh reported an empty repository name"));
        }
        Ok(name)
    }
}
