//! Agent launcher: prepare an isolated workspace inside a working copy, write
//! the task brief, and optionally run the configured command.
//!
//! Launch problems never escape as errors. They are reported as a `failed`
//! run so the caller can decide whether the failure is fatal.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::types::AgentRunStatus;
use crate::io::config::AgentConfig;
use crate::io::process::run_bounded;
use crate::io::render::{CommandVars, Templates, render_command};
use crate::io::tracker::Tracker;
use crate::model::{AgentRun, BacklogItem, timestamp_now};

const TASK_FILE: &str = "task.json";

/// Issue description for the brief.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueBody {
    /// Fetched from the tracker.
    Live(String),
    /// Reconstructed locally because the fetch failed.
    Degraded { fallback: String, reason: String },
}

impl IssueBody {
    pub fn text(&self) -> &str {
        match self {
            Self::Live(body) => body,
            Self::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Live(_) => "tracker",
            Self::Degraded { .. } => "local",
        }
    }
}

/// Prefer the live issue body; fall back to a local summary on any failure.
pub fn resolve_issue_body<T: Tracker>(
    tracker: &T,
    issue: u64,
    item: &BacklogItem,
    templates: &Templates,
) -> Result<IssueBody> {
    let reason = match tracker.issue_body(issue) {
        Ok(body) if !body.trim().is_empty() => return Ok(IssueBody::Live(body)),
        Ok(_) => "issue body is empty".to_string(),
        Err(err) => format!("{err:#}"),
    };
    warn!(issue, %reason, "using local issue summary");
    Ok(IssueBody::Degraded {
        fallback: templates.fallback_brief(item)?,
        reason,
    })
}

/// Everything the launcher needs to know about one claimed slot.
#[derive(Debug, Clone, Copy)]
pub struct AgentLaunch<'a> {
    pub item: &'a BacklogItem,
    pub issue_number: u64,
    pub branch: &'a str,
    pub worktree_path: &'a Path,
}

/// Machine-readable task description written next to the brief.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskFile<'a> {
    issue_number: u64,
    title: &'a str,
    branch: &'a str,
    worktree_path: &'a Path,
    brief_path: &'a Path,
    description_source: &'a str,
    item_type: &'a str,
    priority: &'a str,
    topic: &'a str,
}

/// Prepare the workspace and run the agent command if one is configured.
pub fn launch_agent<T: Tracker>(
    launch: &AgentLaunch<'_>,
    tracker: &T,
    config: &AgentConfig,
    templates: &Templates,
) -> AgentRun {
    let ran_at = timestamp_now();
    let workspace = launch.worktree_path.join(&config.workspace_dir);
    let (status, output) =
        match run_in_workspace(launch, &workspace, tracker, config, templates) {
            Ok(result) => result,
            Err(err) => (AgentRunStatus::Failed, format!("{err:#}")),
        };
    info!(issue = launch.issue_number, %status, "agent run finished");
    AgentRun {
        workspace_path: workspace,
        ran_at,
        status,
        output,
    }
}

fn run_in_workspace<T: Tracker>(
    launch: &AgentLaunch<'_>,
    workspace: &Path,
    tracker: &T,
    config: &AgentConfig,
    templates: &Templates,
) -> Result<(AgentRunStatus, String)> {
    fs::create_dir_all(workspace)
        .with_context(|| format!("create agent workspace {}", workspace.display()))?;

    let body = resolve_issue_body(tracker, launch.issue_number, launch.item, templates)?;
    let brief_path = workspace.join(&config.brief_file);
    write_brief(&brief_path, launch.item, &body)?;
    write_task_file(workspace, launch, &brief_path, &body)?;
    copy_skill(config.skill_path.as_deref(), workspace)?;

    let Some(template) = config.command.as_deref() else {
        debug!(issue = launch.issue_number, "no agent command configured");
        return Ok((AgentRunStatus::Skipped, String::new()));
    };

    let script = render_command(
        template,
        &CommandVars {
            issue_number: launch.issue_number,
            branch: launch.branch,
            title: &launch.item.formatted_title,
            worktree_path: launch.worktree_path,
            agent_workspace: workspace,
            brief_path: &brief_path,
        },
    )?;
    debug!(issue = launch.issue_number, %script, "running agent command");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&script)
        .current_dir(launch.worktree_path)
        .env("BACKLOG_ISSUE_NUMBER", launch.issue_number.to_string())
        .env("BACKLOG_BRIEF_PATH", &brief_path);
    let out = run_bounded(
        cmd,
        config.timeout_secs.map(Duration::from_secs),
        config.output_limit_bytes,
    )?;

    let mut output = out.combined();
    if out.succeeded() {
        Ok((AgentRunStatus::Succeeded, output))
    } else {
        if output.trim().is_empty() {
            output = format!("agent command exited with {}", out.status);
        }
        Ok((AgentRunStatus::Failed, output))
    }
}

fn write_brief(path: &Path, item: &BacklogItem, body: &IssueBody) -> Result<()> {
    let contents = match body {
        IssueBody::Live(text) => format!("# {}\n\n{}\n", item.formatted_title, text.trim()),
        IssueBody::Degraded { fallback, .. } => format!("{}\n", fallback.trim_end()),
    };
    fs::write(path, contents).with_context(|| format!("write brief {}", path.display()))
}

fn write_task_file(
    workspace: &Path,
    launch: &AgentLaunch<'_>,
    brief_path: &Path,
    body: &IssueBody,
) -> Result<()> {
    let task = TaskFile {
        issue_number: launch.issue_number,
        title: &launch.item.formatted_title,
        branch: launch.branch,
        worktree_path: launch.worktree_path,
        brief_path,
        description_source: body.source(),
        item_type: &launch.item.item_type,
        priority: &launch.item.priority,
        topic: &launch.item.topic,
    };
    let path = workspace.join(TASK_FILE);
    let mut buf = serde_json::to_string_pretty(&task).context("serialize task file")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write {}", path.display()))
}

fn copy_skill(skill: Option<&Path>, workspace: &Path) -> Result<()> {
    let Some(skill) = skill else {
        return Ok(());
    };
    if !skill.is_file() {
        warn!(path = %skill.display(), "skill file not found; skipping");
        return Ok(());
    }
    let name = skill
        .file_name()
        .with_context(|| format!("skill path has no file name: {}", skill.display()))?;
    let dest = workspace.join(name);
    fs::copy(skill, &dest)
        .with_context(|| format!("copy skill {} to {}", skill.display(), dest.display()))?;
    debug!(dest = %dest.display(), "skill file copied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeTracker, issued_item};

    fn launch_in<'a>(item: &'a BacklogItem, worktree: &'a Path) -> AgentLaunch<'a> {
        AgentLaunch {
            item,
            issue_number: 42,
            branch: "issue/42-fix-login",
            worktree_path: worktree,
        }
    }

    #[test]
    fn no_command_is_skipped_but_workspace_is_prepared() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = FakeTracker::new();
        tracker
            .bodies
            .borrow_mut()
            .insert(42, "Live body from tracker".to_string());
        let item = issued_item(1, "Fix login", 50, 42);

        let run = launch_agent(
            &launch_in(&item, temp.path()),
            &tracker,
            &AgentConfig::default(),
            &Templates::new(),
        );
        assert_eq!(run.status, AgentRunStatus::Skipped);
        assert_eq!(run.workspace_path, temp.path().join(".agent"));
        let brief = fs::read_to_string(temp.path().join(".agent/ISSUE.md")).expect("brief");
        assert!(brief.contains("Live body from tracker"));
        let task = fs::read_to_string(temp.path().join(".agent/task.json")).expect("task");
        assert!(task.contains("\"descriptionSource\": \"tracker\""));
    }

    #[test]
    fn fetch_failure_degrades_to_local_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = FakeTracker::new();
        let mut item = issued_item(1, "Fix login", 50, 42);
        item.raw = "fix login on safari".to_string();

        let body = resolve_issue_body(&tracker, 42, &item, &Templates::new()).expect("resolve");
        assert!(matches!(body, IssueBody::Degraded { .. }));
        assert!(body.text().contains("fix login on safari"));

        let run = launch_agent(
            &launch_in(&item, temp.path()),
            &tracker,
            &AgentConfig::default(),
            &Templates::new(),
        );
        assert_eq!(run.status, AgentRunStatus::Skipped);
    }

    #[test]
    fn command_runs_in_worktree_with_placeholders() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = FakeTracker::new();
        let item = issued_item(1, "Fix login", 50, 42);
        let config = AgentConfig {
            command: Some(
                "echo {{ issue_number }} {{ branch }}; test -f {{ brief_path }} && pwd"
                    .to_string(),
            ),
            ..AgentConfig::default()
        };

        let run = launch_agent(
            &launch_in(&item, temp.path()),
            &tracker,
            &config,
            &Templates::new(),
        );
        assert_eq!(run.status, AgentRunStatus::Succeeded, "{}", run.output);
        assert!(run.output.starts_with("42 issue/42-fix-login\n"));
        let cwd = temp.path().canonicalize().expect("canonicalize");
        assert!(run.output.contains(&cwd.display().to_string()));
    }

    #[test]
    fn non_zero_exit_is_failed_with_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = AgentConfig {
            command: Some("echo boom >&2; exit 3".to_string()),
            ..AgentConfig::default()
        };
        let item = issued_item(1, "Fix login", 50, 42);
        let run = launch_agent(
            &launch_in(&item, temp.path()),
            &FakeTracker::new(),
            &config,
            &Templates::new(),
        );
        assert_eq!(run.status, AgentRunStatus::Failed);
        assert_eq!(run.output.trim(), "boom");
    }

    #[test]
    fn skill_file_is_copied_when_present() {
        let temp = tempfile::tempdir().expect("tempdir");
        let skill = temp.path().join("SKILL.md");
        fs::write(&skill, "be careful").expect("write skill");
        let worktree = temp.path().join("wt");
        let config = AgentConfig {
            skill_path: Some(skill),
            ..AgentConfig::default()
        };
        let item = issued_item(1, "Fix login", 50, 42);
        launch_agent(
            &launch_in(&item, &worktree),
            &FakeTracker::new(),
            &config,
            &Templates::new(),
        );
        let copied = fs::read_to_string(worktree.join(".agent/SKILL.md")).expect("copied");
        assert_eq!(copied, "be careful");
    }
}
