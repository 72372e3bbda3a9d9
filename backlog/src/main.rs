//! Backlog orchestration CLI.
//!
//! Every command reads and writes a single state file (`.backlog/state.json`
//! by default) under an exclusive lock. Counts and URLs go to stdout;
//! diagnostics go to stderr through `RUST_LOG`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use backlog::branches::backfill_branches;
use backlog::cleanup::{
    CleanupSelector, MergeOptions, cleanup_branch, merge_pull_request, resolve_target_branch,
};
use backlog::core::types::MergeMethod;
use backlog::errors::exit_code_for;
use backlog::intake::run_intake;
use backlog::io::config::{PipelineConfig, load_config};
use backlog::io::git::Git;
use backlog::io::render::Templates;
use backlog::io::store::{read_store, with_store};
use backlog::io::tracker::GhTracker;
use backlog::issues::create_issues;
use backlog::logging;
use backlog::model::BacklogStore;
use backlog::provision::{ProvisionOptions, provision_worktrees};
use backlog::pull_request::{PrOptions, PrOutcome, create_pull_request};
use backlog::status::build_status;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "backlog",
    version,
    about = "Turn a backlog file into issues, branches, working copies and pull requests"
)]
struct Cli {
    /// State file shared by every command.
    #[arg(long, global = true, default_value = ".backlog/state.json")]
    state: PathBuf,
    /// Pipeline configuration (TOML). Defaults apply when missing.
    #[arg(long, global = true, default_value = ".backlog/config.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify each line of a backlog file into a stored item.
    Intake {
        #[arg(long)]
        input: PathBuf,
        /// Repository as owner/name. Resolved from the current directory if omitted.
        #[arg(long)]
        repo: Option<String>,
    },
    /// Create one tracker issue per item that has none.
    CreateIssues {
        /// Do not link development branches after creating issues.
        #[arg(long)]
        no_branches: bool,
    },
    /// Link a development branch to every issued item that lacks one.
    BackfillDevelopmentBranches {
        /// Branch to start from. Defaults to the repository's default branch.
        #[arg(long)]
        base: Option<String>,
    },
    /// Provision working copies in priority order up to the configured cap.
    ProvisionWorktrees {
        /// Launch the agent in every slot held this pass.
        #[arg(long)]
        agent: bool,
        /// Agent command template. Overrides config and environment.
        #[arg(long)]
        agent_command: Option<String>,
        /// Fail the command when an agent run does not succeed. Implies `--agent`.
        #[arg(long)]
        agent_required: bool,
    },
    /// Push an item's branch and open a pull request.
    CreatePr {
        #[arg(long)]
        issue: u64,
        #[arg(long)]
        base: Option<String>,
        /// Open ready for review instead of as a draft.
        #[arg(long)]
        ready: bool,
    },
    /// Merge a pull request once its required checks pass.
    MergePr {
        /// Pull request number, URL or branch.
        #[arg(long)]
        pr: String,
        #[arg(long, default_value = "squash")]
        method: MergeMethod,
        /// Keep the remote branch and the local working copy.
        #[arg(long)]
        keep_branch: bool,
    },
    /// Close the working copy and local branch for one target.
    Cleanup {
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        pr: Option<String>,
        #[arg(long)]
        issue: Option<u64>,
    },
    /// Show every item's stage and the active working-copy count.
    Status,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(exit_code_for(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let state = cli.state.as_path();
    match cli.command {
        Command::Intake { input, repo } => cmd_intake(state, &input, repo),
        Command::CreateIssues { no_branches } => cmd_create_issues(state, !no_branches),
        Command::BackfillDevelopmentBranches { base } => cmd_backfill(state, base.as_deref()),
        Command::ProvisionWorktrees {
            agent,
            agent_command,
            agent_required,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(command) = agent_command {
                config.agent.command = Some(command);
                config.validate()?;
            }
            let options = ProvisionOptions {
                run_agent: agent || agent_required,
                agent_required,
            };
            cmd_provision(state, &config, options)
        }
        Command::CreatePr { issue, base, ready } => {
            let config = load_config(&cli.config)?;
            let options = PrOptions {
                issue,
                base: base.as_deref(),
                ready,
            };
            cmd_create_pr(state, &config, options)
        }
        Command::MergePr {
            pr,
            method,
            keep_branch,
        } => cmd_merge_pr(
            state,
            MergeOptions {
                pr: &pr,
                method,
                keep_branch,
            },
        ),
        Command::Cleanup { branch, pr, issue } => {
            let selector = CleanupSelector::from_args(branch, pr, issue)?;
            cmd_cleanup(state, &selector)
        }
        Command::Status => {
            let config = load_config(&cli.config)?;
            cmd_status(state, &config)
        }
    }
}

/// Tracker scoped to the store's repository, or the current directory's.
fn tracker_for(store: &BacklogStore) -> GhTracker {
    let repo = (!store.repo.is_empty()).then(|| store.repo.clone());
    GhTracker::new(repo)
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("resolve current directory")
}

fn cmd_intake(state: &Path, input: &Path, repo: Option<String>) -> Result<()> {
    let outcome = run_intake(state, input, repo, &GhTracker::new(None))?;
    if outcome.created {
        println!("created {}", state.display());
    }
    println!(
        "added {}, duplicates {}, total {}",
        outcome.added, outcome.duplicates, outcome.total
    );
    Ok(())
}

fn cmd_create_issues(state: &Path, link_branches: bool) -> Result<()> {
    let templates = Templates::new();
    let summary = with_store(state, |store| {
        let tracker = tracker_for(store);
        create_issues(store, &tracker, &templates, link_branches)
    })?;
    println!(
        "created {}, linked {}, skipped {}",
        summary.created, summary.linked, summary.skipped
    );
    Ok(())
}

fn cmd_backfill(state: &Path, base: Option<&str>) -> Result<()> {
    let summary = with_store(state, |store| {
        let tracker = tracker_for(store);
        backfill_branches(store, &tracker, base)
    })?;
    println!("linked {}, failed {}", summary.linked, summary.failed);
    Ok(())
}

fn cmd_provision(state: &Path, config: &PipelineConfig, options: ProvisionOptions) -> Result<()> {
    let git = Git::new(current_dir()?);
    let templates = Templates::new();
    let summary = with_store(state, |store| {
        let tracker = tracker_for(store);
        provision_worktrees(store, &git, &tracker, config, &templates, options)
    })?;
    println!(
        "active {} -> {} (cap {}), provisioned {}, rerun {}, failed {}, deferred {}",
        summary.active_before,
        summary.active_after,
        config.max_active_worktrees,
        summary.provisioned,
        summary.rerun,
        summary.failed,
        summary.deferred
    );
    Ok(())
}

fn cmd_create_pr(state: &Path, config: &PipelineConfig, options: PrOptions<'_>) -> Result<()> {
    let git = Git::new(current_dir()?);
    let templates = Templates::new();
    let outcome = with_store(state, |store| {
        let tracker = tracker_for(store);
        create_pull_request(store, &git, &tracker, &templates, &config.remote, options)
    })?;
    if let PrOutcome::Existing(_) = outcome {
        println!("already open: {}", outcome.url());
    } else {
        println!("{}", outcome.url());
    }
    Ok(())
}

fn cmd_merge_pr(state: &Path, options: MergeOptions<'_>) -> Result<()> {
    let cwd = current_dir()?;
    let git = Git::new(&cwd);
    let report = with_store(state, |store| {
        let tracker = tracker_for(store);
        merge_pull_request(store, &git, &tracker, options, &cwd)
    })?;
    println!("merged {} ({})", report.pr, report.branch);
    if let Some(cleanup) = report.cleanup {
        print_cleanup(
            cleanup.worktree_closed,
            cleanup.branch_deleted,
            cleanup.skipped_current_dir.as_deref(),
        );
    }
    Ok(())
}

fn cmd_cleanup(state: &Path, selector: &CleanupSelector) -> Result<()> {
    let cwd = current_dir()?;
    let git = Git::new(&cwd);
    let report = with_store(state, |store| {
        let tracker = tracker_for(store);
        let branch = resolve_target_branch(selector, store, &tracker)?;
        cleanup_branch(store, &git, &branch, &cwd)
    })?;
    println!("branch {}", report.branch);
    print_cleanup(
        report.worktree_closed,
        report.branch_deleted,
        report.skipped_current_dir.as_deref(),
    );
    Ok(())
}

fn print_cleanup(worktree_closed: bool, branch_deleted: bool, skipped: Option<&Path>) {
    if let Some(path) = skipped {
        println!(
            "working copy {} is the current directory; left in place",
            path.display()
        );
        return;
    }
    println!("working copy closed: {}", yes_no(worktree_closed));
    println!("branch deleted: {}", yes_no(branch_deleted));
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn cmd_status(state: &Path, config: &PipelineConfig) -> Result<()> {
    let store = read_store(state)?;
    let git = Git::new(current_dir()?);
    let report = build_status(&store, &git, config)?;
    println!("{report}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_global_paths_after_subcommand() {
        let cli = Cli::parse_from(["backlog", "status", "--state", "s.json"]);
        assert_eq!(cli.state, PathBuf::from("s.json"));
        assert_eq!(cli.config, PathBuf::from(".backlog/config.toml"));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn parse_create_issues_links_by_default() {
        let cli = Cli::parse_from(["backlog", "create-issues"]);
        assert!(matches!(
            cli.command,
            Command::CreateIssues { no_branches: false }
        ));
    }

    #[test]
    fn parse_merge_method() {
        let cli = Cli::parse_from(["backlog", "merge-pr", "--pr", "12", "--method", "rebase"]);
        let Command::MergePr { method, .. } = cli.command else {
            panic!("expected merge-pr");
        };
        assert_eq!(method, MergeMethod::Rebase);

        let cli = Cli::parse_from(["backlog", "merge-pr", "--pr", "12"]);
        let Command::MergePr { method, .. } = cli.command else {
            panic!("expected merge-pr");
        };
        assert_eq!(method, MergeMethod::Squash);
    }

    #[test]
    fn unknown_merge_method_is_rejected() {
        assert!(
            Cli::try_parse_from(["backlog", "merge-pr", "--pr", "1", "--method", "ff"]).is_err()
        );
    }

    #[test]
    fn parse_provision_flags() {
        let cli = Cli::parse_from([
            "backlog",
            "provision-worktrees",
            "--agent-required",
            "--agent-command",
            "codex exec {{ brief_path }}",
        ]);
        let Command::ProvisionWorktrees {
            agent,
            agent_command,
            agent_required,
        } = cli.command
        else {
            panic!("expected provision-worktrees");
        };
        assert!(!agent);
        assert!(agent_required);
        assert_eq!(agent_command.as_deref(), Some("codex exec {{ brief_path }}"));
    }
}
