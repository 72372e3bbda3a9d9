//! `backlog intake`: turn a flat file of raw lines into backlog items.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::core::classifier::classify;
use crate::io::store::{StoreLock, load_store, save_store};
use crate::io::tracker::Tracker;
use crate::model::{BacklogItem, BacklogStore, timestamp_now};

/// Result of one intake run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeOutcome {
    pub added: usize,
    /// Lines whose raw text is already in the store.
    pub duplicates: usize,
    /// True when this run created the store file.
    pub created: bool,
    pub total: usize,
}

/// Raw item lines: trimmed, non-blank, not `#` comments.
pub fn parse_lines(contents: &str) -> Vec<&str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Append one classified item per new line. Returns `(added, duplicates)`.
pub fn add_lines(store: &mut BacklogStore, lines: &[&str]) -> (usize, usize) {
    let mut added = 0;
    let mut duplicates = 0;
    for raw in lines {
        if store.items.iter().any(|item| item.raw == *raw) {
            debug!(raw, "skipping duplicate line");
            duplicates += 1;
            continue;
        }
        let id = store.next_id();
        store.items.push(new_item(id, raw));
        added += 1;
    }
    (added, duplicates)
}

fn new_item(id: u64, raw: &str) -> BacklogItem {
    let c = classify(raw);
    BacklogItem {
        id,
        raw: raw.to_string(),
        formatted_title: c.title,
        formatted_description: c.description,
        topic: c.topic,
        item_type: c.item_type,
        priority: c.priority,
        priority_score: c.priority_score,
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

/// Create or extend the store at `state_path` from `input`.
///
/// `repo` defaults to the tracker's repository for the current directory;
/// if that cannot be resolved the store keeps an empty `repo`.
pub fn run_intake<T: Tracker>(
    state_path: &Path,
    input: &Path,
    repo: Option<String>,
    tracker: &T,
) -> Result<IntakeOutcome> {
    let contents =
        fs::read_to_string(input).with_context(|| format!("read input {}", input.display()))?;
    let lines = parse_lines(&contents);

    let _lock = StoreLock::acquire(state_path)?;
    let created = !state_path.exists();
    let mut store = if created {
        BacklogStore::new(
            timestamp_now(),
            input.display().to_string(),
            String::new(),
        )
    } else {
        load_store(state_path)?
    };

    if let Some(repo) = repo {
        store.repo = repo;
    } else if store.repo.is_empty() {
        store.repo = match tracker.repo_name() {
            Ok(name) => name,
            Err(err) => {
                warn!(
                    error = %format!("{err:#}"),
                    "could not resolve repository; leaving repo empty"
                );
                String::new()
            }
        };
    }

    let (added, duplicates) = add_lines(&mut store, &lines);
    save_store(state_path, &store)?;
    info!(added, duplicates, path = %state_path.display(), "intake complete");

    Ok(IntakeOutcome {
        added,
        duplicates,
        created,
        total: store.items.len(),
    })
}
