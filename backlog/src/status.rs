//! `backlog status`: a read-only view of every item's stage.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::selector::{active_under_root, by_priority};
use crate::core::types::Stage;
use crate::io::config::PipelineConfig;
use crate::io::git::{Vcs, WorktreeEntry};
use crate::model::BacklogStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub id: u64,
    pub issue: Option<u64>,
    pub priority: String,
    pub priority_score: i64,
    pub stage: Stage,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub lines: Vec<StatusLine>,
    pub active: usize,
    pub cap: usize,
}

/// Lines in scheduling order plus the live working-copy count.
pub fn build_status<V: Vcs>(
    store: &BacklogStore,
    vcs: &V,
    config: &PipelineConfig,
) -> Result<StatusReport> {
    let lines = by_priority(&store.items)
        .into_iter()
        .map(|idx| {
            let item = &store.items[idx];
            StatusLine {
                id: item.id,
                issue: item.created_issue_number,
                priority: item.priority.clone(),
                priority_score: item.priority_score,
                stage: item.stage(),
                title: item.formatted_title.clone(),
            }
        })
        .collect();

    // A root that does not exist yet holds no working copies.
    let active = match config.worktree_root.canonicalize() {
        Ok(root) => {
            let paths: Vec<PathBuf> = vcs
                .list_worktrees()
                .context("list worktrees")?
                .into_iter()
                .filter(WorktreeEntry::is_live)
                .map(|entry| entry.path)
                .collect();
            active_under_root(&paths, &root).len()
        }
        Err(_) => 0,
    };

    Ok(StatusReport {
        lines,
        active,
        cap: config.max_active_worktrees,
    })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            let issue = line
                .issue
                .map_or_else(|| "-".to_string(), |n| format!("#{n}"));
            writeln!(
                f,
                "{:>4}  {:<6} {:<11} {} {:>3}  {}",
                line.id,
                issue,
                line.stage.as_str(),
                line.priority,
                line.priority_score,
                line.title
            )?;
        }
        write!(f, "active working copies: {}/{}", self.active, self.cap)
    }
}
