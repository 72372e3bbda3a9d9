//! Persisted backlog data model.

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{AgentRunStatus, Stage};

/// The whole state file: one record per backlog, items in intake order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BacklogStore {
    pub created_at: String,
    pub source_file: String,
    pub repo: String,
    pub items: Vec<BacklogItem>,
}

/// One work item. Stage markers are filled in pipeline order and never cleared.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BacklogItem {
    pub id: u64,
    pub raw: String,
    pub formatted_title: String,
    pub formatted_description: String,
    pub topic: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub priority: String,
    pub priority_score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_issue_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_issue_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_workspace_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_last_run_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_last_run_status: Option<AgentRunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_last_run_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_up_at: Option<String>,
}

/// Result of one agent launch, copied onto the item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentRun {
    pub workspace_path: PathBuf,
    pub ran_at: String,
    pub status: AgentRunStatus,
    pub output: String,
}

impl BacklogItem {
    pub fn is_issued(&self) -> bool {
        self.created_issue_number.is_some()
    }

    pub fn stage(&self) -> Stage {
        if self.cleaned_up_at.is_some() {
            Stage::CleanedUp
        } else if self.pr_url.is_some() {
            Stage::PrOpen
        } else if self.worktree_path.is_some() {
            Stage::Provisioned
        } else if self.branch.is_some() {
            Stage::Branched
        } else if self.created_issue_number.is_some() {
            Stage::Issued
        } else {
            Stage::New
        }
    }

    pub fn record_agent_run(&mut self, run: &AgentRun) {
        self.agent_workspace_path = Some(run.workspace_path.clone());
        self.agent_last_run_at = Some(run.ran_at.clone());
        self.agent_last_run_status = Some(run.status);
        self.agent_last_run_output = Some(run.output.clone());
    }
}

impl BacklogStore {
    pub fn new(created_at: String, source_file: String, repo: String) -> Self {
        Self {
            created_at,
            source_file,
            repo,
            items: Vec::new(),
        }
    }

    /// Next unused id. Ids continue past the current maximum, so ids of items
    /// removed by hand are never handed out again within this file.
    pub fn next_id(&self) -> u64 {
        self.items.iter().map(|item| item.id).max().map_or(1, |id| id + 1)
    }

    pub fn find_by_issue(&self, issue_number: u64) -> Option<&BacklogItem> {
        self.items
            .iter()
            .find(|item| item.created_issue_number == Some(issue_number))
    }

    pub fn find_by_issue_mut(&mut self, issue_number: u64) -> Option<&mut BacklogItem> {
        self.items
            .iter_mut()
            .find(|item| item.created_issue_number == Some(issue_number))
    }

    pub fn find_by_branch_mut(&mut self, branch: &str) -> Option<&mut BacklogItem> {
        self.items
            .iter_mut()
            .find(|item| item.branch.as_deref() == Some(branch))
    }
}

/// Current time as RFC 3339 UTC with second precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
