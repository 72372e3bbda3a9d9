//! Shared deterministic types for the backlog pipeline.
//!
//! These types define stable contracts between pipeline stages. They do not
//! depend on external state or I/O.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome of the most recent agent launch for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRunStatus {
    Succeeded,
    Failed,
    /// No command template configured; the workspace was still prepared.
    Skipped,
}

impl AgentRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AgentRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a new working copy gets its branch from.
///
/// Resolved by two existence checks (local, then remote) and dispatched to
/// exactly one creation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOrigin {
    /// A local branch with the name exists; check it out into the worktree.
    AttachLocal,
    /// Only the remote has it; fetch and create a tracking branch.
    TrackRemote,
    /// Nobody has it; fetch the default branch and branch off it.
    CreateFromDefault,
}

impl BranchOrigin {
    pub fn from_existence(local_exists: bool, remote_exists: bool) -> Self {
        if local_exists {
            Self::AttachLocal
        } else if remote_exists {
            Self::TrackRemote
        } else {
            Self::CreateFromDefault
        }
    }
}

/// Merge strategy for `merge-pr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub const fn flag(self) -> &'static str {
        match self {
            Self::Merge => "--merge",
            Self::Squash => "--squash",
            Self::Rebase => "--rebase",
        }
    }
}

impl FromStr for MergeMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(Self::Merge),
            "squash" => Ok(Self::Squash),
            "rebase" => Ok(Self::Rebase),
            other => Err(format!(
                "unknown merge method '{other}' (expected merge, squash or rebase)"
            )),
        }
    }
}

/// State of a pull request's required checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksStatus {
    Passing,
    Pending,
    Failing(Vec<String>),
    /// The repository declares no required checks for the base branch.
    NoneRequired,
}

impl ChecksStatus {
    pub fn allows_merge(&self) -> bool {
        matches!(self, Self::Passing | Self::NoneRequired)
    }
}

/// Pipeline stage an item has reached, derived from its stage markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    New,
    Issued,
    Branched,
    Provisioned,
    PrOpen,
    CleanedUp,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Issued => "issued",
            Self::Branched => "branched",
            Self::Provisioned => "provisioned",
            Self::PrOpen => "pr-open",
            Self::CleanedUp => "cleaned",
        }
    }
}
