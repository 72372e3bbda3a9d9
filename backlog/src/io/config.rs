//! Pipeline configuration stored under `.backlog/config.toml`.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Pipeline configuration (TOML).
///
/// Edited by humans. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory under which working copies are created. Relative paths
    /// resolve against the current directory.
    pub worktree_root: PathBuf,

    /// Hard cap on simultaneously active working copies under the root.
    pub max_active_worktrees: usize,

    /// Remote used for branch lookups, fetches and pushes.
    pub remote: String,

    pub agent: AgentConfig,
}

/// Agent launch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Subdirectory of each working copy that holds the agent workspace.
    pub workspace_dir: String,

    /// Name of the task brief written into the workspace.
    pub brief_file: String,

    /// Reference document copied next to the brief when it exists.
    pub skill_path: Option<PathBuf>,

    /// Command template; `None` means agent runs are recorded as skipped.
    pub command: Option<String>,

    /// Wall-clock bound on one agent run. Unbounded when unset.
    pub timeout_secs: Option<u64>,

    /// Truncate captured agent output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worktree_root: PathBuf::from(".worktrees"),
            max_active_worktrees: 3,
            remote: "origin".to_string(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace_dir: ".agent".to_string(),
            brief_file: "ISSUE.md".to_string(),
            skill_path: None,
            command: None,
            timeout_secs: None,
            output_limit_bytes: 100_000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_active_worktrees == 0 {
            return Err(anyhow!("max_active_worktrees must be > 0"));
        }
        if self.worktree_root.as_os_str().is_empty() {
            return Err(anyhow!("worktree_root must be non-empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must be non-empty"));
        }
        self.agent.validate()
    }

    /// Apply `BACKLOG_*` overrides through `lookup` (normally `std::env::var`).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(root) = lookup("BACKLOG_WORKTREE_ROOT") {
            self.worktree_root = PathBuf::from(root);
        }
        if let Some(dir) = lookup("BACKLOG_AGENT_WORKSPACE_DIR") {
            self.agent.workspace_dir = dir;
        }
        if let Some(file) = lookup("BACKLOG_AGENT_BRIEF_FILE") {
            self.agent.brief_file = file;
        }
        if let Some(path) = lookup("BACKLOG_AGENT_SKILL_PATH") {
            self.agent.skill_path = Some(PathBuf::from(path));
        }
        if let Some(command) = lookup("BACKLOG_AGENT_COMMAND") {
            self.agent.command = Some(command);
        }
        if let Some(secs) = lookup("BACKLOG_AGENT_TIMEOUT_SECS") {
            let secs = secs
                .trim()
                .parse::<u64>()
                .with_context(|| format!("parse BACKLOG_AGENT_TIMEOUT_SECS={secs}"))?;
            self.agent.timeout_secs = Some(secs);
        }
        Ok(())
    }
}

impl AgentConfig {
    fn validate(&self) -> Result<()> {
        if !is_plain_name(&self.workspace_dir) {
            return Err(anyhow!(
                "agent.workspace_dir must be a plain relative name, got '{}'",
                self.workspace_dir
            ));
        }
        if !is_plain_name(&self.brief_file) {
            return Err(anyhow!(
                "agent.brief_file must be a plain relative name, got '{}'",
                self.brief_file
            ));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.timeout_secs == Some(0) {
            return Err(anyhow!("agent.timeout_secs must be > 0 when set"));
        }
        if self.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(anyhow!("agent.command must be non-empty when set"));
        }
        Ok(())
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Load config from a TOML file, then apply environment overrides.
///
/// If the file is missing, starts from `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        debug!(path = %path.display(), "config missing; using defaults");
        PipelineConfig::default()
    };
    cfg.apply_overrides(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
