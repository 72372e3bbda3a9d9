//! Template rendering for tracker text, briefs and agent commands.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::model::BacklogItem;

const ISSUE_BODY_TEMPLATE: &str = include_str!("templates/issue_body.md");
const PR_BODY_TEMPLATE: &str = include_str!("templates/pr_body.md");
const ISSUE_COMMENT_TEMPLATE: &str = include_str!("templates/issue_comment.md");
const BRIEF_FALLBACK_TEMPLATE: &str = include_str!("templates/brief_fallback.md");

/// Embedded templates, compiled once per command.
pub struct Templates {
    env: Environment<'static>,
}

impl Default for Templates {
    fn default() -> Self {
        Self::new()
    }
}

impl Templates {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("issue_body", ISSUE_BODY_TEMPLATE)
            .expect("issue body template should be valid");
        env.add_template("pr_body", PR_BODY_TEMPLATE)
            .expect("pr body template should be valid");
        env.add_template("issue_comment", ISSUE_COMMENT_TEMPLATE)
            .expect("issue comment template should be valid");
        env.add_template("brief_fallback", BRIEF_FALLBACK_TEMPLATE)
            .expect("brief fallback template should be valid");
        Self { env }
    }

    pub fn issue_body(&self, item: &BacklogItem) -> Result<String> {
        let template = self.env.get_template("issue_body")?;
        let rendered = template.render(context! {
            description => item.formatted_description.trim(),
            item_type => &item.item_type,
            priority => &item.priority,
            topic => &item.topic,
            raw => item.raw.trim(),
        })?;
        Ok(rendered)
    }

    pub fn pr_body(&self, item: &BacklogItem, issue_number: u64) -> Result<String> {
        let template = self.env.get_template("pr_body")?;
        let rendered = template.render(context! {
            issue_number => issue_number,
            raw => item.raw.trim(),
            description => item.formatted_description.trim(),
            agent_status => item.agent_last_run_status.map(|s| s.as_str()),
        })?;
        Ok(rendered)
    }

    pub fn issue_comment(
        &self,
        branch: &str,
        worktree_path: &Path,
        agent_status: &str,
    ) -> Result<String> {
        let template = self.env.get_template("issue_comment")?;
        let rendered = template.render(context! {
            branch => branch,
            worktree_path => worktree_path.display().to_string(),
            agent_status => agent_status,
        })?;
        Ok(rendered)
    }

    /// Locally reconstructed brief used when the live issue body is unavailable.
    pub fn fallback_brief(&self, item: &BacklogItem) -> Result<String> {
        let template = self.env.get_template("brief_fallback")?;
        let rendered = template.render(context! {
            title => &item.formatted_title,
            description => item.formatted_description.trim(),
            item_type => &item.item_type,
            priority => &item.priority,
            topic => &item.topic,
            raw => item.raw.trim(),
        })?;
        Ok(rendered)
    }
}

/// Values substituted into an agent command template.
#[derive(Debug, Clone)]
pub struct CommandVars<'a> {
    pub issue_number: u64,
    pub branch: &'a str,
    pub title: &'a str,
    pub worktree_path: &'a Path,
    pub agent_workspace: &'a Path,
    pub brief_path: &'a Path,
}

/// Render an agent command template into a `sh -c` script.
///
/// String values are shell-quoted before substitution, so a placeholder
/// always expands to exactly one shell word.
pub fn render_command(template: &str, vars: &CommandVars<'_>) -> Result<String> {
    let quote = |text: &str| shell_words::quote(text).into_owned();
    let quote_path = |path: &Path| quote(&path.display().to_string());
    let env = Environment::new();
    env.render_str(
        template,
        context! {
            issue_number => vars.issue_number,
            branch => quote(vars.branch),
            title => quote(vars.title),
            worktree_path => quote_path(vars.worktree_path),
            agent_workspace => quote_path(vars.agent_workspace),
            brief_path => quote_path(vars.brief_path),
        },
    )
    .context("render agent command template")
}
