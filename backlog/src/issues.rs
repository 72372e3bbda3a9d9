//! `backlog create-issues`: one tracker issue per item, optionally chained
//! with branch linking.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::branches::{link_branch, needs_branch};
use crate::errors::PipelineError;
use crate::io::render::Templates;
use crate::io::tracker::{IssueRequest, Tracker};
use crate::model::{BacklogItem, BacklogStore};

/// Counts reported by `create-issues`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IssueSummary {
    pub created: usize,
    pub linked: usize,
    /// Items that already had an issue.
    pub skipped: usize,
}

/// Issue title: priority tag plus formatted title.
pub fn issue_title(item: &BacklogItem) -> String {
    format!("[{}] {}", item.priority, item.formatted_title)
}

/// Item labels that exist in the tracker, using the tracker's spelling.
pub fn filter_labels(item: &BacklogItem, existing: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for wanted in [&item.item_type, &item.priority, &item.topic] {
        let found = existing
            .iter()
            .find(|label| label.eq_ignore_ascii_case(wanted));
        if let Some(label) = found
            && !labels.contains(label)
        {
            labels.push(label.clone());
        }
    }
    labels
}

/// Issue number from the trailing path segment of its URL.
pub fn parse_issue_number(url: &str) -> Option<u64> {
    url.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<u64>().ok())
        .filter(|number| *number > 0)
}

/// Create issues for every item without one.
///
/// With `link_branches`, each issued item lacking a branch is also linked off
/// the default branch; any link failure aborts the run. An unparseable
/// issue URL always aborts the run.
pub fn create_issues<T: Tracker>(
    store: &mut BacklogStore,
    tracker: &T,
    templates: &Templates,
    link_branches: bool,
) -> Result<IssueSummary> {
    let mut summary = IssueSummary::default();
    let pending = store.items.iter().filter(|item| !item.is_issued()).count();
    summary.skipped = store.items.len() - pending;

    let existing_labels = if pending > 0 {
        tracker.list_labels().context("list tracker labels")?
    } else {
        Vec::new()
    };
    let needs_linking =
        link_branches && (pending > 0 || store.items.iter().any(needs_branch));
    let base = if needs_linking {
        Some(tracker.default_branch().context("resolve default branch")?)
    } else {
        None
    };
    debug!(pending, labels = existing_labels.len(), ?base, "creating issues");

    for item in &mut store.items {
        if !item.is_issued() {
            let request = IssueRequest {
                title: issue_title(item),
                body: templates.issue_body(item)?,
                labels: filter_labels(item, &existing_labels),
            };
            let url = tracker
                .create_issue(&request)
                .with_context(|| format!("create issue for item {}", item.id))?;
            let number = parse_issue_number(&url).ok_or_else(|| {
                PipelineError::ContractViolation(format!(
                    "issue URL for item {} has no numeric trailing segment: {url}",
                    item.id
                ))
            })?;
            info!(item = item.id, issue = number, %url, "issue created");
            item.created_issue_number = Some(number);
            item.created_issue_url = Some(url);
            summary.created += 1;
        }
        if let Some(base) = &base
            && needs_branch(item)
        {
            link_branch(item, tracker, base)?;
            summary.linked += 1;
        }
    }
    Ok(summary)
}
