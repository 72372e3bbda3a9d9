//! Deterministic branch and working-copy naming.
//!
//! The branch name is the idempotency key for every stage after issue
//! creation, so the normalization here must never change.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Prefix shared by every managed development branch.
pub const BRANCH_PREFIX: &str = "issue/";

/// Maximum slug length in characters.
pub const SLUG_MAX_LEN: usize = 48;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9 -]").expect("valid slug regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").expect("valid space regex"));
static DASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").expect("valid dash regex"));

/// Normalize a title into a branch slug.
///
/// Lowercase, drop anything outside `[a-z0-9 -]`, space runs become a
/// single `-`, repeated `-` collapse, then truncate to [`SLUG_MAX_LEN`].
/// Nothing is trimmed, so a title that starts with dropped characters and a
/// space yields a leading `-`.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = DISALLOWED.replace_all(&lowered, "");
    let dashed = SPACES.replace_all(&stripped, "-");
    let collapsed = DASHES.replace_all(&dashed, "-");
    // Only ASCII survives the filter, so char and byte counts agree.
    collapsed.chars().take(SLUG_MAX_LEN).collect()
}

/// Branch name for an issue: `issue/{number}-{slug}`.
///
/// Titles that normalize to nothing yield `issue/{number}`.
pub fn branch_name(issue_number: u64, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        return format!("{BRANCH_PREFIX}{issue_number}");
    }
    format!("{BRANCH_PREFIX}{issue_number}-{slug}")
}

/// Directory name for a branch's working copy under the worktree root.
pub fn worktree_dir_name(branch: &str) -> String {
    branch.replace('/', "-")
}

/// Full working-copy path for a branch.
pub fn worktree_path(root: &Path, branch: &str) -> PathBuf {
    root.join(worktree_dir_name(branch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_strips_punctuation() {
        assert_eq!(branch_name(42, "Fix login bug!!"), "issue/42-fix-login-bug");
    }

    #[test]
    fn slug_collapses_spaces_and_dashes() {
        assert_eq!(slugify("Add   dark -- mode to UI"), "add-dark-mode-to-ui");
    }

    #[test]
    fn slug_keeps_dashes_left_by_stripped_edges() {
        assert_eq!(branch_name(5, "\u{2014} fix"), "issue/5--fix");
        assert_eq!(slugify(" tidy "), "-tidy-");
        assert_eq!(slugify("mode\tto"), "modeto");
    }

    #[test]
    fn slug_truncates_to_limit() {
        let title = "a".repeat(60);
        assert_eq!(slugify(&title).len(), SLUG_MAX_LEN);
    }

    #[test]
    fn slug_drops_non_ascii() {
        assert_eq!(slugify("Café résumé export"), "caf-rsum-export");
    }

    #[test]
    fn empty_slug_falls_back_to_bare_issue_branch() {
        assert_eq!(branch_name(7, "!!!"), "issue/7");
    }

    #[test]
    fn worktree_path_flattens_branch() {
        let path = worktree_path(Path::new("/tmp/wt"), "issue/3-x");
        assert_eq!(path, PathBuf::from("/tmp/wt/issue-3-x"));
    }
}
