//! Pattern-matching classification of raw backlog lines.
//!
//! Produces the type, priority, topic and display text of an item. Pure and
//! deterministic: the same line always classifies the same way.

use std::sync::LazyLock;

use regex::Regex;

/// Classification attributes for one raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub title: String,
    pub description: String,
    pub topic: String,
    pub item_type: String,
    pub priority: String,
    pub priority_score: i64,
}

const TITLE_MAX_CHARS: usize = 80;

static PRIORITY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(p[0-3])\]").expect("valid priority tag regex"));
static TOPIC_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btopic:([a-z0-9_-]+)").expect("valid topic regex"));
static LEADING_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[([A-Za-z][A-Za-z0-9_-]*)\]\s*").expect("valid tag regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid space regex"));

// Checked in order; first match wins.
const TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    ("bug", &["fix", "bug", "crash", "error", "broken", "fail"]),
    ("docs", &["doc", "docs", "readme", "typo"]),
    ("chore", &["refactor", "cleanup", "bump", "upgrade", "chore"]),
    ("feature", &["add", "implement", "support", "new", "allow", "create"]),
];

const PRIORITY_KEYWORDS: &[(&str, &[&str])] = &[
    ("P0", &["urgent", "critical", "asap", "blocker", "p0"]),
    ("P1", &["high", "important", "p1"]),
    ("P3", &["low", "someday", "minor", "nice to have", "p3"]),
];

const TOPIC_KEYWORDS: &[(&str, &[&str])] = &[
    ("auth", &["auth", "login", "logout", "password", "session", "sso"]),
    ("ui", &["ui", "css", "button", "layout", "page", "screen"]),
    ("api", &["api", "endpoint", "rest", "graphql"]),
    ("data", &["database", "db", "migration", "schema", "query"]),
    ("ci", &["ci", "pipeline", "build", "deploy"]),
    ("docs", &["docs", "readme", "documentation"]),
];

/// Classify one raw input line.
pub fn classify(raw: &str) -> Classification {
    let raw = raw.trim();
    let lowered = raw.to_lowercase();
    let words = words(&lowered);

    let item_type = match_keywords(TYPE_KEYWORDS, &lowered, &words)
        .unwrap_or("task")
        .to_string();
    let priority = PRIORITY_TAG
        .captures(raw)
        .map(|caps| caps[1].to_uppercase())
        .or_else(|| match_keywords(PRIORITY_KEYWORDS, &lowered, &words).map(str::to_string))
        .unwrap_or_else(|| "P2".to_string());

    let leading_tag = LEADING_TAG
        .captures(raw)
        .map(|caps| caps[1].to_lowercase())
        .filter(|tag| !is_priority_tag(tag));
    let topic = TOPIC_TAG
        .captures(raw)
        .map(|caps| caps[1].to_lowercase())
        .or(leading_tag)
        .or_else(|| match_keywords(TOPIC_KEYWORDS, &lowered, &words).map(str::to_string))
        .unwrap_or_else(|| "general".to_string());

    let cleaned = clean_text(raw);
    let priority_score = priority_score(&priority, &item_type);
    Classification {
        title: format_title(&cleaned),
        description: format_description(&cleaned),
        topic,
        item_type,
        priority,
        priority_score,
    }
}

/// Ordering score: priority level plus a small bonus by type.
pub fn priority_score(priority: &str, item_type: &str) -> i64 {
    let base = match priority {
        "P0" => 100,
        "P1" => 75,
        "P3" => 25,
        _ => 50,
    };
    let bonus = match item_type {
        "bug" => 5,
        "feature" => 2,
        _ => 0,
    };
    base + bonus
}

fn is_priority_tag(tag: &str) -> bool {
    matches!(tag, "p0" | "p1" | "p2" | "p3")
}

fn words(lowered: &str) -> Vec<&str> {
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect()
}

fn match_keywords<'a>(
    table: &'a [(&'a str, &'a [&'a str])],
    lowered: &str,
    words: &[&str],
) -> Option<&'a str> {
    table.iter().find_map(|(label, keywords)| {
        keywords
            .iter()
            .any(|kw| {
                if kw.contains(' ') {
                    lowered.contains(*kw)
                } else {
                    words.iter().any(|w| w == kw || w.strip_suffix('s') == Some(*kw))
                }
            })
            .then_some(*label)
    })
}

/// Strip tags and collapse whitespace.
fn clean_text(raw: &str) -> String {
    let without_priority = PRIORITY_TAG.replace_all(raw, " ");
    let without_topic = TOPIC_TAG.replace_all(&without_priority, " ");
    let trimmed = without_topic.trim();
    let without_leading = LEADING_TAG.replace(trimmed, "");
    SPACES.replace_all(without_leading.trim(), " ").into_owned()
}

fn format_title(cleaned: &str) -> String {
    if cleaned.is_empty() {
        return "Untitled".to_string();
    }
    let title = capitalize(cleaned);
    if title.chars().count() <= TITLE_MAX_CHARS {
        return title;
    }
    let truncated: String = title.chars().take(TITLE_MAX_CHARS).collect();
    truncated.trim_end().to_string()
}

fn format_description(cleaned: &str) -> String {
    let mut description = capitalize(cleaned);
    if !description.ends_with(['.', '!', '?']) {
        description.push('.');
    }
    description
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
