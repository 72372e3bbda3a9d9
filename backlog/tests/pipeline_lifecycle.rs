//! Lifecycle tests driving every stage against one state file.
//!
//! The external tools are replaced by `FakeVcs` and `FakeTracker`; the state
//! file, lock and working-copy directories are real.

use std::fs;

use backlog::cleanup::{MergeOptions, merge_pull_request};
use backlog::core::types::{MergeMethod, Stage};
use backlog::intake::run_intake;
use backlog::io::config::PipelineConfig;
use backlog::io::render::Templates;
use backlog::io::store::{load_store, read_store, save_store, with_store};
use backlog::issues::create_issues;
use backlog::provision::{ProvisionOptions, provision_worktrees};
use backlog::pull_request::{PrOptions, create_pull_request};
use backlog::status::build_status;
use backlog::test_support::{FakeTracker, FakeVcs, canonical_tempdir};

const BACKLOG: &str = "\
# sprint 12
[P3] tidy the changelog
[P0] fix login crash on safari
[P1] add csv export
";

/// Intake → issues + branches → provision (cap 2) → PR → merge → the freed
/// slot goes to the deferred item.
///
/// Intake order gives issues 100 (P3), 101 (P0), 102 (P1); scheduling order
/// is 101, 102, 100.
#[test]
fn backlog_flows_from_intake_to_merge_and_frees_a_slot() {
    let (_temp, dir) = canonical_tempdir();
    let state = dir.join(".backlog/state.json");
    let input = dir.join("backlog.txt");
    fs::write(&input, BACKLOG).expect("write input");

    let vcs = FakeVcs::new();
    let tracker = FakeTracker::new();
    let templates = Templates::new();
    let config = PipelineConfig {
        worktree_root: dir.join(".worktrees"),
        max_active_worktrees: 2,
        ..PipelineConfig::default()
    };

    let intake = run_intake(&state, &input, None, &tracker).expect("intake");
    assert_eq!((intake.added, intake.total), (3, 3));
    assert!(intake.created);

    let issued = with_store(&state, |store| {
        create_issues(store, &tracker, &templates, true)
    })
    .expect("create issues");
    assert_eq!((issued.created, issued.linked), (3, 3));

    let first = with_store(&state, |store| {
        provision_worktrees(
            store,
            &vcs,
            &tracker,
            &config,
            &templates,
            ProvisionOptions::default(),
        )
    })
    .expect("first pass");
    assert_eq!(first.provisioned, 2);
    assert_eq!(first.deferred, 1);
    assert_eq!(
        vcs.calls_starting_with("create"),
        vec![
            "create issue/101-fix-login-crash-on-safari from origin/main",
            "create issue/102-add-csv-export from origin/main",
        ]
    );
    assert_eq!(tracker.comments.borrow().len(), 2);

    let pr = with_store(&state, |store| {
        create_pull_request(
            store,
            &vcs,
            &tracker,
            &templates,
            "origin",
            PrOptions {
                issue: 101,
                base: None,
                ready: true,
            },
        )
    })
    .expect("create pr");
    assert_eq!(pr.url(), "https://github.com/o/r/pull/501");

    let merged = with_store(&state, |store| {
        merge_pull_request(
            store,
            &vcs,
            &tracker,
            MergeOptions {
                pr: "501",
                method: MergeMethod::Squash,
                keep_branch: false,
            },
            &dir,
        )
    })
    .expect("merge");
    assert_eq!(merged.branch, "issue/101-fix-login-crash-on-safari");
    let cleanup = merged.cleanup.expect("cleanup ran");
    assert!(cleanup.worktree_closed && cleanup.branch_deleted);

    let second = with_store(&state, |store| {
        provision_worktrees(
            store,
            &vcs,
            &tracker,
            &config,
            &templates,
            ProvisionOptions::default(),
        )
    })
    .expect("second pass");
    assert_eq!(second.active_before, 1);
    assert_eq!(second.provisioned, 1);
    assert_eq!(second.active_after, 2);

    let store = read_store(&state).expect("read store");
    let report = build_status(&store, &vcs, &config).expect("status");
    let stages: Vec<(Option<u64>, Stage)> = report
        .lines
        .iter()
        .map(|line| (line.issue, line.stage))
        .collect();
    assert_eq!(
        stages,
        vec![
            (Some(101), Stage::CleanedUp),
            (Some(102), Stage::Provisioned),
            (Some(100), Stage::Provisioned),
        ]
    );
    assert_eq!(report.active, 2);
}

#[test]
fn unmodified_store_round_trips_byte_for_byte() {
    let (_temp, dir) = canonical_tempdir();
    let state = dir.join("state.json");
    let input = dir.join("backlog.txt");
    fs::write(&input, BACKLOG).expect("write input");
    let tracker = FakeTracker::new();

    run_intake(&state, &input, Some("acme/app".to_string()), &tracker).expect("intake");
    with_store(&state, |store| {
        create_issues(store, &tracker, &Templates::new(), true)
    })
    .expect("create issues");

    let original = fs::read_to_string(&state).expect("read original");
    let copy = dir.join("copy.json");
    save_store(&copy, &load_store(&state).expect("load")).expect("save");
    assert_eq!(fs::read_to_string(&copy).expect("read copy"), original);
}

#[test]
fn second_intake_of_same_file_adds_nothing() {
    let (_temp, dir) = canonical_tempdir();
    let state = dir.join("state.json");
    let input = dir.join("backlog.txt");
    fs::write(&input, BACKLOG).expect("write input");
    let tracker = FakeTracker::new();

    run_intake(&state, &input, None, &tracker).expect("first intake");
    let again = run_intake(&state, &input, None, &tracker).expect("second intake");
    assert_eq!(again.added, 0);
    assert_eq!(again.duplicates, 3);
    assert!(!again.created);
    assert_eq!(load_store(&state).expect("load").repo, "o/r");
}
