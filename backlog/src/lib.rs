//! Backlog orchestration pipeline.
//!
//! Turns a flat backlog file into tracker issues, links a deterministic
//! development branch to each one, keeps a bounded set of working copies
//! provisioned in priority order, optionally launches an agent inside each,
//! and carries finished work through pull request, merge and cleanup. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (classification, naming,
//!   selection, invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (state file, config, templates,
//!   `git` and `gh`). The external tools sit behind traits so tests can swap
//!   in fakes.
//!
//! Stage modules ([`intake`], [`issues`], [`branches`], [`provision`],
//! [`pull_request`], [`cleanup`], [`status`]) coordinate core logic with I/O
//! to implement CLI commands.

pub mod agent;
pub mod branches;
pub mod cleanup;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod intake;
pub mod io;
pub mod issues;
pub mod logging;
pub mod model;
pub mod provision;
pub mod pull_request;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
