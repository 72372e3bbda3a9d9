//! Stable exit codes for backlog CLI commands.

/// Command succeeded. Backfill with per-item failures still exits here.
pub const OK: i32 = 0;
/// An external command failed, a response broke its contract, or a required
/// agent run did not succeed.
pub const FAILED: i32 = 1;
/// Arguments were missing or contradictory. Matches clap's own usage exit.
pub const USAGE: i32 = 2;
/// A stage was invoked before its prerequisite stage recorded its marker.
pub const PRECONDITION: i32 = 3;
