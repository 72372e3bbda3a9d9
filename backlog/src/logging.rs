//! Diagnostic tracing for pipeline commands.
//!
//! - **Tracing (this module)**: progress and per-item failures via `RUST_LOG`,
//!   written to stderr.
//! - **Product output**: counts, URLs and the status table go to stdout from
//!   the command modules and are unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=backlog=info backlog provision-worktrees --agent
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
