//! I/O helpers for pipeline commands: persistence, configuration, templates
//! and the external `git`/`gh` primitives.

pub mod config;
pub mod git;
pub mod process;
pub mod render;
pub mod store;
pub mod tracker;
