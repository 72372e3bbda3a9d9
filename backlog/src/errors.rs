//! Typed pipeline errors that map to distinct exit codes.
//!
//! Commands return `anyhow::Result`; `main` recovers these variants with
//! `downcast_ref` to choose the exit code. Everything else exits with
//! [`crate::exit_codes::FAILED`].

use thiserror::Error;

use crate::exit_codes;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Arguments were missing or contradictory.
    #[error("usage: {0}")]
    Usage(String),

    /// A stage ran before the stage it depends on recorded its marker.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external tool answered in a shape the pipeline cannot interpret.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("agent run required but {status} for issue #{issue}: {output}")]
    AgentRequired {
        issue: u64,
        status: String,
        output: String,
    },

    #[error("{0} is locked by another backlog command")]
    Locked(String),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => exit_codes::USAGE,
            Self::Precondition(_) => exit_codes::PRECONDITION,
            Self::ContractViolation(_) | Self::AgentRequired { .. } | Self::Locked(_) => {
                exit_codes::FAILED
            }
        }
    }
}

/// Exit code for any command error.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map_or(exit_codes::FAILED, PipelineError::exit_code)
}
