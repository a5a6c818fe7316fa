//! Error types shared by every bootlab component.
//!
//! Errors are grouped by the component that raises them:
//! - state machine: [`BootlabError::InvalidTransition`], [`BootlabError::NoTransitionPath`],
//!   [`BootlabError::UnsupportedForcedState`]
//! - build: [`BootlabError::ToolInvocationFailed`], [`BootlabError::NonFunctionalArtifact`],
//!   [`BootlabError::PatchApplyFailed`]
//! - flashing: [`BootlabError::UnsupportedWriteMethod`], [`BootlabError::WriteFailed`],
//!   [`BootlabError::SendFailed`]
//! - boot monitoring: [`BootlabError::BootloaderInterruptTimeout`]
//! - console relay: [`BootlabError::RelayIo`]

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::state::BootState;

/// Result alias used across bootlab.
pub type BootlabResult<T> = Result<T, BootlabError>;

#[derive(Debug, Error)]
pub enum BootlabError {
    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------
    /// The requested state can never be a transition target.
    #[error("can not transition to {target}")]
    InvalidTransition { target: BootState },

    /// No transition rule leads from `from` to `to` with the bound capabilities.
    #[error("no transition found from {from} to {to}: {reason}")]
    NoTransitionPath {
        from: BootState,
        to: BootState,
        reason: String,
    },

    /// The requested state can not be forced.
    #[error("can not force state {0}")]
    UnsupportedForcedState(BootState),

    /// A state name did not match any known state.
    #[error("unknown state '{0}'")]
    UnknownState(String),

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------
    /// An external tool could not run or exited unsuccessfully.
    #[error("{command} failed for board {board} ({status}):\n{output}")]
    ToolInvocationFailed {
        board: String,
        command: String,
        status: String,
        output: String,
    },

    /// The build tool succeeded but reported a known-bad artifact.
    #[error("build failed for board {board}: {line}")]
    NonFunctionalArtifact { board: String, line: String },

    /// Applying a patch failed; the worktree has already been cleaned.
    #[error("failed to apply patch {patch} for board {board}:\n{output}")]
    PatchApplyFailed {
        board: String,
        patch: String,
        output: String,
    },

    /// A build finished but a declared artifact directory is absent or empty.
    #[error("build for board {board} produced no artifacts in {}", path.display())]
    MissingArtifacts { board: String, path: PathBuf },

    // ------------------------------------------------------------------
    // Flashing
    // ------------------------------------------------------------------
    /// The board family has no registered method for this operation.
    #[error("unknown {operation} method '{method}'")]
    UnsupportedWriteMethod { method: String, operation: String },

    /// Writing one stage of the image failed.
    #[error("writing {stage} with method {method} failed: {reason}")]
    WriteFailed {
        method: String,
        stage: String,
        reason: String,
    },

    /// Sending one stage of the image over USB failed.
    #[error("sending {stage} with method {method} failed: {reason}")]
    SendFailed {
        method: String,
        stage: String,
        reason: String,
    },

    // ------------------------------------------------------------------
    // Boot monitoring
    // ------------------------------------------------------------------
    /// The bootloader prompt was not caught before the board's boot timeout.
    #[error(
        "timed out after {:.1}s waiting for the bootloader prompt; console output:\n{console_output}",
        elapsed.as_secs_f64()
    )]
    BootloaderInterruptTimeout {
        elapsed: Duration,
        console_output: String,
    },

    /// The shell readiness command did not succeed.
    #[error("command '{command}' exited with status {status}:\n{output}")]
    ShellCommandFailed {
        command: String,
        status: i32,
        output: String,
    },

    /// A capability driver reported a failure.
    #[error("{capability}: {reason}")]
    Capability { capability: String, reason: String },

    // ------------------------------------------------------------------
    // Console relay
    // ------------------------------------------------------------------
    #[error("console relay: {0}")]
    RelayIo(#[from] io::Error),

    /// Configuration could not be loaded or is inconsistent.
    #[error("config: {0}")]
    Config(String),
}

impl BootlabError {
    /// Shorthand for a capability failure.
    pub fn capability(capability: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        BootlabError::Capability {
            capability: capability.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is a timeout while waiting for the bootloader.
    pub fn is_interrupt_timeout(&self) -> bool {
        matches!(self, BootlabError::BootloaderInterruptTimeout { .. })
    }
}
