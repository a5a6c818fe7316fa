//! Bootlab Shared - types common to the core library and the CLI
//!
//! This crate contains the error taxonomy, the tracked boot state and
//! constants used by both the orchestration library (bootlab) and the
//! command-line front-end.

pub mod constants;
pub mod errors;
pub mod state;

pub use errors::{BootlabError, BootlabResult};
pub use state::BootState;
