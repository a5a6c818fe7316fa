//! bootlab - bring embedded boards from power-off to a shell prompt
//!
//! The pieces, leaves first:
//! - [`writer`]: writes or sends U-Boot using a per-board-family method
//! - [`provider`]: builds U-Boot, optionally from a commit in a per-board worktree
//! - [`relay`]: interactive console relay for manual use
//! - [`strategy`]: the boot state machine tying the above to the lab hardware
//!
//! Lab hardware is reached only through the traits in [`capability`].

pub mod capability;
pub mod options;
pub mod provider;
pub mod relay;
pub mod strategy;
pub mod util;
pub mod writer;

pub use bootlab_shared::errors::{BootlabError, BootlabResult};
pub use bootlab_shared::state::BootState;
pub use options::{BootlabOptions, ProviderOptions, StrategyOptions, WriterOptions};
pub use provider::{BuildInfo, BuildProvider, BuildRequest, BuildResult, PatchSource};
pub use relay::{ConsoleRelay, RelayExit, RelayOptions};
pub use strategy::{BootReport, BootStrategy, Capabilities};
pub use writer::{ImageWriter, WriteSpec};
