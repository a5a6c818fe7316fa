//! Configuration for bootlab.
//!
//! Everything the library needs to know about the lab environment is carried
//! in these structs and threaded into components at construction. The only
//! place the process environment is consulted is [`ProviderOptions::with_env`],
//! which the caller invokes explicitly.

use bootlab_shared::constants::{boot, build, envs, writer};
use dirs::{cache_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Base directory name for bootlab data under the user cache directory.
const BOOTLAB_DIR: &str = "bootlab";

// ============================================================================
// Top-level options
// ============================================================================

/// All configuration for one board.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BootlabOptions {
    #[serde(default)]
    pub provider: ProviderOptions,

    #[serde(default)]
    pub writer: WriterOptions,

    #[serde(default)]
    pub strategy: StrategyOptions,
}

// ============================================================================
// Build provider options
// ============================================================================

/// Paths and tool settings for building U-Boot.
///
/// Build output path precedence:
/// 1. `build_dir` (explicit override)
/// 2. `env_build_dir` (environment-equivalent override)
/// 3. `build_base/<board>`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Build tool executable.
    ///
    /// Default: buildman
    #[serde(default = "default_tool")]
    pub tool: String,

    /// Base output directory; each board builds in `build_base/<board>`.
    #[serde(default = "default_build_base")]
    pub build_base: PathBuf,

    /// Directory holding one git worktree per board.
    #[serde(default = "default_workdirs")]
    pub workdirs: PathBuf,

    /// U-Boot source repository.
    ///
    /// Default: current directory
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Explicit build directory for every board.
    #[serde(default)]
    pub build_dir: Option<PathBuf>,

    /// Build directory from the environment (`U_BOOT_BUILD_DIR`).
    #[serde(default)]
    pub env_build_dir: Option<PathBuf>,

    /// Source directory from the environment (`U_BOOT_SOURCE_DIR`).
    #[serde(default)]
    pub env_source_dir: Option<PathBuf>,

    /// Build this board instead of the one the strategy was configured with.
    #[serde(default)]
    pub board_override: Option<String>,

    /// Trusted-firmware blob exported as `BL31`.
    #[serde(default)]
    pub bl31: Option<PathBuf>,

    /// Blob directory exported as `BINMAN_INDIRS`.
    ///
    /// When set, this directory is part of the build result and must exist.
    #[serde(default)]
    pub binman_indir: Option<PathBuf>,

    /// Force a clean (mrproper) build.
    #[serde(default)]
    pub do_clean: bool,

    /// Output marker that turns a successful build into a failure.
    #[serde(default = "default_non_functional_marker")]
    pub non_functional_marker: String,

    #[serde(default = "default_primary_flag")]
    pub primary_flag: String,

    #[serde(default = "default_fallback_flag")]
    pub fallback_flag: String,

    /// Tool output meaning `primary_flag` is not supported.
    #[serde(default = "default_unsupported_flag_pattern")]
    pub unsupported_flag_pattern: String,

    /// Number of SPL banners the board prints, for test harnesses.
    #[serde(default)]
    pub spl_banner_times: Option<u32>,
}

fn default_tool() -> String {
    build::DEFAULT_TOOL.to_string()
}

fn bootlab_cache() -> PathBuf {
    cache_dir()
        .or_else(|| home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join(BOOTLAB_DIR)
}

fn default_build_base() -> PathBuf {
    bootlab_cache().join("b")
}

fn default_workdirs() -> PathBuf {
    bootlab_cache().join("workdirs")
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_non_functional_marker() -> String {
    build::NON_FUNCTIONAL_MARKER.to_string()
}

fn default_primary_flag() -> String {
    build::PRIMARY_FLAG.to_string()
}

fn default_fallback_flag() -> String {
    build::FALLBACK_FLAG.to_string()
}

fn default_unsupported_flag_pattern() -> String {
    build::UNSUPPORTED_FLAG_PATTERN.to_string()
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            build_base: default_build_base(),
            workdirs: default_workdirs(),
            source_dir: default_source_dir(),
            build_dir: None,
            env_build_dir: None,
            env_source_dir: None,
            board_override: None,
            bl31: None,
            binman_indir: None,
            do_clean: false,
            non_functional_marker: default_non_functional_marker(),
            primary_flag: default_primary_flag(),
            fallback_flag: default_fallback_flag(),
            unsupported_flag_pattern: default_unsupported_flag_pattern(),
            spl_banner_times: None,
        }
    }
}

impl ProviderOptions {
    /// Fill the environment-equivalent overrides from the process environment.
    ///
    /// Empty variables are treated as unset.
    pub fn with_env(mut self) -> Self {
        let var = |name: &str| {
            std::env::var_os(name)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        if let Some(dir) = var(envs::BUILD_DIR) {
            self.env_build_dir = Some(dir);
        }
        if let Some(dir) = var(envs::SOURCE_DIR) {
            self.env_source_dir = Some(dir);
        }
        self
    }
}

// ============================================================================
// Image writer options
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Writing method, e.g. "rpi3" or "sunxi".
    #[serde(default = "default_method")]
    pub method: String,

    /// Samsung first-stage blob.
    #[serde(default)]
    pub bl1: Option<PathBuf>,

    /// Samsung second-stage blob.
    #[serde(default)]
    pub bl2: Option<PathBuf>,

    /// Samsung TrustZone software blob.
    #[serde(default)]
    pub tzsw: Option<PathBuf>,

    /// Delay before handing the card back to the board.
    ///
    /// Default: 1000ms
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

fn default_method() -> String {
    "qemu".to_string()
}

fn default_settle_delay_ms() -> u64 {
    writer::MUX_SETTLE_MS
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            method: default_method(),
            bl1: None,
            bl2: None,
            tzsw: None,
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl WriterOptions {
    pub fn for_method(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ============================================================================
// Strategy options
// ============================================================================

/// Switches that control how the strategy brings a board up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// U-Boot board name, e.g. "rpi_3".
    #[serde(default)]
    pub board: String,

    /// The board can only be bootstrapped over USB (no storage to write).
    #[serde(default)]
    pub send_only: bool,

    /// Write or send U-Boot on the first start.
    #[serde(default)]
    pub do_bootstrap: bool,

    /// Build U-Boot before bootstrapping instead of reusing the last build.
    #[serde(default)]
    pub do_build: bool,

    /// Send over USB even if the board could be written.
    #[serde(default)]
    pub do_send: bool,

    /// Commit to build from, via a per-board worktree.
    #[serde(default)]
    pub commit: Option<String>,

    /// Patch applied on top of `commit`.
    #[serde(default)]
    pub patch: Option<PathBuf>,

    /// Time recovery stays asserted after reset is released.
    ///
    /// Default: 200ms
    #[serde(default = "default_recovery_settle_ms")]
    pub recovery_settle_ms: u64,

    /// Upper bound for catching the bootloader prompt.
    ///
    /// Default: 30s
    #[serde(default = "default_interrupt_timeout_secs")]
    pub interrupt_timeout_secs: u64,

    /// Shell command that must succeed before the shell counts as ready.
    #[serde(default = "default_ready_command")]
    pub ready_command: String,
}

fn default_recovery_settle_ms() -> u64 {
    boot::RECOVERY_SETTLE_MS
}

fn default_interrupt_timeout_secs() -> u64 {
    boot::INTERRUPT_TIMEOUT_SECS
}

fn default_ready_command() -> String {
    boot::READY_COMMAND.to_string()
}

impl Default for StrategyOptions {
    fn default() -> Self {
        Self {
            board: String::new(),
            send_only: false,
            do_bootstrap: false,
            do_build: false,
            do_send: false,
            commit: None,
            patch: None,
            recovery_settle_ms: default_recovery_settle_ms(),
            interrupt_timeout_secs: default_interrupt_timeout_secs(),
            ready_command: default_ready_command(),
        }
    }
}

impl StrategyOptions {
    pub fn for_board(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            ..Default::default()
        }
    }

    /// Whether bootstrapping goes over the USB download link.
    pub fn use_send(&self) -> bool {
        self.send_only || self.do_send
    }

    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }

    pub fn interrupt_timeout(&self) -> Duration {
        Duration::from_secs(self.interrupt_timeout_secs)
    }
}
