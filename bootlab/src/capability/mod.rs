//! Capability abstraction for lab hardware.
//!
//! The strategy and the image writer never talk to hardware directly. Each
//! piece of lab equipment (power switch, reset line, recovery line, console,
//! SD multiplexer, USB loader, ...) is bound as a capability implementing one
//! of the traits below. Drivers for concrete equipment live outside this crate.
//!
//! All calls are blocking from the caller's point of view: the strategy awaits
//! each one before moving on, and drivers may perform bounded waits internally.

use async_trait::async_trait;
use bootlab_shared::errors::BootlabResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Common behaviour of every bound capability.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Identifier of the physical resource behind this capability.
    ///
    /// Two capabilities with the same identifier drive the same piece of
    /// hardware (e.g. a relay that provides both power and reset).
    fn resource(&self) -> &str;

    /// Prepare the capability for use.
    async fn activate(&self) -> BootlabResult<()>;

    /// Release the capability.
    async fn deactivate(&self) -> BootlabResult<()>;
}

/// Check if two capabilities drive the same physical resource.
pub fn same_resource<A, B>(a: &A, b: &B) -> bool
where
    A: Capability + ?Sized,
    B: Capability + ?Sized,
{
    a.resource() == b.resource()
}

// ============================================================================
// Power / reset / recovery
// ============================================================================

#[async_trait]
pub trait PowerProtocol: Capability {
    async fn on(&self) -> BootlabResult<()>;
    async fn off(&self) -> BootlabResult<()>;
    async fn cycle(&self) -> BootlabResult<()>;
}

/// How reset is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetMode {
    /// Full reset including power domains.
    Cold,
    /// Reset the SoC only; keeps e.g. the USB PHY powered.
    Warm,
}

impl ResetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetMode::Cold => "cold",
            ResetMode::Warm => "warm",
        }
    }
}

impl std::fmt::Display for ResetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ResetProtocol: Capability {
    /// Hold (`true`) or release (`false`) the board in reset.
    async fn set_reset_enable(&self, enable: bool, mode: ResetMode) -> BootlabResult<()>;

    /// Whether holding reset on this implementation stops the board's USB
    /// download port from enumerating.
    ///
    /// When true, recovery must be requested before reset is asserted.
    fn blocks_usb_enumeration(&self) -> bool;
}

#[async_trait]
pub trait RecoveryProtocol: Capability {
    /// Request (`true`) or drop (`false`) USB download / recovery mode.
    async fn set_enable(&self, enable: bool) -> BootlabResult<()>;
}

// ============================================================================
// Console / bootloader / shell
// ============================================================================

#[async_trait]
pub trait ConsoleProtocol: Capability {
    /// Drain whatever output has been buffered since the last read.
    async fn read_output(&self) -> BootlabResult<Vec<u8>>;
}

#[async_trait]
pub trait BootloaderProtocol: Capability {
    // `activate()` performs the interrupt-and-attach sequence and may time out
    // with `BootlabError::BootloaderInterruptTimeout`.

    /// Drain output buffered while interrupting the bootloader.
    async fn read_output(&self) -> BootlabResult<Vec<u8>>;

    /// Issue the boot command with the given arguments.
    async fn boot(&self, args: &str) -> BootlabResult<()>;

    /// Wait for the bootloader to hand over to the operating system.
    async fn await_boot(&self) -> BootlabResult<()>;

    /// Bootloader identification banner, e.g. `U-Boot 2024.01`.
    async fn version(&self) -> BootlabResult<String>;
}

/// Output of a shell command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

#[async_trait]
pub trait ShellProtocol: Capability {
    async fn run(&self, command: &str) -> BootlabResult<CommandOutput>;
}

// ============================================================================
// Storage / USB download
// ============================================================================

/// Position of a storage multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxMode {
    /// Card is attached to the lab host for writing.
    Host,
    /// Card is attached to the board under test.
    Device,
}

impl std::fmt::Display for MuxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuxMode::Host => f.write_str("host"),
            MuxMode::Device => f.write_str("dut"),
        }
    }
}

#[async_trait]
pub trait SdMuxProtocol: Capability {
    async fn set_mode(&self, mode: MuxMode) -> BootlabResult<()>;
}

/// Raw placement of an image on a block device (`dd` semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTarget {
    /// Offset in units of `block_size`.
    pub seek: u64,
    pub block_size: u64,
    /// Number of blocks to write, or the whole file.
    pub count: Option<u64>,
}

impl Default for ImageTarget {
    fn default() -> Self {
        Self {
            seek: 0,
            block_size: 512,
            count: None,
        }
    }
}

impl ImageTarget {
    /// Byte offset of the first written block.
    pub fn byte_offset(&self) -> u64 {
        self.seek * self.block_size
    }
}

/// Placement of files on a mounted partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTarget {
    /// Destination path inside the partition.
    pub dest: PathBuf,
    /// Partition index, 1-based.
    pub partition: u32,
    /// Whether the destination is a directory the files are copied into.
    pub target_is_directory: bool,
}

#[async_trait]
pub trait StorageProtocol: Capability {
    async fn write_image(&self, image: &Path, target: ImageTarget) -> BootlabResult<()>;
    async fn write_files(&self, files: &[PathBuf], target: &FileTarget) -> BootlabResult<()>;
}

#[async_trait]
pub trait EmulatorProtocol: Capability {
    /// Load an image into the SPI flash emulator.
    async fn write_image(&self, image: &Path) -> BootlabResult<()>;
}

#[async_trait]
pub trait UsbLoaderProtocol: Capability {
    /// Send one image over the USB download link.
    ///
    /// `image` is `None` when the loader supplies a built-in blob for `phase`.
    async fn load(&self, image: Option<&Path>, phase: Option<&str>) -> BootlabResult<()>;

    /// Jump to the last loaded image.
    async fn execute(&self) -> BootlabResult<()>;
}
