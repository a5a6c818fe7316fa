//! Write-method registry using the inventory pattern.
//!
//! Each board family registers a [`WriteMethod`] at compile time with
//! `inventory::submit!`. A method describes, as data, which artifacts are
//! written where and in which order, and how they are sent over USB. Looking
//! up an unknown family fails immediately instead of falling through a chain
//! of conditionals.

use bootlab_shared::errors::{BootlabError, BootlabResult};

/// Where an artifact comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// File relative to the build output directory.
    Build(&'static str),
    /// Vendor blob configured in the writer options.
    Blob(Blob),
}

/// Vendor blobs that are not produced by the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blob {
    Bl1,
    Bl2,
    Tzsw,
}

impl Blob {
    pub fn as_str(&self) -> &'static str {
        match self {
            Blob::Bl1 => "bl1",
            Blob::Bl2 => "bl2",
            Blob::Tzsw => "tzsw",
        }
    }
}

/// One stage of writing U-Boot to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Raw image written at an offset on the block device.
    Image {
        role: &'static str,
        source: Artifact,
        seek: u64,
        block_size: u64,
        count: Option<u64>,
    },
    /// File copied onto a mounted partition.
    Files {
        role: &'static str,
        source: Artifact,
        dest: &'static str,
        partition: u32,
        target_is_directory: bool,
    },
    /// Image loaded into a SPI flash emulator.
    Emulator {
        role: &'static str,
        source: Artifact,
    },
}

impl WriteStage {
    pub fn role(&self) -> &'static str {
        match self {
            WriteStage::Image { role, .. }
            | WriteStage::Files { role, .. }
            | WriteStage::Emulator { role, .. } => role,
        }
    }
}

/// One image sent over the USB download link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStage {
    pub role: &'static str,
    /// File in the build directory, or `None` for a blob built into the loader.
    pub source: Option<&'static str>,
    /// Phase name passed to the loader.
    pub phase: Option<&'static str>,
}

/// A board family's way of getting U-Boot onto the board.
#[derive(Debug)]
pub struct WriteMethod {
    pub name: &'static str,
    pub description: &'static str,
    /// Stages written to storage, in order. `None` if the family can not be written.
    pub write: Option<&'static [WriteStage]>,
    /// Images sent over USB, in order, before executing the last one.
    /// `None` if the family can not be sent.
    pub send: Option<&'static [SendStage]>,
}

impl WriteMethod {
    pub fn can_write(&self) -> bool {
        self.write.is_some()
    }

    pub fn can_send(&self) -> bool {
        self.send.is_some()
    }
}

/// Registration entry submitted by each method via inventory.
pub struct WriteMethodRegistration {
    pub method: WriteMethod,
}

inventory::collect!(WriteMethodRegistration);

/// Look up the method registered under `name`.
///
/// # Errors
/// * `UnsupportedWriteMethod` - No method with that name is registered
pub fn lookup(name: &str) -> BootlabResult<&'static WriteMethod> {
    for registration in inventory::iter::<WriteMethodRegistration> {
        if registration.method.name == name {
            tracing::debug!(method = name, "Found write method");
            return Ok(&registration.method);
        }
    }

    Err(BootlabError::UnsupportedWriteMethod {
        method: name.to_string(),
        operation: "writing".to_string(),
    })
}

/// Check if a method is registered.
pub fn is_registered(name: &str) -> bool {
    inventory::iter::<WriteMethodRegistration>().any(|r| r.method.name == name)
}

/// All registered methods, sorted by name.
pub fn available_methods() -> Vec<&'static WriteMethod> {
    let mut methods: Vec<_> = inventory::iter::<WriteMethodRegistration>()
        .map(|r| &r.method)
        .collect();
    methods.sort_by_key(|m| m.name);
    methods
}
