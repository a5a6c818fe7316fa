//! Shared constants between the library and the CLI
//!
//! Values here are part of the contract with external tools (build tool
//! flags, environment variables of the U-Boot test system) and must not
//! drift between components.

/// Environment variables understood by the U-Boot test system.
pub mod envs {
    /// Overrides the build output directory for every board.
    pub const BUILD_DIR: &str = "U_BOOT_BUILD_DIR";

    /// Overrides the source directory used when no commit is requested.
    pub const SOURCE_DIR: &str = "U_BOOT_SOURCE_DIR";

    /// Trusted-firmware blob passed through to the build tool.
    pub const BL31: &str = "BL31";

    /// Extra binman input directories passed through to the build tool.
    pub const BINMAN_INDIRS: &str = "BINMAN_INDIRS";
}

/// Build tool defaults (buildman).
pub mod build {
    /// Default build tool executable.
    pub const DEFAULT_TOOL: &str = "buildman";

    /// Marker the tool prints when it produced a known-bad image.
    pub const NON_FUNCTIONAL_MARKER: &str = "is non-functional";

    /// Flag tried first: run mrproper only when an incremental build fails.
    pub const PRIMARY_FLAG: &str = "--fallback-mrproper";

    /// Flag used when the tool is too old to know the primary flag.
    pub const FALLBACK_FLAG: &str = "-m";

    /// Output emitted by tools that do not know the primary flag.
    pub const UNSUPPORTED_FLAG_PATTERN: &str = "no such option: --fallback-mrproper";

    /// Name of the generated configuration inside a build directory.
    pub const CONFIG_FILE: &str = ".config";
}

/// Boot monitoring defaults.
pub mod boot {
    /// Command that blocks until the booted system is up.
    pub const READY_COMMAND: &str = "systemctl is-system-running --wait";

    /// Time to hold recovery asserted after releasing reset (ms).
    pub const RECOVERY_SETTLE_MS: u64 = 200;

    /// Upper bound for catching the bootloader prompt (seconds).
    pub const INTERRUPT_TIMEOUT_SECS: u64 = 30;

    /// Line the U-Boot test system waits for on stdout before it reads
    /// board events.
    pub const LAB_MODE_MARKER: &str = "{lab mode}";
}

/// Image writer defaults.
pub mod writer {
    /// Time to let a storage write sync before handing the card back (ms).
    pub const MUX_SETTLE_MS: u64 = 1000;
}

/// Interactive console defaults.
pub mod console {
    /// Disconnect byte: FS (Ctrl + ]).
    pub const EXIT_CHAR: u8 = 0x1d;

    /// Window in which the disconnect byte must repeat (ms).
    pub const ESCAPE_WINDOW_MS: u64 = 500;

    /// Pacing between bytes sent to the remote end (ms).
    pub const TX_INTERVAL_MS: u64 = 5;

    /// Read buffer size.
    pub const BUF_SIZE: usize = 1024;
}
