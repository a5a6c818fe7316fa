#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Variables that would leak the caller's lab setup into a test.
const ISOLATED_ENV: &[&str] = &[
    "BOOTLAB_CONFIG",
    "BOOTLAB_BOARD",
    "BOOTLAB_LOG_DIR",
    "U_BOOT_BUILD_DIR",
    "U_BOOT_SOURCE_DIR",
    "RUST_LOG",
];

pub struct TestContext {
    pub cmd: Command,
    pub dir: TempDir,
}

impl TestContext {
    /// Another command sharing this context's directory.
    pub fn new_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_bootlab");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        for var in ISOLATED_ENV {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Write `yaml` as the config file and return its path.
    pub fn write_config(&self, yaml: &str) -> PathBuf {
        let path = self.dir.path().join("bootlab.yaml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn bootlab() -> TestContext {
    let dir = TempDir::new().unwrap();
    let bin_path: &str = env!("CARGO_BIN_EXE_bootlab");
    let mut cmd = Command::new(bin_path);
    cmd.timeout(Duration::from_secs(30));
    for var in ISOLATED_ENV {
        cmd.env_remove(var);
    }

    TestContext { cmd, dir }
}
