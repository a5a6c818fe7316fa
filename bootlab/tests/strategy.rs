//! Boot strategy integration tests against fake lab hardware.

use bootlab::{
    BootState, BootStrategy, BootlabError, BuildProvider, Capabilities, ProviderOptions,
    StrategyOptions,
};
use bootlab_shared::constants::boot;
use bootlab_test_utils::{FakeLab, FakeReset, InterruptBehavior, ScriptedRunner, TestDirs};
use std::sync::Arc;
use std::time::Duration;

struct Bench {
    lab: FakeLab,
    dirs: TestDirs,
    runner: Arc<ScriptedRunner>,
}

impl Bench {
    fn new() -> Self {
        Self::with_lab(FakeLab::new())
    }

    fn with_lab(lab: FakeLab) -> Self {
        Self {
            lab,
            dirs: TestDirs::new().unwrap(),
            runner: Arc::new(ScriptedRunner::new()),
        }
    }

    fn strategy(&self, method: &str, options: StrategyOptions) -> BootStrategy {
        self.strategy_with(self.lab.capabilities(), method, options)
    }

    fn strategy_with(
        &self,
        caps: Capabilities,
        method: &str,
        options: StrategyOptions,
    ) -> BootStrategy {
        let provider = BuildProvider::with_runner(self.dirs.provider_options(), self.runner.clone());
        BootStrategy::new(caps, provider, self.lab.writer(method).unwrap(), options)
    }
}

fn options(board: &str) -> StrategyOptions {
    StrategyOptions {
        recovery_settle_ms: 1,
        ..StrategyOptions::for_board(board)
    }
}

#[tokio::test]
async fn test_demo1_reaches_bootloader_from_existing_build() {
    let bench = Bench::new();
    let build = bench.dirs.prebuilt("demo1").unwrap();
    let mut strategy = bench.strategy(
        "rpi3",
        StrategyOptions {
            do_bootstrap: true,
            ..options("demo1")
        },
    );

    strategy.transition(BootState::BootloaderReady).await.unwrap();

    assert_eq!(strategy.status(), BootState::BootloaderReady);
    assert!(strategy.bootstrapped());
    // do_build is off: the existing build is written, nothing is built
    assert!(bench.runner.commands().is_empty());

    let log = &bench.lab.log;
    log.assert_order(&[
        "console.deactivate",
        "power.activate",
        "power.off",
        "sdmux.host",
        "storage.write_files(u-boot.bin->/rpi3-u-boot.bin)",
        "sdmux.dut",
        "console.activate",
        "reset.activate",
        "reset.assert(cold)",
        "power.cycle",
        "reset.release(cold)",
        "uboot.activate",
        "uboot.version",
    ]);
    assert_eq!(log.count("power.cycle"), 1);

    let report = strategy.last_report().unwrap();
    assert!(report.version.starts_with("U-Boot"));
    assert!(report.duration > Duration::ZERO);
    assert!(build.join("u-boot.bin").exists());
}

#[tokio::test]
async fn test_console_attached_before_reset_release() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.transition(BootState::Started).await.unwrap();

    let log = &bench.lab.log;
    let console = log.position("console.activate").unwrap();
    let release = log.position("reset.release(cold)").unwrap();
    assert!(console < release);
}

#[tokio::test]
async fn test_transition_to_current_state_is_noop() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.transition(BootState::Off).await.unwrap();
    assert_eq!(bench.lab.log.count("power.off"), 1);

    bench.lab.log.clear();
    strategy.transition(BootState::Off).await.unwrap();
    assert!(bench.lab.log.is_empty());
    assert_eq!(strategy.status(), BootState::Off);
}

#[tokio::test]
async fn test_unknown_is_never_a_target() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    let err = strategy.transition(BootState::Unknown).await.unwrap_err();
    assert!(matches!(err, BootlabError::InvalidTransition { .. }));

    strategy.transition(BootState::Off).await.unwrap();
    bench.lab.log.clear();
    let err = strategy.transition(BootState::Unknown).await.unwrap_err();
    assert!(matches!(err, BootlabError::InvalidTransition { .. }));
    assert_eq!(strategy.status(), BootState::Off);
    assert!(bench.lab.log.is_empty());
}

#[tokio::test]
async fn test_named_states() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.transition_named("start").await.unwrap();
    assert_eq!(strategy.status(), BootState::Started);

    let err = strategy.transition_named("linux").await.unwrap_err();
    assert!(matches!(err, BootlabError::UnknownState(ref s) if s == "linux"));
    assert_eq!(strategy.status(), BootState::Started);
}

#[tokio::test]
async fn test_shell_ready_runs_readiness_command() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.transition(BootState::ShellReady).await.unwrap();

    assert_eq!(strategy.status(), BootState::ShellReady);
    bench.lab.log.assert_order(&[
        "uboot.activate",
        "uboot.boot()",
        "uboot.await_boot",
        "shell.activate",
        "shell.run(systemctl is-system-running --wait)",
    ]);
}

#[tokio::test]
async fn test_failed_transition_keeps_previous_state() {
    let bench = Bench::new();
    bench.lab.shell.set_exit_status(1);
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.transition(BootState::Off).await.unwrap();
    let err = strategy.transition(BootState::ShellReady).await.unwrap_err();

    assert!(matches!(
        err,
        BootlabError::ShellCommandFailed { status: 1, ref output, .. } if output == "degraded"
    ));
    assert_eq!(strategy.status(), BootState::Off);
}

#[tokio::test]
async fn test_write_failure_does_not_advance_state() {
    let bench = Bench::new();
    bench.dirs.prebuilt("rpi_3").unwrap();
    bench.lab.storage.fail_on("write_files");
    let mut strategy = bench.strategy(
        "rpi3",
        StrategyOptions {
            do_bootstrap: true,
            ..options("rpi_3")
        },
    );

    let err = strategy.transition(BootState::Started).await.unwrap_err();

    assert!(matches!(err, BootlabError::WriteFailed { ref stage, .. } if stage == "uboot"));
    assert_eq!(strategy.status(), BootState::Unknown);
    assert!(!strategy.bootstrapped());
    // The card went back to the board anyway
    assert_eq!(bench.lab.log.matching("sdmux.").last().unwrap(), "sdmux.dut");
}

#[tokio::test]
async fn test_started_prepares_boot_once_bootstrapped() {
    let bench = Bench::new();
    bench.dirs.prebuilt("rpi_3").unwrap();
    let mut strategy = bench.strategy(
        "rpi3",
        StrategyOptions {
            do_bootstrap: true,
            ..options("rpi_3")
        },
    );

    strategy.transition(BootState::Started).await.unwrap();
    strategy.transition(BootState::Off).await.unwrap();
    bench.lab.log.clear();
    strategy.transition(BootState::Started).await.unwrap();

    // Second start does not write again
    assert!(bench.lab.log.matching("storage.write").is_empty());
    assert_eq!(bench.lab.log.matching("sdmux."), ["sdmux.dut"]);
}

#[tokio::test]
async fn test_same_resource_skips_power_cycle() {
    let lab = FakeLab::with_reset(|log| FakeReset::new(log).with_resource("power"));
    let bench = Bench::with_lab(lab);
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.transition(BootState::Started).await.unwrap();

    assert_eq!(bench.lab.log.count("power.cycle"), 0);
    bench
        .lab
        .log
        .assert_order(&["reset.assert(cold)", "reset.release(cold)"]);
}

#[tokio::test]
async fn test_start_without_reset_power_cycles() {
    let bench = Bench::new();
    let mut strategy =
        bench.strategy_with(bench.lab.capabilities_without_reset(), "qemu", options("qemu-x86"));

    strategy.transition(BootState::Started).await.unwrap();

    assert_eq!(bench.lab.log.count("power.cycle"), 1);
    assert!(bench.lab.log.matching("reset.").is_empty());
}

#[tokio::test]
async fn test_send_path_sequence() {
    let bench = Bench::new();
    bench.dirs.prebuilt("bananapi").unwrap();
    let mut strategy = bench.strategy(
        "sunxi",
        StrategyOptions {
            send_only: true,
            do_bootstrap: true,
            ..options("bananapi")
        },
    );

    strategy.transition(BootState::Started).await.unwrap();

    bench.lab.log.assert_order(&[
        "power.on",
        "reset.assert(warm)",
        "recovery.enable",
        "console.activate",
        "reset.release(warm)",
        "recovery.disable",
        "usb.load(sunxi-spl.bin,spl)",
        "usb.load(u-boot.bin,-)",
        "usb.execute",
    ]);
    // Sending started the board; no extra power cycle
    assert_eq!(bench.lab.log.count("power.cycle"), 0);
    assert_eq!(strategy.status(), BootState::Started);
}

#[tokio::test]
async fn test_send_path_recovery_first_when_reset_blocks_usb() {
    let lab = FakeLab::with_reset(|log| FakeReset::new(log).blocking_usb());
    let bench = Bench::with_lab(lab);
    bench.dirs.prebuilt("jetson-tk1").unwrap();
    let mut strategy = bench.strategy(
        "tegra",
        StrategyOptions {
            send_only: true,
            do_bootstrap: true,
            ..options("jetson-tk1")
        },
    );

    strategy.transition(BootState::Bootstrapped).await.unwrap();

    let log = &bench.lab.log;
    assert!(log.position("recovery.enable").unwrap() < log.position("reset.assert(warm)").unwrap());
    log.assert_order(&["usb.load(u-boot-dtb-tegra.bin,-)", "usb.execute"]);
}

#[tokio::test]
async fn test_send_path_needs_reset_and_recovery() {
    let bench = Bench::new();
    let mut strategy = bench.strategy_with(
        bench.lab.capabilities_without_reset(),
        "sunxi",
        StrategyOptions {
            send_only: true,
            ..options("bananapi")
        },
    );

    let err = strategy.transition(BootState::Bootstrapped).await.unwrap_err();

    assert!(matches!(
        err,
        BootlabError::NoTransitionPath { to: BootState::Bootstrapped, .. }
    ));
    assert_eq!(strategy.status(), BootState::Unknown);
    assert!(bench.lab.log.is_empty());
}

#[tokio::test]
async fn test_interrupt_timeout_surfaces_console_output() {
    let bench = Bench::new();
    bench.lab.bootloader.set_behavior(InterruptBehavior::DriverTimeout);
    bench.lab.console.set_output(b"DRAM:  1 GiB\nResetting CPU ...\n");
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    let err = strategy.transition(BootState::BootloaderReady).await.unwrap_err();

    assert!(err.is_interrupt_timeout());
    assert!(matches!(
        err,
        BootlabError::BootloaderInterruptTimeout { ref console_output, .. }
            if console_output.contains("Resetting CPU")
    ));
    assert_eq!(strategy.status(), BootState::Unknown);
    assert!(strategy.last_report().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_interrupt_is_bounded() {
    let bench = Bench::new();
    bench.lab.bootloader.set_behavior(InterruptBehavior::Hang);
    let mut strategy = bench.strategy(
        "qemu",
        StrategyOptions {
            interrupt_timeout_secs: 5,
            ..options("qemu-x86")
        },
    );

    let err = strategy.transition(BootState::BootloaderReady).await.unwrap_err();

    match err {
        BootlabError::BootloaderInterruptTimeout { elapsed, .. } => {
            assert!(elapsed >= Duration::from_secs(5));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(bench.lab.log.position("console.read_output").is_some());
}

#[tokio::test]
async fn test_force_activates_only_the_needed_capability() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    strategy.force(BootState::Off).await.unwrap();
    assert_eq!(bench.lab.log.events(), ["power.activate"]);
    assert_eq!(strategy.status(), BootState::Off);

    bench.lab.log.clear();
    strategy.force_named("shell").await.unwrap();
    assert_eq!(bench.lab.log.events(), ["shell.activate"]);
    assert_eq!(strategy.status(), BootState::ShellReady);

    strategy.force(BootState::BootloaderReady).await.unwrap();
    assert_eq!(strategy.status(), BootState::BootloaderReady);
}

#[tokio::test]
async fn test_force_rejects_other_states() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("qemu", options("qemu-x86"));

    for state in [BootState::Unknown, BootState::Bootstrapped, BootState::Started] {
        let err = strategy.force(state).await.unwrap_err();
        assert!(matches!(err, BootlabError::UnsupportedForcedState(s) if s == state));
    }
    assert_eq!(strategy.status(), BootState::Unknown);
    assert!(bench.lab.log.is_empty());
}

#[tokio::test]
async fn test_patch_failure_leaves_worktree_clean_and_state_unchanged() {
    let bench = Bench::new();
    bench
        .runner
        .fail(" apply ", 1, "error: patch failed: board/sunxi/board.c:12");
    let patch = bench.dirs.root.path().join("fix.patch");
    std::fs::write(&patch, "--- a/board.c\n+++ b/board.c\n").unwrap();

    let mut strategy = bench.strategy(
        "rpi3",
        StrategyOptions {
            do_build: true,
            commit: Some("v2024.10".into()),
            patch: Some(patch),
            ..options("rpi_3")
        },
    );
    strategy.transition(BootState::Off).await.unwrap();

    let err = strategy.transition(BootState::Bootstrapped).await.unwrap_err();

    assert!(matches!(err, BootlabError::PatchApplyFailed { ref board, .. } if board == "rpi_3"));
    assert_eq!(strategy.status(), BootState::Off);

    let lines = bench.runner.command_lines();
    let apply = lines.iter().position(|c| c.contains(" apply ")).unwrap();
    let abort = lines.iter().position(|c| c.ends_with("am --abort")).unwrap();
    let reset = lines.iter().rposition(|c| c.ends_with("reset --hard")).unwrap();
    assert!(apply < abort && abort < reset);
    // Nothing was built or written
    assert!(bench.runner.matching("buildman").is_empty());
    assert!(bench.lab.log.matching("storage.").is_empty());
}

#[tokio::test]
async fn test_empty_board_is_rejected_without_build() {
    let bench = Bench::new();
    let mut strategy = bench.strategy("rpi3", options(""));
    strategy.transition(BootState::Off).await.unwrap();

    let err = strategy.transition(BootState::Bootstrapped).await.unwrap_err();

    assert!(matches!(err, BootlabError::Config(ref msg) if msg.contains("board name")));
    assert_eq!(strategy.status(), BootState::Off);
    assert!(bench.lab.log.matching("storage.").is_empty());
}

#[tokio::test]
async fn test_lab_mode_follows_test_environment_source() {
    let bench = Bench::new();
    let plain = bench.strategy("qemu", options("qemu-x86"));
    assert!(!plain.lab_mode());

    let provider = BuildProvider::with_runner(
        ProviderOptions {
            env_source_dir: Some(bench.dirs.source_dir()),
            ..bench.dirs.provider_options()
        },
        bench.runner.clone(),
    );
    let mut strategy = BootStrategy::new(
        bench.lab.capabilities(),
        provider,
        bench.lab.writer("qemu").unwrap(),
        options("qemu-x86"),
    );
    assert!(strategy.lab_mode());
    assert_eq!(boot::LAB_MODE_MARKER, "{lab mode}");

    strategy.transition(BootState::Started).await.unwrap();
    assert_eq!(strategy.status(), BootState::Started);
}
