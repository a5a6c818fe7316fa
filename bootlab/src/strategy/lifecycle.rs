//! Steps run on the way to each boot state.

use super::{BootReport, BootStrategy};
use crate::capability::{Capability, RecoveryProtocol, ResetMode, ResetProtocol, same_resource};
use crate::provider::{BuildRequest, PatchSource};
use bootlab_shared::constants::boot;
use bootlab_shared::errors::{BootlabError, BootlabResult};
use bootlab_shared::state::BootState;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

/// Disconnect the console and switch the board off.
pub(super) async fn power_off(strategy: &BootStrategy) -> BootlabResult<()> {
    let caps = &strategy.caps;
    caps.console.deactivate().await?;
    caps.power.activate().await?;
    caps.power.off().await
}

/// Build (or locate) U-Boot and write or send it to the board.
pub(super) async fn bootstrap(strategy: &mut BootStrategy) -> BootlabResult<()> {
    // The send path needs both reset and recovery
    let recovery_lines = if strategy.options.use_send() {
        Some(recovery_lines(strategy)?)
    } else {
        None
    };

    let image_dir = locate_build(strategy).await?;
    tracing::info!("Bootstrapping U-Boot from dir {}", image_dir.display());

    match recovery_lines {
        Some((reset, recovery)) => {
            enter_recovery(strategy, reset.as_ref(), recovery.as_ref()).await?;
            strategy.writer.send(&image_dir).await?;
        }
        None => strategy.writer.write(&image_dir).await?,
    }

    strategy.bootstrapped = true;
    Ok(())
}

async fn locate_build(strategy: &BootStrategy) -> BootlabResult<PathBuf> {
    let options = &strategy.options;
    if options.board.is_empty() {
        return Err(BootlabError::Config("board name must not be empty".into()));
    }
    if !options.do_build {
        return Ok(strategy.provider.get_build_path(&options.board));
    }

    let mut request = BuildRequest::new(options.board.as_str());
    if let Some(commit) = &options.commit {
        request = request.commit(commit.as_str());
    }
    if let Some(patch) = &options.patch {
        request = request.patch(PatchSource::File(patch.clone()));
    }
    Ok(strategy.provider.build(&request).await?.build_path)
}

type RecoveryLines = (Arc<dyn ResetProtocol>, Arc<dyn RecoveryProtocol>);

fn recovery_lines(strategy: &BootStrategy) -> BootlabResult<RecoveryLines> {
    match (&strategy.caps.reset, &strategy.caps.recovery) {
        (Some(reset), Some(recovery)) => Ok((reset.clone(), recovery.clone())),
        _ => Err(BootlabError::NoTransitionPath {
            from: strategy.status,
            to: BootState::Bootstrapped,
            reason: "sending over USB needs reset and recovery capabilities".to_string(),
        }),
    }
}

/// Put the board into USB recovery mode.
///
/// Reset is held while recovery is requested, then released so the board
/// comes up in its download mode. The console is attached before release so
/// no output is lost.
async fn enter_recovery(
    strategy: &BootStrategy,
    reset: &dyn ResetProtocol,
    recovery: &dyn RecoveryProtocol,
) -> BootlabResult<()> {
    let caps = &strategy.caps;
    caps.power.activate().await?;
    reset.activate().await?;
    caps.power.on().await?;

    if reset.blocks_usb_enumeration() {
        // Holding reset first would keep the USB device from enumerating
        recovery.activate().await?;
        recovery.set_enable(true).await?;
        reset.set_reset_enable(true, ResetMode::Warm).await?;
    } else {
        reset.set_reset_enable(true, ResetMode::Warm).await?;
        recovery.activate().await?;
        recovery.set_enable(true).await?;
    }

    caps.console.activate().await?;
    reset.set_reset_enable(false, ResetMode::Warm).await?;

    tokio::time::sleep(strategy.options.recovery_settle()).await;
    recovery.set_enable(false).await
}

/// Power-cycle or reset the board so it starts booting.
pub(super) async fn start(strategy: &mut BootStrategy) -> BootlabResult<()> {
    if strategy.lab_mode() {
        tracing::info!("{}", boot::LAB_MODE_MARKER);
    }

    if !strategy.bootstrapped && strategy.options.do_bootstrap {
        strategy.transition_inner(BootState::Bootstrapped).await?;
    } else {
        strategy.writer.prepare_boot().await?;
    }

    // Sending already started the board
    if strategy.options.use_send() {
        return Ok(());
    }

    let caps = &strategy.caps;
    caps.console.activate().await?;

    let Some(reset) = &caps.reset else {
        caps.power.activate().await?;
        return caps.power.cycle().await;
    };

    // Hold in reset across the power cycle, to avoid booting the board twice
    reset.activate().await?;
    reset.set_reset_enable(true, ResetMode::Cold).await?;
    if !same_resource(reset.as_ref(), caps.power.as_ref()) {
        caps.power.activate().await?;
        caps.power.cycle().await?;
    }
    reset.set_reset_enable(false, ResetMode::Cold).await
}

/// Catch the bootloader prompt.
///
/// Bounded by both the bootloader driver's own timeout and the configured
/// interrupt timeout. On a timeout the console output collected so far is
/// returned with the error.
pub(super) async fn interrupt_bootloader(
    strategy: &BootStrategy,
    started_at: Instant,
) -> BootlabResult<BootReport> {
    let caps = &strategy.caps;
    let begin = Instant::now();

    let attempt =
        tokio::time::timeout(strategy.options.interrupt_timeout(), caps.bootloader.activate()).await;
    match attempt {
        Ok(Ok(())) => {}
        Ok(Err(e)) if !e.is_interrupt_timeout() => return Err(e),
        Ok(Err(_)) | Err(_) => {
            let console_output = drain_console(strategy).await;
            return Err(BootlabError::BootloaderInterruptTimeout {
                elapsed: begin.elapsed(),
                console_output,
            });
        }
    }

    let output = caps.bootloader.read_output().await?;
    tracing::debug!(output = %String::from_utf8_lossy(&output), "Bootloader output");

    let version = caps.bootloader.version().await?;
    let duration = started_at.elapsed();
    tracing::info!(
        version = %version,
        "U-Boot is ready in {:.1}s",
        duration.as_secs_f64()
    );

    Ok(BootReport {
        version,
        duration,
        reached_at: chrono::Utc::now(),
    })
}

async fn drain_console(strategy: &BootStrategy) -> String {
    match strategy.caps.console.read_output().await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if !text.is_empty() {
                tracing::warn!("Console output before timeout:\n{}", text);
            }
            text
        }
        Err(e) => {
            tracing::warn!("Failed to read console output: {}", e);
            String::new()
        }
    }
}

/// Let U-Boot boot the OS and wait for the system to come up.
pub(super) async fn boot_to_shell(strategy: &BootStrategy) -> BootlabResult<()> {
    let caps = &strategy.caps;
    caps.bootloader.boot("").await?;
    caps.bootloader.await_boot().await?;
    caps.shell.activate().await?;

    let command = strategy.options.ready_command.as_str();
    let output = caps.shell.run(command).await?;
    if !output.success() {
        return Err(BootlabError::ShellCommandFailed {
            command: command.to_string(),
            status: output.exit_status,
            output: output.stdout.join("\n"),
        });
    }
    Ok(())
}
