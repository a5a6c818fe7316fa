//! Boot strategy - bringing a board from power-off to a shell
//!
//! [`BootStrategy`] tracks the [`BootState`] of one board and drives it to a
//! requested state by first satisfying the states before it:
//!
//! ```text
//! off → bootstrap → start → uboot → shell
//! ```
//!
//! ## Architecture
//!
//! - `mod.rs`: tracked state, transition and force entry points
//! - `lifecycle`: the steps run for each state (bootstrap, start, ...)
//!
//! A strategy is not reentrant. One caller drives one board at a time, which
//! `&mut self` on every state-changing method enforces.

mod lifecycle;

use crate::capability::{
    BootloaderProtocol, Capability, ConsoleProtocol, PowerProtocol, RecoveryProtocol, ResetProtocol,
    ShellProtocol,
};
use crate::options::StrategyOptions;
use crate::provider::BuildProvider;
use crate::writer::ImageWriter;
use bootlab_shared::errors::{BootlabError, BootlabResult};
use bootlab_shared::state::BootState;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Hardware a strategy drives.
///
/// Reset and recovery are optional; every step using them checks for their
/// presence and documents what happens without them.
#[derive(Clone)]
pub struct Capabilities {
    pub power: Arc<dyn PowerProtocol>,
    pub console: Arc<dyn ConsoleProtocol>,
    pub bootloader: Arc<dyn BootloaderProtocol>,
    pub shell: Arc<dyn ShellProtocol>,
    pub reset: Option<Arc<dyn ResetProtocol>>,
    pub recovery: Option<Arc<dyn RecoveryProtocol>>,
}

/// Outcome of the last successful bootloader interrupt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootReport {
    /// Bootloader identification string.
    pub version: String,
    /// Time from the start of the `start` transition to the prompt.
    pub duration: Duration,
    pub reached_at: DateTime<Utc>,
}

/// Drives one board through its boot states.
pub struct BootStrategy {
    caps: Capabilities,
    provider: BuildProvider,
    writer: ImageWriter,
    options: StrategyOptions,
    status: BootState,
    bootstrapped: bool,
    last_report: Option<BootReport>,
}

impl BootStrategy {
    pub fn new(
        caps: Capabilities,
        provider: BuildProvider,
        writer: ImageWriter,
        options: StrategyOptions,
    ) -> Self {
        Self {
            caps,
            provider,
            writer,
            options,
            status: BootState::Unknown,
            bootstrapped: false,
            last_report: None,
        }
    }

    /// Currently tracked state.
    pub fn status(&self) -> BootState {
        self.status
    }

    /// Whether U-Boot has been written or sent since this strategy was created.
    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn last_report(&self) -> Option<&BootReport> {
        self.last_report.as_ref()
    }

    pub fn options(&self) -> &StrategyOptions {
        &self.options
    }

    pub fn provider(&self) -> &BuildProvider {
        &self.provider
    }

    pub fn writer(&self) -> &ImageWriter {
        &self.writer
    }

    /// Whether the U-Boot test system is driving this board.
    ///
    /// Set when the provider takes its source tree from the test
    /// environment. Starting the board only logs
    /// [`LAB_MODE_MARKER`](bootlab_shared::constants::boot::LAB_MODE_MARKER);
    /// a caller talking to the test system prints it to stdout itself.
    pub fn lab_mode(&self) -> bool {
        self.provider.options().env_source_dir.is_some()
    }

    /// Drive the board to `target`.
    ///
    /// Returns immediately if the board is already in `target`. On failure
    /// the tracked state is left as it was before the call, even if some
    /// earlier states were reached on the way.
    ///
    /// # Errors
    /// * `InvalidTransition` - `target` is `Unknown`
    /// * `NoTransitionPath` - The bound hardware can not reach `target`
    /// * Any error raised by the build, writer or a capability
    pub async fn transition(&mut self, target: BootState) -> BootlabResult<()> {
        let before = self.status;
        let result = self.transition_inner(target).await;
        if let Err(e) = &result
            && self.status != before
        {
            tracing::warn!(
                from = %self.status,
                to = %before,
                "Transition to {} failed ({}); restoring tracked state",
                target,
                e
            );
            self.status = before;
        }
        result
    }

    /// Like [`transition`](Self::transition), taking the state by name.
    pub async fn transition_named(&mut self, target: &str) -> BootlabResult<()> {
        self.transition(target.parse()?).await
    }

    fn transition_inner(&mut self, target: BootState) -> BoxFuture<'_, BootlabResult<()>> {
        Box::pin(async move {
            if !target.is_target() {
                return Err(BootlabError::InvalidTransition { target });
            }
            if target == self.status {
                return Ok(());
            }

            tracing::debug!(from = %self.status, to = %target, "Transition");
            // Each state first satisfies the one before it
            match target {
                BootState::Unknown => return Err(BootlabError::InvalidTransition { target }),
                BootState::Off => lifecycle::power_off(self).await?,
                BootState::Bootstrapped => lifecycle::bootstrap(self).await?,
                BootState::Started => {
                    self.transition_inner(BootState::Off).await?;
                    lifecycle::start(self).await?;
                }
                BootState::BootloaderReady => {
                    let started_at = Instant::now();
                    self.transition_inner(BootState::Started).await?;
                    let report = lifecycle::interrupt_bootloader(self, started_at).await?;
                    self.last_report = Some(report);
                }
                BootState::ShellReady => {
                    self.transition_inner(BootState::BootloaderReady).await?;
                    lifecycle::boot_to_shell(self).await?;
                }
            }

            self.status = target;
            Ok(())
        })
    }

    /// Mark the board as being in `target` without running its transition.
    ///
    /// Only activates the capability needed to talk to the board in that
    /// state. Use this when the board is known to be in `target` already.
    ///
    /// # Errors
    /// * `UnsupportedForcedState` - `target` is not off, uboot or shell
    pub async fn force(&mut self, target: BootState) -> BootlabResult<()> {
        if !target.can_force() {
            return Err(BootlabError::UnsupportedForcedState(target));
        }
        match target {
            BootState::Off => self.caps.power.activate().await?,
            BootState::BootloaderReady => self.caps.bootloader.activate().await?,
            BootState::ShellReady => self.caps.shell.activate().await?,
            other => return Err(BootlabError::UnsupportedForcedState(other)),
        }
        tracing::info!(state = %target, "Forced state");
        self.status = target;
        Ok(())
    }

    /// Like [`force`](Self::force), taking the state by name.
    pub async fn force_named(&mut self, target: &str) -> BootlabResult<()> {
        self.force(target.parse()?).await
    }
}
