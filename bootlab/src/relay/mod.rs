//! Interactive console relay.
//!
//! Connects the local terminal to a remote serial console (usually a TCP
//! serial bridge) until the user types the escape byte (Ctrl-]) twice or the
//! remote end closes. Keystrokes are sent one byte per tick since many
//! serial bridges drop characters when sent a burst.
//!
//! The relay is for manual use only; [`BootStrategy`](crate::BootStrategy)
//! never runs it.

mod escape;
mod term;

pub use escape::EscapeDetector;
pub use term::{RawModeGuard, StdinLease};

use bootlab_shared::constants::console;
use bootlab_shared::errors::BootlabResult;
use std::collections::VecDeque;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

/// Relay tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Byte that, typed twice, ends the session.
    pub escape_byte: u8,
    /// Time allowed between the two escape bytes.
    pub escape_window: Duration,
    /// Delay between bytes sent to the remote end.
    pub tx_interval: Duration,
    /// Size of a single read from the remote end.
    pub buffer_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            escape_byte: console::EXIT_CHAR,
            escape_window: Duration::from_millis(console::ESCAPE_WINDOW_MS),
            tx_interval: Duration::from_millis(console::TX_INTERVAL_MS),
            buffer_size: console::BUF_SIZE,
        }
    }
}

/// Why a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The user typed the disconnect sequence.
    Disconnected,
    /// The remote end closed the connection.
    RemoteClosed,
}

/// Full-duplex relay between local input/output and a remote console.
#[derive(Debug, Clone, Default)]
pub struct ConsoleRelay {
    options: RelayOptions,
}

impl ConsoleRelay {
    pub fn new(options: RelayOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Relay between `remote` and the local terminal.
    ///
    /// Puts the terminal into raw mode (when stdin is a terminal) for the
    /// whole session and restores it on every exit path. Sessions may be run
    /// one after another in the same process; they share one stdin reader.
    pub async fn run_stdio<R>(&self, remote: R) -> BootlabResult<RelayExit>
    where
        R: AsyncRead + AsyncWrite + Unpin,
    {
        let _raw = if std::io::stdin().is_terminal() {
            Some(RawModeGuard::enter()?)
        } else {
            None
        };
        let mut stdin = StdinLease::acquire(self.options.buffer_size);
        self.relay(remote, stdin.receiver(), tokio::io::stdout()).await
    }

    /// Relay between `remote`, chunks of local `input` and local `output`.
    ///
    /// Remote data is written to `output` and flushed as soon as it arrives.
    /// Input is scanned for the disconnect sequence and otherwise queued for
    /// the remote end, drained one byte per `tx_interval`.
    pub async fn run<R, W>(
        &self,
        remote: R,
        mut input: mpsc::Receiver<Vec<u8>>,
        output: W,
    ) -> BootlabResult<RelayExit>
    where
        R: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.relay(remote, &mut input, output).await
    }

    async fn relay<R, W>(
        &self,
        remote: R,
        input: &mut mpsc::Receiver<Vec<u8>>,
        mut output: W,
    ) -> BootlabResult<RelayExit>
    where
        R: AsyncRead + AsyncWrite + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (mut remote_rx, mut remote_tx) = tokio::io::split(remote);
        let mut detector = EscapeDetector::new(self.options.escape_byte, self.options.escape_window);
        let mut pending: VecDeque<u8> = VecDeque::new();
        let mut buf = vec![0u8; self.options.buffer_size.max(1)];
        let mut input_open = true;

        let mut tick = tokio::time::interval(self.options.tx_interval.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = 'relay: loop {
            tokio::select! {
                read = remote_rx.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        break 'relay RelayExit::RemoteClosed;
                    }
                    output.write_all(&buf[..n]).await?;
                    output.flush().await?;
                }
                chunk = input.recv(), if input_open => {
                    let Some(chunk) = chunk else {
                        tracing::debug!("Local input closed");
                        input_open = false;
                        continue;
                    };
                    let now = Instant::now();
                    for byte in chunk {
                        if detector.feed(byte, now) {
                            break 'relay RelayExit::Disconnected;
                        }
                        pending.push_back(byte);
                    }
                }
                _ = tick.tick(), if !pending.is_empty() => {
                    if let Some(byte) = pending.pop_front() {
                        remote_tx.write_all(&[byte]).await?;
                        remote_tx.flush().await?;
                    }
                }
            }
        };

        // Blank line to move past any partial output
        output.write_all(b"\n").await?;
        output.flush().await?;

        tracing::debug!(?exit, "Relay finished");
        Ok(exit)
    }
}
