//! Local terminal handling for the interactive relay.

use bootlab_shared::errors::BootlabResult;
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use parking_lot::Mutex;
use std::io::{self, Read, Stdin};
use tokio::sync::mpsc;

/// Keeps stdin in raw mode while alive.
///
/// Canonical mode, echo and signal generation are disabled, so every key
/// (including Ctrl-C) goes to the board. The saved settings are restored
/// when the guard is dropped.
pub struct RawModeGuard {
    stdin: Stdin,
    saved: Termios,
}

impl RawModeGuard {
    pub fn enter() -> BootlabResult<Self> {
        let stdin = io::stdin();
        let saved = termios::tcgetattr(&stdin).map_err(io::Error::from)?;

        let mut raw = saved.clone();
        raw.local_flags
            .remove(LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).map_err(io::Error::from)?;

        tracing::debug!("Terminal in raw mode");
        Ok(Self { stdin, saved })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(&self.stdin, SetArg::TCSAFLUSH, &self.saved) {
            tracing::warn!("Failed to restore terminal settings: {}", e);
        }
    }
}

type ReaderSlot = Mutex<Option<mpsc::Receiver<Vec<u8>>>>;

static STDIN_READER: ReaderSlot = parking_lot::const_mutex(None);

/// A relay session's hold on the process-wide stdin reader.
///
/// A thread blocked in `read` cannot be woken, so stdin is read by one
/// thread for the life of the process. Each session borrows its channel and
/// hands it back on drop, so a later session receives every keystroke.
/// Input typed while no session holds the lease is discarded.
pub struct StdinLease {
    slot: &'static ReaderSlot,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl StdinLease {
    /// Take the stdin channel, starting the reader thread on first use.
    pub fn acquire(buffer_size: usize) -> Self {
        Self::from_slot(&STDIN_READER, || spawn_stdin_reader(buffer_size))
    }

    fn from_slot(
        slot: &'static ReaderSlot,
        spawn: impl FnOnce() -> mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        let mut rx = slot.lock().take().unwrap_or_else(spawn);
        while rx.try_recv().is_ok() {}
        Self { slot, rx }
    }

    pub fn receiver(&mut self) -> &mut mpsc::Receiver<Vec<u8>> {
        &mut self.rx
    }
}

impl Drop for StdinLease {
    fn drop(&mut self) {
        let (_, closed) = mpsc::channel(1);
        let rx = std::mem::replace(&mut self.rx, closed);
        *self.slot.lock() = Some(rx);
    }
}

/// Read stdin on a dedicated thread, forwarding chunks over a bounded channel.
///
/// The thread ends on end of input, on a read error, or once the receiver
/// is dropped.
fn spawn_stdin_reader(buffer_size: usize) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("bootlab-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = vec![0u8; buffer_size];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        // Dropping the sender closes the channel; the relay keeps showing output
        tracing::warn!("Failed to start stdin reader: {}", e);
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_session_reuses_reader() {
        static SLOT: ReaderSlot = parking_lot::const_mutex(None);
        let (tx, rx) = mpsc::channel(16);

        let mut first = StdinLease::from_slot(&SLOT, || rx);
        tx.try_send(b"ls\n".to_vec()).unwrap();
        assert_eq!(first.receiver().try_recv().unwrap(), b"ls\n".to_vec());
        drop(first);
        assert!(SLOT.lock().is_some());

        // Typed between sessions
        tx.try_send(b"stale".to_vec()).unwrap();

        let mut second = StdinLease::from_slot(&SLOT, || -> mpsc::Receiver<Vec<u8>> {
            panic!("stdin reader started twice")
        });
        tx.try_send(b"help\n".to_vec()).unwrap();
        assert_eq!(second.receiver().try_recv().unwrap(), b"help\n".to_vec());
        assert!(second.receiver().try_recv().is_err());
    }
}
