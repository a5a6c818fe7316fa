//! Disconnect sequence detection.

use std::time::Duration;
use tokio::time::Instant;

/// Watches local input for the escape byte typed twice in quick succession.
///
/// The two escape bytes must be consecutive and the second must arrive
/// within `window` of the first. Any other byte, or the window running out,
/// starts the count again.
#[derive(Debug, Clone)]
pub struct EscapeDetector {
    escape_byte: u8,
    window: Duration,
    first_seen: Option<Instant>,
}

impl EscapeDetector {
    pub fn new(escape_byte: u8, window: Duration) -> Self {
        Self {
            escape_byte,
            window,
            first_seen: None,
        }
    }

    /// Feed one input byte received at `now`.
    ///
    /// Returns `true` when this byte completes the disconnect sequence.
    pub fn feed(&mut self, byte: u8, now: Instant) -> bool {
        if let Some(first) = self.first_seen
            && now.saturating_duration_since(first) > self.window
        {
            self.first_seen = None;
        }

        if byte != self.escape_byte {
            self.first_seen = None;
            return false;
        }

        match self.first_seen.take() {
            Some(_) => true,
            None => {
                self.first_seen = Some(now);
                false
            }
        }
    }

    /// Check if one escape byte has been seen and the window is still open.
    pub fn is_armed(&self) -> bool {
        self.first_seen.is_some()
    }
}
