//! Board boot state.
//!
//! Defines the states a board passes through on its way from power-off to
//! an interactive shell, in the order the strategy satisfies them.

use crate::errors::BootlabError;
use serde::{Deserialize, Serialize};

/// Tracked boot state of a board.
///
/// Exactly one state is current per strategy instance. States are ordered:
/// reaching a later state first satisfies the earlier ones.
///
/// ```text
/// off → bootstrap → start → uboot → shell
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BootState {
    /// State is not known. Initial value, never a valid target.
    #[default]
    #[serde(rename = "unknown")]
    Unknown,

    /// Power is off.
    #[serde(rename = "off")]
    Off,

    /// A bootloader image has been written or sent to the board.
    #[serde(rename = "bootstrap")]
    Bootstrapped,

    /// The board has been powered on / released from reset and is booting.
    #[serde(rename = "start")]
    Started,

    /// The board has stopped at the bootloader prompt.
    #[serde(rename = "uboot")]
    BootloaderReady,

    /// The board has booted to an operating system shell.
    #[serde(rename = "shell")]
    ShellReady,
}

impl BootState {
    /// All states, in order.
    pub const ALL: [BootState; 6] = [
        BootState::Unknown,
        BootState::Off,
        BootState::Bootstrapped,
        BootState::Started,
        BootState::BootloaderReady,
        BootState::ShellReady,
    ];

    /// Check if this state can be requested as a transition target.
    pub fn is_target(&self) -> bool {
        !matches!(self, BootState::Unknown)
    }

    /// Check if this state can be forced without running a transition.
    pub fn can_force(&self) -> bool {
        matches!(
            self,
            BootState::Off | BootState::BootloaderReady | BootState::ShellReady
        )
    }

    /// Name used in configuration files and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            BootState::Unknown => "unknown",
            BootState::Off => "off",
            BootState::Bootstrapped => "bootstrap",
            BootState::Started => "start",
            BootState::BootloaderReady => "uboot",
            BootState::ShellReady => "shell",
        }
    }
}

impl std::str::FromStr for BootState {
    type Err = BootlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(BootState::Unknown),
            "off" => Ok(BootState::Off),
            "bootstrap" => Ok(BootState::Bootstrapped),
            "start" => Ok(BootState::Started),
            "uboot" => Ok(BootState::BootloaderReady),
            "shell" => Ok(BootState::ShellReady),
            _ => Err(BootlabError::UnknownState(s.to_string())),
        }
    }
}

impl std::fmt::Display for BootState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(BootState::default(), BootState::Unknown);
    }

    #[test]
    fn test_unknown_is_never_a_target() {
        assert!(!BootState::Unknown.is_target());
        for state in &BootState::ALL[1..] {
            assert!(state.is_target(), "{} should be a target", state);
        }
    }

    #[test]
    fn test_can_force() {
        assert!(BootState::Off.can_force());
        assert!(BootState::BootloaderReady.can_force());
        assert!(BootState::ShellReady.can_force());
        assert!(!BootState::Unknown.can_force());
        assert!(!BootState::Bootstrapped.can_force());
        assert!(!BootState::Started.can_force());
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(BootState::Off < BootState::Bootstrapped);
        assert!(BootState::Started < BootState::BootloaderReady);
        assert!(BootState::BootloaderReady < BootState::ShellReady);
    }

    #[test]
    fn test_round_trip_names() {
        for state in BootState::ALL {
            assert_eq!(state.as_str().parse::<BootState>().unwrap(), state);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown_name() {
        let err = "halted".parse::<BootState>().unwrap_err();
        assert!(matches!(err, BootlabError::UnknownState(ref s) if s == "halted"));
    }

    #[test]
    fn test_serde_uses_config_names() {
        let json = serde_json::to_string(&BootState::BootloaderReady).unwrap();
        assert_eq!(json, "\"uboot\"");
        let state: BootState = serde_json::from_str("\"bootstrap\"").unwrap();
        assert_eq!(state, BootState::Bootstrapped);
    }
}
