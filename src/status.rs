//! Status and mode types
//!
//! `RunningStatus` is the single externally observable truth about the Tor daemon.
//! `Mode` selects between the system-wide service and a user-local instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Observed state of the Tor daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningStatus {
    /// No conclusive observation yet
    #[default]
    Unknown,
    Running,
    NotRunning,
    /// The tor binary is absent or does not answer the liveness check
    NoTor,
}

impl RunningStatus {
    /// Whether a start request makes sense from this status
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::NotRunning | Self::Unknown)
    }
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Unknown => "unknown",
            Self::Running => "running",
            Self::NotRunning => "not running",
            Self::NoTor => "tor not installed",
        };
        f.write_str(text)
    }
}

/// Who owns the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Service managed for all users; control needs privilege
    #[default]
    System,
    /// Daemon runs as the current user, as our own detached child
    User,
}

impl Mode {
    #[must_use]
    pub const fn is_system(self) -> bool {
        matches!(self, Self::System)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
        })
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            other => Err(format!("Invalid mode '{other}'. Must be: system or user")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(RunningStatus::Unknown, true)]
    #[test_case(RunningStatus::NotRunning, true)]
    #[test_case(RunningStatus::Running, false)]
    #[test_case(RunningStatus::NoTor, false)]
    fn test_can_start(status: RunningStatus, expected: bool) {
        assert_eq!(status.can_start(), expected);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("system".parse::<Mode>(), Ok(Mode::System));
        assert_eq!("user".parse::<Mode>(), Ok(Mode::User));
        assert!("root".parse::<Mode>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunningStatus::NotRunning).unwrap();
        assert_eq!(json, "\"not_running\"");
    }
}
