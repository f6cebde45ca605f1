//! Process handle tracking and lookup
//!
//! The controller remembers the daemon's pid between passes. Knowledge comes in
//! three flavours: never checked, known absent, and a pid believed alive until a
//! `/proc` probe disproves it.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::host::Host;

/// Last known state of the daemon process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessHandle {
    /// Not looked up yet (startup, or after a mode change)
    #[default]
    Undetermined,
    /// Looked up and not found, or found and since confirmed gone
    Absent,
    /// Last known pid, believed alive until disproven
    Present(u32),
}

impl ProcessHandle {
    /// Legacy integer encoding: pid, `-1` undetermined, `-2` absent
    #[must_use]
    pub fn as_raw(self) -> i64 {
        match self {
            Self::Undetermined => -1,
            Self::Absent => -2,
            Self::Present(pid) => i64::from(pid),
        }
    }

    #[must_use]
    pub const fn pid(self) -> Option<u32> {
        match self {
            Self::Present(pid) => Some(pid),
            Self::Undetermined | Self::Absent => None,
        }
    }

    /// Parse `pidof`-style output: the first token of the first line
    #[must_use]
    pub fn from_pidof_output(output: &str) -> Self {
        output
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .and_then(|token| token.parse::<u32>().ok())
            .filter(|&pid| pid > 0)
            .map_or(Self::Absent, Self::Present)
    }

    /// Ask the process table for a running `binary`
    ///
    /// Returns `None` when the query cannot complete; the caller keeps what it knew.
    pub async fn locate<H: Host>(host: &H, binary: &str, timeout: Duration) -> Option<Self> {
        let name = process_name(binary);
        let output = host.run("pidof", &[name], timeout).await?;
        let handle = Self::from_pidof_output(&output);
        debug!("Located {name}: {handle}");
        Some(handle)
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undetermined => f.write_str("undetermined"),
            Self::Absent => f.write_str("absent"),
            Self::Present(pid) => write!(f, "pid {pid}"),
        }
    }
}

impl Serialize for ProcessHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_raw())
    }
}

/// `pidof` matches on the executable name, not a path
fn process_name(binary: &str) -> &str {
    binary.rsplit('/').next().unwrap_or(binary)
}
