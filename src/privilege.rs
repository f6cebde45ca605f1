//! Privilege escalation
//!
//! System-wide control on non-systemd hosts goes through a graphical su helper.
//! The helper is picked once at startup by probing each candidate with `--version`.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::host::Host;

/// Runs commands as administrator through a resolved helper program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeEscalator {
    helper: String,
    /// Whether the helper answered the probe
    verified: bool,
    /// Already privileged: run commands directly
    direct: bool,
    timeout: Duration,
}

impl PrivilegeEscalator {
    /// Pick the first helper in `candidates` that answers `--version`
    ///
    /// If none answers, the first candidate is kept anyway. Privileged commands will
    /// then fail at invocation time and the observed status simply does not change.
    pub async fn resolve<H: Host>(host: &H, candidates: &[String], timeout: Duration) -> Self {
        let candidates: Vec<&str> = candidates
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();
        let primary = candidates.first().copied().unwrap_or_default().to_string();

        if host.is_root() {
            debug!("Running as root, privileged commands run directly");
            return Self {
                helper: primary,
                verified: true,
                direct: true,
                timeout,
            };
        }

        for candidate in &candidates {
            if host.run(candidate, &["--version"], timeout).await.is_some() {
                info!("Using privilege helper: {candidate}");
                return Self {
                    helper: (*candidate).to_string(),
                    verified: true,
                    direct: false,
                    timeout,
                };
            }
            debug!("Privilege helper {candidate} did not respond");
        }

        warn!(
            "No functioning privilege helper found (tried: {}). Install one of them to control the system service",
            candidates.join(", ")
        );
        Self {
            helper: primary,
            verified: false,
            direct: false,
            timeout,
        }
    }

    /// Helper program name (the primary candidate when none responded)
    #[must_use]
    pub fn helper(&self) -> &str {
        &self.helper
    }

    /// Whether a helper responded to the probe, or none is needed
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.verified
    }

    /// Whether commands bypass the helper because we already are root
    #[must_use]
    pub const fn is_direct(&self) -> bool {
        self.direct
    }

    /// Run `args` with administrator privileges, returning captured stdout
    ///
    /// Returns an empty string on any failure.
    pub async fn run<H: Host>(&self, host: &H, args: &[&str]) -> String {
        let Some((program, rest)) = args.split_first() else {
            return String::new();
        };

        let output = if self.direct {
            host.run(program, rest, self.timeout).await
        } else {
            host.run(&self.helper, args, self.timeout).await
        };

        output.unwrap_or_else(|| {
            debug!("Privileged command {args:?} produced no output");
            String::new()
        })
    }
}
