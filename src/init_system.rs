//! Init system detection
//!
//! Classifies the host's service-management convention once at startup so the
//! controller can pick the right way to query and control the Tor service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DaemonSettings;
use crate::host::Host;

/// Marker printed by `init --version` on Upstart hosts
const UPSTART_MARKER: &str = "upstart";

/// Root mount unit listed by a bare `systemctl` on systemd hosts
const SYSTEMD_MARKER: &str = "-.mount";

/// Host service-management convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitSystemKind {
    #[default]
    Unknown,
    SysV,
    Upstart,
    SystemD,
}

impl fmt::Display for InitSystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::SysV => "SysV init",
            Self::Upstart => "Upstart",
            Self::SystemD => "systemd",
        })
    }
}

impl InitSystemKind {
    /// Probe the host, short-circuiting on the first match
    ///
    /// 1. `init --version` mentioning Upstart
    /// 2. `systemctl` listing the root mount unit
    /// 3. a legacy init script that is a real file, not a symlink
    ///
    /// A probe that fails to start or times out counts as a non-match, so detection
    /// never fails; it degrades to `Unknown`.
    pub async fn detect<H: Host>(host: &H, daemon: &DaemonSettings, timeout: Duration) -> Self {
        let kind = Self::probe(host, daemon, timeout).await;
        info!("Init system is: {kind}");
        kind
    }

    async fn probe<H: Host>(host: &H, daemon: &DaemonSettings, timeout: Duration) -> Self {
        if let Some(out) = host.run(&daemon.init_binary, &["--version"], timeout).await
            && out.contains(UPSTART_MARKER)
        {
            return Self::Upstart;
        }

        if let Some(out) = host.run("systemctl", &[], timeout).await
            && out.contains(SYSTEMD_MARKER)
        {
            return Self::SystemD;
        }

        if host.is_regular_file(&daemon.legacy_init_script) {
            return Self::SysV;
        }

        debug!("No init system markers found");
        Self::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_utils::FakeHost;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn daemon() -> DaemonSettings {
        Config::default().daemon
    }

    #[tokio::test]
    async fn test_upstart_detected_first() {
        let host = FakeHost::new();
        host.respond("/sbin/init --version", "init (upstart 1.12.1)\n")
            .respond("systemctl", "  -.mount  loaded active mounted Root Mount\n")
            .add_regular_file("/etc/init.d/cron");

        assert_eq!(
            InitSystemKind::detect(&host, &daemon(), TIMEOUT).await,
            InitSystemKind::Upstart
        );
        // Short-circuits: systemctl is never consulted
        assert!(host.commands_matching("systemctl").is_empty());
    }

    #[tokio::test]
    async fn test_systemd_detected_from_root_mount() {
        let host = FakeHost::new();
        host.respond("/sbin/init --version", "systemd 255 (255.4-1)\n")
            .respond(
                "systemctl",
                "  UNIT   LOAD   ACTIVE SUB     DESCRIPTION\n  -.mount loaded active mounted Root Mount\n",
            );

        assert_eq!(
            InitSystemKind::detect(&host, &daemon(), TIMEOUT).await,
            InitSystemKind::SystemD
        );
    }

    #[tokio::test]
    async fn test_sysv_from_legacy_script_only() {
        let host = FakeHost::new();
        host.add_regular_file("/etc/init.d/cron");

        assert_eq!(
            InitSystemKind::detect(&host, &daemon(), TIMEOUT).await,
            InitSystemKind::SysV
        );
    }

    #[tokio::test]
    async fn test_nothing_matching_is_unknown() {
        let host = FakeHost::new();
        host.respond("/sbin/init --version", "BusyBox v1.36.1\n")
            .respond("systemctl", "");

        assert_eq!(
            InitSystemKind::detect(&host, &daemon(), TIMEOUT).await,
            InitSystemKind::Unknown
        );
    }

    #[tokio::test]
    async fn test_failed_probes_degrade_to_unknown() {
        let host = FakeHost::new();
        assert_eq!(
            InitSystemKind::detect(&host, &daemon(), TIMEOUT).await,
            InitSystemKind::Unknown
        );
        assert_eq!(host.commands(), vec!["/sbin/init --version", "systemctl"]);
    }
}
