//! Service control
//!
//! Turns a requested [`RunningStatus`] into the command sequence that fits the
//! current mode and init system:
//!
//! | mode   | init    | start                              | stop                      |
//! |--------|---------|------------------------------------|---------------------------|
//! | system | systemd | `service tor start`                | `service tor stop`        |
//! | system | other   | `<helper> torctl start`, re-lookup | `<helper> torctl stop`    |
//! | user   | any     | spawn `tor` detached               | SIGTERM the known pid     |
//!
//! Every request reconciles first so decisions use fresh status, and again after
//! dispatch to publish the outcome. Failed commands are not errors: the next
//! observation simply shows whatever happened.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::host::Host;
use crate::init_system::InitSystemKind;
use crate::privilege::PrivilegeEscalator;
use crate::process::ProcessHandle;
use crate::reconciler::{StatusChannels, StatusReconciler};
use crate::status::{Mode, RunningStatus};

/// What a status request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Already in (or unable to leave) the requested state
    Nothing,
    /// The target makes no sense as a request (`Unknown`, `NoTor`)
    Rejected,
    StartService,
    StopService,
    StartPrivileged,
    StopPrivileged,
    Spawn,
    Terminate,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Nothing => "nothing to do",
            Self::Rejected => "request ignored",
            Self::StartService => "started via service manager",
            Self::StopService => "stopped via service manager",
            Self::StartPrivileged => "start requested with privileges",
            Self::StopPrivileged => "stop requested with privileges",
            Self::Spawn => "started user-local tor",
            Self::Terminate => "sent SIGTERM to user-local tor",
        })
    }
}

/// Result of a status request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub action: Action,
    /// Status observed after the action
    pub status: RunningStatus,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub status: RunningStatus,
    pub mode: Mode,
    pub init_system: InitSystemKind,
    /// Legacy encoding: pid, `-1` undetermined, `-2` absent
    pub pid: ProcessHandle,
    pub privilege_helper: String,
    pub privilege_helper_available: bool,
}

/// Owns the reconciler and dispatches start/stop requests
pub struct ServiceController<H: Host> {
    reconciler: StatusReconciler<H>,
    escalator: PrivilegeEscalator,
}

impl<H: Host> ServiceController<H> {
    /// Probe the host once (init system, privilege helper) and build a controller
    pub async fn new(host: Arc<H>, config: &Config, mode: Mode, channels: StatusChannels) -> Self {
        let timeout = config.settings.command_timeout;
        let init = InitSystemKind::detect(host.as_ref(), &config.daemon, timeout).await;
        let escalator =
            PrivilegeEscalator::resolve(host.as_ref(), &config.privilege.helpers, timeout).await;
        Self::with_parts(host, config, init, escalator, mode, channels)
    }

    /// Build a controller from already-probed parts
    pub fn with_parts(
        host: Arc<H>,
        config: &Config,
        init: InitSystemKind,
        escalator: PrivilegeEscalator,
        mode: Mode,
        channels: StatusChannels,
    ) -> Self {
        Self {
            reconciler: StatusReconciler::new(host, config, init, mode, channels),
            escalator,
        }
    }

    #[must_use]
    pub fn reconciler(&self) -> &StatusReconciler<H> {
        &self.reconciler
    }

    #[must_use]
    pub fn status(&self) -> RunningStatus {
        self.reconciler.status()
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.reconciler.mode()
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.reconciler.status(),
            mode: self.reconciler.mode(),
            init_system: self.reconciler.init_system(),
            pid: self.reconciler.handle(),
            privilege_helper: self.escalator.helper().to_string(),
            privilege_helper_available: self.escalator.is_available(),
        }
    }

    /// Run one reconciliation pass
    pub async fn reconcile(&mut self) -> RunningStatus {
        self.reconciler.reconcile().await
    }

    /// Switch between system-wide and user-local control
    ///
    /// Looks the daemon up again, since the pid we knew may belong to the other mode,
    /// then reconciles and announces the new mode.
    pub async fn set_mode(&mut self, mode: Mode) -> RunningStatus {
        if mode != self.reconciler.mode() {
            info!("Mode: {} → {}", self.reconciler.mode(), mode);
        }
        self.reconciler.set_mode(mode);
        self.reconciler.locate().await;
        let status = self.reconciler.reconcile().await;
        self.reconciler.channels().publish_mode(mode);
        status
    }

    /// Try to bring the daemon into `target` state
    ///
    /// There is no guarantee the daemon actually starts or stops, nor when: the
    /// returned status is simply what was observed right after dispatch.
    pub async fn request_status(&mut self, target: RunningStatus) -> Outcome {
        let current = self.reconciler.reconcile().await;

        let action = match target {
            RunningStatus::Unknown | RunningStatus::NoTor => {
                debug!("Requested status {target:?} has no meaning, ignoring");
                Action::Rejected
            }
            RunningStatus::Running if current.can_start() => self.start().await,
            RunningStatus::NotRunning if current == RunningStatus::Running => self.stop().await,
            RunningStatus::Running | RunningStatus::NotRunning => {
                debug!("Already {current}, nothing to do for {target}");
                Action::Nothing
            }
        };

        if !matches!(action, Action::Nothing | Action::Rejected) {
            info!("{action}");
        }

        let status = self.reconciler.reconcile().await;
        Outcome { action, status }
    }

    async fn start(&mut self) -> Action {
        match self.reconciler.mode() {
            Mode::System if self.reconciler.init_system() == InitSystemKind::SystemD => {
                self.service_command("start").await;
                Action::StartService
            }
            Mode::System => {
                let helper = self.reconciler.daemon().service_helper.clone();
                self.escalator
                    .run(self.reconciler.host(), &[helper.as_str(), "start"])
                    .await;
                self.reconciler.locate().await;
                Action::StartPrivileged
            }
            Mode::User => {
                let binary = self.reconciler.daemon().binary.clone();
                match self.reconciler.host().spawn_detached(&binary, &[]) {
                    Some(pid) => {
                        info!("Started {binary} with pid {pid}");
                        self.reconciler.set_handle(ProcessHandle::Present(pid));
                    }
                    None => warn!("Could not start {binary}"),
                }
                Action::Spawn
            }
        }
    }

    async fn stop(&mut self) -> Action {
        match self.reconciler.mode() {
            Mode::System if self.reconciler.init_system() == InitSystemKind::SystemD => {
                self.service_command("stop").await;
                Action::StopService
            }
            Mode::System => {
                let helper = self.reconciler.daemon().service_helper.clone();
                self.escalator
                    .run(self.reconciler.host(), &[helper.as_str(), "stop"])
                    .await;
                Action::StopPrivileged
            }
            Mode::User => {
                if let Some(pid) = self.reconciler.handle().pid() {
                    self.reconciler.host().terminate(pid);
                }
                // Delivery cannot be confirmed; the next lookup corrects us if it survived
                self.reconciler.set_handle(ProcessHandle::Absent);
                Action::Terminate
            }
        }
    }

    async fn service_command(&self, verb: &str) {
        let daemon = self.reconciler.daemon();
        let output = self
            .reconciler
            .host()
            .run(
                &daemon.service_command,
                &[daemon.unit.as_str(), verb],
                self.reconciler.command_timeout(),
            )
            .await;
        if output.is_none() {
            warn!(
                "{} {} {verb} did not complete",
                daemon.service_command, daemon.unit
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeHost;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const TOR_VERSION: &str = "Tor version 0.4.8.12.\n";
    const ACTIVE: &str = "     Active: active (running) since Fri 2026-10-16 08:00:00 UTC\n";
    const INACTIVE: &str = "     Active: inactive (dead)\n";

    async fn controller(
        host: &Arc<FakeHost>,
        init: InitSystemKind,
        mode: Mode,
    ) -> ServiceController<FakeHost> {
        host.respond("kdesu --version", "kdesu 5.27\n");
        let helpers = vec!["kdesu".to_string(), "kdesudo".to_string()];
        let escalator =
            PrivilegeEscalator::resolve(host.as_ref(), &helpers, Duration::from_secs(1)).await;
        ServiceController::with_parts(
            Arc::clone(host),
            &Config::default(),
            init,
            escalator,
            mode,
            StatusChannels::new(),
        )
    }

    #[tokio::test]
    async fn test_new_probes_init_and_helper() {
        let host = Arc::new(FakeHost::new());
        host.respond("systemctl", "  -.mount loaded active mounted Root Mount\n")
            .respond("kdesudo --version", "kdesudo 3.4\n");

        let c = ServiceController::new(
            Arc::clone(&host),
            &Config::default(),
            Mode::User,
            StatusChannels::new(),
        )
        .await;
        let snap = c.snapshot();
        assert_eq!(snap.init_system, InitSystemKind::SystemD);
        assert_eq!(snap.privilege_helper, "kdesudo");
        assert_eq!(snap.status, RunningStatus::Unknown);
        assert_eq!(snap.pid, ProcessHandle::Undetermined);
    }

    #[tokio::test]
    async fn test_systemd_start_when_not_running() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::System).await;
        host.respond("tor --version", TOR_VERSION)
            .respond("/usr/sbin/service tor status", INACTIVE)
            .respond("/usr/sbin/service tor start", "");

        let outcome = c.request_status(RunningStatus::Running).await;
        assert_eq!(outcome.action, Action::StartService);
        assert_eq!(host.commands_matching("tor start").len(), 1);
    }

    #[tokio::test]
    async fn test_systemd_stop_when_running() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::System).await;
        host.respond("tor --version", TOR_VERSION)
            .respond("/usr/sbin/service tor status", ACTIVE);

        let outcome = c.request_status(RunningStatus::NotRunning).await;
        assert_eq!(outcome.action, Action::StopService);
        assert_eq!(
            host.commands_matching("/usr/sbin/service tor stop"),
            vec!["/usr/sbin/service tor stop"]
        );
    }

    #[tokio::test]
    async fn test_requesting_current_status_dispatches_nothing() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::System).await;
        host.respond("tor --version", TOR_VERSION)
            .respond("/usr/sbin/service tor status", ACTIVE);

        let outcome = c.request_status(RunningStatus::Running).await;
        assert_eq!(
            outcome,
            Outcome {
                action: Action::Nothing,
                status: RunningStatus::Running
            }
        );
        assert!(host.commands_matching("start").is_empty());
        assert!(host.commands_matching("stop").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_target_is_rejected() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SysV, Mode::System).await;
        host.respond("tor --version", TOR_VERSION).respond("pidof tor", "");

        let outcome = c.request_status(RunningStatus::Unknown).await;
        assert_eq!(outcome.action, Action::Rejected);
        assert!(host.commands_matching("torctl").is_empty());
        assert!(host.spawned().is_empty());
    }

    #[tokio::test]
    async fn test_sysv_start_through_helper_and_relookup() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SysV, Mode::System).await;
        host.respond("tor --version", TOR_VERSION)
            .respond("pidof tor", "")
            .respond("kdesu torctl start", "");

        // First pass: tor is stopped
        assert_eq!(c.reconcile().await, RunningStatus::NotRunning);

        // Helper starts tor; the lookup afterwards finds it
        host.respond("pidof tor", "2024\n").set_alive(2024, true);
        let outcome = c.request_status(RunningStatus::Running).await;

        assert_eq!(outcome.action, Action::StartPrivileged);
        assert_eq!(outcome.status, RunningStatus::Running);
        assert_eq!(c.snapshot().pid, ProcessHandle::Present(2024));
        assert_eq!(host.commands_matching("kdesu torctl"), vec!["kdesu torctl start"]);
    }

    #[tokio::test]
    async fn test_sysv_stop_through_helper() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::Upstart, Mode::System).await;
        host.respond("tor --version", TOR_VERSION)
            .respond("pidof tor", "77\n")
            .set_alive(77, true);

        assert_eq!(c.reconcile().await, RunningStatus::Running);
        let outcome = c.request_status(RunningStatus::NotRunning).await;
        assert_eq!(outcome.action, Action::StopPrivileged);
        assert_eq!(host.commands_matching("kdesu torctl"), vec!["kdesu torctl stop"]);
    }

    #[tokio::test]
    async fn test_missing_helper_is_silent() {
        let host = Arc::new(FakeHost::new());
        let helpers = vec!["kdesu".to_string()];
        let escalator =
            PrivilegeEscalator::resolve(host.as_ref(), &helpers, Duration::from_secs(1)).await;
        let mut c = ServiceController::with_parts(
            Arc::clone(&host),
            &Config::default(),
            InitSystemKind::SysV,
            escalator,
            Mode::System,
            StatusChannels::new(),
        );
        host.respond("tor --version", TOR_VERSION).respond("pidof tor", "");

        let outcome = c.request_status(RunningStatus::Running).await;
        assert_eq!(outcome.action, Action::StartPrivileged);
        assert_eq!(outcome.status, RunningStatus::NotRunning);
    }

    #[tokio::test]
    async fn test_user_stop_sends_exactly_one_sigterm() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::User).await;
        host.respond("pidof tor", "4242\n").set_alive(4242, true);

        assert_eq!(c.reconcile().await, RunningStatus::Running);
        let outcome = c.request_status(RunningStatus::NotRunning).await;

        assert_eq!(outcome.action, Action::Terminate);
        assert_eq!(outcome.status, RunningStatus::NotRunning);
        assert_eq!(host.terminated(), vec![4242]);
        assert_eq!(c.snapshot().pid, ProcessHandle::Absent);
    }

    #[tokio::test]
    async fn test_user_start_spawns_detached_and_tracks_pid() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::User).await;
        host.respond("pidof tor", "").set_spawn_pid(Some(9001));

        let outcome = c.request_status(RunningStatus::Running).await;

        assert_eq!(outcome.action, Action::Spawn);
        assert_eq!(outcome.status, RunningStatus::Running);
        assert_eq!(host.spawned(), vec!["tor"]);
        assert_eq!(c.snapshot().pid, ProcessHandle::Present(9001));
        // User mode never needs privilege
        assert!(host.commands_matching("kdesu torctl").is_empty());
    }

    #[tokio::test]
    async fn test_user_start_failure_keeps_not_running() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::User).await;
        host.respond("pidof tor", "").set_spawn_pid(None);

        let outcome = c.request_status(RunningStatus::Running).await;
        assert_eq!(outcome.status, RunningStatus::NotRunning);
        assert_eq!(c.snapshot().pid, ProcessHandle::Absent);
    }

    #[tokio::test]
    async fn test_set_mode_relocates_and_announces() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::System).await;
        let mut rx = c.reconciler().channels().subscribe();
        host.respond("pidof tor", "555\n").set_alive(555, true);

        let status = c.set_mode(Mode::User).await;

        assert_eq!(status, RunningStatus::Running);
        assert_eq!(c.mode(), Mode::User);
        assert_eq!(
            rx.try_recv().unwrap(),
            crate::reconciler::ControlEvent::Status(RunningStatus::Running)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            crate::reconciler::ControlEvent::ModeChanged(Mode::User)
        );
    }

    #[tokio::test]
    async fn test_set_mode_drops_no_tor_outside_service_manager() {
        let host = Arc::new(FakeHost::new());
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::System).await;
        assert_eq!(c.reconcile().await, RunningStatus::NoTor);

        // pidof cannot run, so the user-mode pass learns nothing new
        let status = c.set_mode(Mode::User).await;

        assert_eq!(status, RunningStatus::Unknown);
        assert_eq!(c.snapshot().status, RunningStatus::Unknown);
        assert_eq!(c.snapshot().pid, ProcessHandle::Undetermined);
    }

    #[tokio::test]
    async fn test_set_mode_back_to_service_manager_can_report_no_tor() {
        let host = Arc::new(FakeHost::new());
        host.respond("pidof tor", "");
        let mut c = controller(&host, InitSystemKind::SystemD, Mode::User).await;
        assert_eq!(c.reconcile().await, RunningStatus::NotRunning);

        assert_eq!(c.set_mode(Mode::System).await, RunningStatus::NoTor);
    }
}
