//! Status reconciliation
//!
//! Derives the daemon's [`RunningStatus`] from indirect signals:
//! - system-wide on systemd: the service manager's status text, after a liveness check
//! - everywhere else: the remembered [`ProcessHandle`] plus a `/proc` existence probe
//!
//! Every pass publishes its result to subscribers, changed or not. Any probe that
//! cannot complete leaves the previous status in place.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::config::{Config, DaemonSettings};
use crate::host::Host;
use crate::init_system::InitSystemKind;
use crate::process::ProcessHandle;
use crate::status::{Mode, RunningStatus};

/// Capacity of the notification channel; slow subscribers see `Lagged`
const EVENT_CAPACITY: usize = 64;

/// Notification sent to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Result of a reconciliation pass (sent on every pass)
    Status(RunningStatus),
    /// The control mode was switched
    ModeChanged(Mode),
}

/// Outgoing side of status publication
#[derive(Debug, Clone)]
pub struct StatusChannels {
    latest: watch::Sender<RunningStatus>,
    events: broadcast::Sender<ControlEvent>,
}

impl StatusChannels {
    #[must_use]
    pub fn new() -> Self {
        let (latest, _) = watch::channel(RunningStatus::Unknown);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { latest, events }
    }

    /// Receiver that always holds the most recently computed status
    #[must_use]
    pub fn latest(&self) -> watch::Receiver<RunningStatus> {
        self.latest.subscribe()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }

    fn publish_status(&self, status: RunningStatus) {
        self.latest.send_replace(status);
        // No subscribers is fine
        let _ = self.events.send(ControlEvent::Status(status));
    }

    pub(crate) fn publish_mode(&self, mode: Mode) {
        let _ = self.events.send(ControlEvent::ModeChanged(mode));
    }
}

impl Default for StatusChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of the cached status and the last known process handle
pub struct StatusReconciler<H: Host> {
    host: Arc<H>,
    daemon: DaemonSettings,
    command_timeout: Duration,
    liveness_timeout: Duration,
    init: InitSystemKind,
    mode: Mode,
    handle: ProcessHandle,
    status: RunningStatus,
    channels: StatusChannels,
}

impl<H: Host> StatusReconciler<H> {
    pub fn new(
        host: Arc<H>,
        config: &Config,
        init: InitSystemKind,
        mode: Mode,
        channels: StatusChannels,
    ) -> Self {
        Self {
            host,
            daemon: config.daemon.clone(),
            command_timeout: config.settings.command_timeout,
            liveness_timeout: config.settings.liveness_timeout,
            init,
            mode,
            handle: ProcessHandle::Undetermined,
            status: RunningStatus::Unknown,
            channels,
        }
    }

    #[must_use]
    pub fn status(&self) -> RunningStatus {
        self.status
    }

    #[must_use]
    pub fn handle(&self) -> ProcessHandle {
        self.handle
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn init_system(&self) -> InitSystemKind {
        self.init
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    #[must_use]
    pub fn daemon(&self) -> &DaemonSettings {
        &self.daemon
    }

    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    #[must_use]
    pub fn channels(&self) -> &StatusChannels {
        &self.channels
    }

    pub(crate) fn set_handle(&mut self, handle: ProcessHandle) {
        debug!("Process handle: {} → {}", self.handle, handle);
        self.handle = handle;
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        // NoTor only comes from the service-manager branch
        if self.status == RunningStatus::NoTor && !self.uses_service_manager() {
            debug!("Dropping stale {} after switching to {mode} mode", self.status);
            self.status = RunningStatus::Unknown;
        }
    }

    /// Whether status comes from the service manager rather than the process handle
    #[must_use]
    pub fn uses_service_manager(&self) -> bool {
        self.mode.is_system() && self.init == InitSystemKind::SystemD
    }

    /// Run one reconciliation pass and publish the result
    pub async fn reconcile(&mut self) -> RunningStatus {
        let before = self.status;

        if self.uses_service_manager() {
            self.reconcile_service().await;
        } else {
            self.reconcile_process().await;
        }

        if before != self.status {
            info!("Tor status: {} → {}", before, self.status);
        }
        self.channels.publish_status(self.status);
        self.status
    }

    /// Refresh the process handle from the process table, if the query completes
    pub async fn locate(&mut self) {
        if let Some(handle) =
            ProcessHandle::locate(self.host.as_ref(), &self.daemon.binary, self.command_timeout)
                .await
        {
            self.set_handle(handle);
        }
    }

    /// Whether the tor binary answers `--version` within the liveness timeout
    pub async fn liveness_check(&self) -> bool {
        let alive = self
            .host
            .run(&self.daemon.binary, &["--version"], self.liveness_timeout)
            .await
            .is_some();
        if !alive {
            debug!("{} did not answer --version", self.daemon.binary);
        }
        alive
    }

    async fn reconcile_service(&mut self) {
        if !self.liveness_check().await {
            self.status = RunningStatus::NoTor;
            return;
        }

        let Some(output) = self
            .host
            .run(
                &self.daemon.service_command,
                &[self.daemon.unit.as_str(), "status"],
                self.command_timeout,
            )
            .await
        else {
            debug!("Service status query inconclusive, keeping {}", self.status);
            return;
        };

        self.status = parse_service_status(&output);
    }

    async fn reconcile_process(&mut self) {
        if self.handle == ProcessHandle::Undetermined {
            if self.mode.is_system() && !self.liveness_check().await {
                return;
            }
            self.locate().await;
        }

        match self.handle {
            ProcessHandle::Undetermined => {
                debug!("Process lookup inconclusive, keeping {}", self.status);
            }
            ProcessHandle::Present(pid) => {
                self.status = RunningStatus::Running;
                if !self.host.process_exists(pid) {
                    debug!("Process {pid} is gone");
                    self.status = RunningStatus::NotRunning;
                    self.set_handle(ProcessHandle::Absent);
                }
            }
            ProcessHandle::Absent => {
                if self.mode.is_system() && !self.liveness_check().await {
                    return;
                }
                self.status = RunningStatus::NotRunning;
            }
        }
    }
}

/// Map `service <unit> status` text to a status
#[must_use]
pub fn parse_service_status(output: &str) -> RunningStatus {
    if output.contains("Active: active") {
        RunningStatus::Running
    } else if output.contains("Active: inactive") {
        RunningStatus::NotRunning
    } else {
        RunningStatus::Unknown
    }
}
