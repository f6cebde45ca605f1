//! Single-owner control loop
//!
//! One tokio task owns the [`ServiceController`]. Timer ticks and caller requests
//! both arrive at that task and run to completion one at a time, so status and pid
//! are never mutated concurrently and no locks are needed. Callers talk to the task
//! through a cloneable [`ControlHandle`].
//!
//! Overlapping requests are not cancelled or merged: the last reconciliation wins.

use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::controller::{Outcome, ServiceController, Snapshot};
use crate::host::Host;
use crate::reconciler::{ControlEvent, StatusChannels};
use crate::status::{Mode, RunningStatus};

/// Pending commands before callers start waiting on `send`
const COMMAND_QUEUE: usize = 16;

/// Requests handled by the owning task
#[derive(Debug)]
enum ControlCommand {
    RequestStatus {
        target: RunningStatus,
        reply: oneshot::Sender<Outcome>,
    },
    SetMode {
        mode: Mode,
        reply: oneshot::Sender<RunningStatus>,
    },
    Refresh {
        reply: oneshot::Sender<RunningStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<Snapshot>,
    },
    Shutdown,
}

/// Caller-side handle to a running control loop
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<ControlCommand>,
    status: watch::Receiver<RunningStatus>,
    mode: watch::Receiver<Mode>,
    channels: StatusChannels,
}

/// Error returned when the control loop has stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopClosed;

impl std::fmt::Display for LoopClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("control loop has stopped")
    }
}

impl std::error::Error for LoopClosed {}

/// Start the control loop on the current tokio runtime
///
/// The first reconciliation runs immediately, then every `poll_interval`.
pub fn spawn<H: Host>(
    controller: ServiceController<H>,
    poll_interval: Duration,
) -> (ControlHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let channels = controller.reconciler().channels().clone();
    let (mode_tx, mode_rx) = watch::channel(controller.mode());

    let handle = ControlHandle {
        commands: tx,
        status: channels.latest(),
        mode: mode_rx,
        channels,
    };

    let task = tokio::spawn(run(controller, rx, mode_tx, poll_interval));
    (handle, task)
}

async fn run<H: Host>(
    mut controller: ServiceController<H>,
    mut commands: mpsc::Receiver<ControlCommand>,
    mode_tx: watch::Sender<Mode>,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    // A long request should push the next poll back, not cause a burst
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Control loop started (poll every {poll_interval:?})");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                controller.reconcile().await;
            }

            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("All control handles dropped");
                    break;
                };
                match command {
                    ControlCommand::RequestStatus { target, reply } => {
                        let outcome = controller.request_status(target).await;
                        let _ = reply.send(outcome);
                    }
                    ControlCommand::SetMode { mode, reply } => {
                        let status = controller.set_mode(mode).await;
                        mode_tx.send_replace(mode);
                        let _ = reply.send(status);
                    }
                    ControlCommand::Refresh { reply } => {
                        let status = controller.reconcile().await;
                        let _ = reply.send(status);
                    }
                    ControlCommand::Snapshot { reply } => {
                        let _ = reply.send(controller.snapshot());
                    }
                    ControlCommand::Shutdown => break,
                }
            }
        }
    }

    info!("Control loop stopped");
}

impl ControlHandle {
    /// Most recently computed status (may be up to one poll interval old)
    #[must_use]
    pub fn status(&self) -> RunningStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.mode.borrow()
    }

    /// Notifications for every reconciliation pass and every mode change
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.channels.subscribe()
    }

    /// Ask for `target`; resolves with the status observed after dispatch
    ///
    /// # Errors
    /// Returns `LoopClosed` if the control loop is no longer running.
    pub async fn request_status(&self, target: RunningStatus) -> Result<Outcome, LoopClosed> {
        self.call(|reply| ControlCommand::RequestStatus { target, reply })
            .await
    }

    /// Switch mode; resolves with the status observed in the new mode
    ///
    /// # Errors
    /// Returns `LoopClosed` if the control loop is no longer running.
    pub async fn set_mode(&self, mode: Mode) -> Result<RunningStatus, LoopClosed> {
        self.call(|reply| ControlCommand::SetMode { mode, reply }).await
    }

    /// Run a reconciliation pass now
    ///
    /// # Errors
    /// Returns `LoopClosed` if the control loop is no longer running.
    pub async fn refresh(&self) -> Result<RunningStatus, LoopClosed> {
        self.call(|reply| ControlCommand::Refresh { reply }).await
    }

    /// # Errors
    /// Returns `LoopClosed` if the control loop is no longer running.
    pub async fn snapshot(&self) -> Result<Snapshot, LoopClosed> {
        self.call(|reply| ControlCommand::Snapshot { reply }).await
    }

    /// Stop the loop after the command in progress finishes
    pub async fn shutdown(&self) {
        let _ = self.commands.send(ControlCommand::Shutdown).await;
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> Result<T, LoopClosed> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| LoopClosed)?;
        rx.await.map_err(|_| LoopClosed)
    }
}
