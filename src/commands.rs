//! CLI commands
//!
//! Every command builds its own controller against the real host. Only `watch`
//! keeps it alive, inside the control loop.

use color_eyre::eyre::{Context, Result};
use sd_notify::NotifyState;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::built_info;
use crate::config::Config;
use crate::control_loop;
use crate::controller::{Outcome, ServiceController, Snapshot};
use crate::host::SystemHost;
use crate::install::{Installer, PkconBackend};
use crate::notification::{install_icon, send_notification};
use crate::reconciler::{ControlEvent, StatusChannels};
use crate::status::{Mode, RunningStatus};
use crate::style::{OnionStyle, styled_status};

async fn controller(config: &Config, mode: Mode) -> ServiceController<SystemHost> {
    ServiceController::new(
        Arc::new(SystemHost::new()),
        config,
        mode,
        StatusChannels::new(),
    )
    .await
}

// ============================================================================
// One-shot Commands
// ============================================================================

/// Reconcile once and print the result
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub async fn status(config: &Config, mode: Mode, json_output: bool) -> Result<()> {
    let mut controller = controller(config, mode).await;
    controller.reconcile().await;
    let snapshot = controller.snapshot();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

/// Start tor in the given mode
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub async fn start(config: &Config, mode: Mode) -> Result<()> {
    request(config, mode, RunningStatus::Running).await
}

/// Stop tor in the given mode
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub async fn stop(config: &Config, mode: Mode) -> Result<()> {
    request(config, mode, RunningStatus::NotRunning).await
}

async fn request(config: &Config, mode: Mode, target: RunningStatus) -> Result<()> {
    let mut controller = controller(config, mode).await;
    let outcome = controller.request_status(target).await;
    print_outcome(&outcome, target);
    Ok(())
}

/// Show the detected init system and privilege helper without touching tor
///
/// # Errors
/// Returns an error if JSON serialization fails.
pub async fn detect(config: &Config, mode: Mode, json_output: bool) -> Result<()> {
    let controller = controller(config, mode).await;
    let snapshot = controller.snapshot();

    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "init_system": snapshot.init_system,
                "mode": snapshot.mode,
                "uses_service_manager": controller.reconciler().uses_service_manager(),
                "privilege_helper": snapshot.privilege_helper,
                "privilege_helper_available": snapshot.privilege_helper_available,
            }))?
        );
        return Ok(());
    }

    println!("{}", "Host".header());
    println!("  Init system:  {}", snapshot.init_system.to_string().technical());
    println!("  Mode:         {}", snapshot.mode);
    let control = if controller.reconciler().uses_service_manager() {
        format!("{} {} start|stop", config.daemon.service_command, config.daemon.unit)
    } else if snapshot.mode.is_system() {
        format!(
            "{} {} start|stop",
            snapshot.privilege_helper, config.daemon.service_helper
        )
    } else {
        format!("{} (detached), SIGTERM", config.daemon.binary)
    };
    println!("  Control:      {}", control.technical());

    let helper = if snapshot.privilege_helper_available {
        snapshot.privilege_helper.clone().success()
    } else {
        format!("{} (not responding)", snapshot.privilege_helper).warning()
    };
    println!("  Privilege:    {helper}");
    Ok(())
}

/// Resolve and install the configured packages, streaming progress
///
/// # Errors
/// Returns an error if the progress printer task panics.
pub async fn install(config: &Config) -> Result<()> {
    let backend = Arc::new(PkconBackend::new(config.install.timeout));
    let installer = Installer::new(backend, config);
    let mut work = installer.subscribe();

    let printer = tokio::spawn(async move {
        let mut last = String::new();
        while work.changed().await.is_ok() {
            let current = work.borrow_and_update().clone();
            if current.is_idle() || current.message == last {
                continue;
            }
            if current.finished && current.failed {
                eprintln!("{}", current.message.as_str().error());
            } else if current.finished {
                println!("{}", current.message.as_str().success());
            } else {
                println!("{}", current.message);
            }
            last = current.message;
            if current.finished {
                break;
            }
        }
    });

    let outcome = installer.run().await;
    let message = installer.work_status().message;
    printer.await.context("Progress printer failed")?;

    if config.settings.notify_install
        && let Err(e) = send_notification("Tor installation", &message, install_icon(outcome))
    {
        warn!("Could not send install notification: {e:#}");
    }
    Ok(())
}

// ============================================================================
// Watch
// ============================================================================

/// Run the control loop until Ctrl-C or SIGTERM
///
/// In the foreground every status change is printed; otherwise it only goes to
/// the log.
///
/// # Errors
/// Returns an error if the SIGTERM handler cannot be installed.
pub async fn watch(config: &Config, mode: Mode, foreground: bool) -> Result<()> {
    let controller = controller(config, mode).await;
    let (handle, task) = control_loop::spawn(controller, config.settings.poll_interval);
    let mut events = handle.subscribe();
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    if let Err(e) = sd_notify::notify(false, &[NotifyState::Ready]) {
        warn!("Could not notify systemd: {e}");
    }
    info!(
        "onionctl {} ({}) watching tor in {mode} mode",
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown commit")
    );

    let mut last: Option<RunningStatus> = None;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ControlEvent::Status(status)) => {
                    if last != Some(status) {
                        info!("Status: {status}");
                        if foreground {
                            println!("{} {}", "tor".header(), styled_status(status));
                        }
                        last = Some(status);
                    }
                }
                Ok(ControlEvent::ModeChanged(mode)) => {
                    info!("Mode changed to {mode}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Missed {skipped} status notifications");
                }
                Err(RecvError::Closed) => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
        }
    }

    let _ = sd_notify::notify(false, &[NotifyState::Stopping]);
    handle.shutdown().await;
    if let Err(e) = task.await {
        warn!("Control loop ended abnormally: {e}");
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn print_snapshot(snapshot: &Snapshot) {
    println!("{}", "Tor".header());
    println!("  Status:       {}", styled_status(snapshot.status));
    println!("  Mode:         {}", snapshot.mode);
    println!("  Init system:  {}", snapshot.init_system);
    if let Some(pid) = snapshot.pid.pid() {
        println!("  PID:          {}", pid.to_string().technical());
    }
}

fn print_outcome(outcome: &Outcome, target: RunningStatus) {
    println!("{}: {}", "tor".header(), outcome.action);
    println!("  Status: {}", styled_status(outcome.status));
    if outcome.status != target {
        println!(
            "  {}",
            format!("Requested {target}, status may settle on the next check").warning()
        );
    }
}

/// Print the summary of a loaded configuration
pub fn validate(config: &Config) {
    config.print_summary();
}
