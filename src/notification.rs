//! Desktop notifications
//!
//! Sent through notify-rust when `onionctl install` finishes.

use color_eyre::eyre::{Context, Result};
use notify_rust::Notification;

use crate::install::InstallOutcome;

/// Send a desktop notification
///
/// # Errors
/// Returns an error if the notification cannot be sent (e.g., no notification daemon running).
pub fn send_notification(summary: &str, body: &str, icon: &str) -> Result<()> {
    Notification::new()
        .summary(summary)
        .body(body)
        .appname("onionctl")
        .icon(icon)
        .timeout(5000)
        .show()
        .context("Failed to show notification")?;

    Ok(())
}

/// `FreeDesktop` icon name for an installer outcome
#[must_use]
pub fn install_icon(outcome: InstallOutcome) -> &'static str {
    match outcome {
        InstallOutcome::Installed => "system-software-install",
        InstallOutcome::NothingToInstall => "dialog-information",
        InstallOutcome::ResolveFailed | InstallOutcome::InstallFailed => "dialog-error",
    }
}
