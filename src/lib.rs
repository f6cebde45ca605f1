//! `onionctl` - Tor daemon control
//!
//! Observes and controls the Tor daemon either as the system-wide service or as a
//! process owned by the current user.
//!
//! # Features
//! - Init system detection (systemd, Upstart, SysV)
//! - Periodic status reconciliation through a single-owner control loop
//! - Start/stop through `service`, a privilege helper, or a detached child process
//! - Tor installation through PackageKit with streamed progress
//!
//! All contact with the operating system goes through the [`host::Host`] trait.

pub mod cli;
pub mod commands;
pub mod config;
pub mod control_loop;
pub mod controller;
pub mod host;
pub mod init_system;
pub mod install;
pub mod logging;
pub mod notification;
pub mod privilege;
pub mod process;
pub mod reconciler;
pub mod status;
pub mod style;

#[cfg(test)]
pub(crate) mod test_utils;

/// Build-time information (version, git commit, target)
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

// Re-export commonly used types for convenience
pub use cli::Args;
pub use config::Config;
pub use control_loop::ControlHandle;
pub use controller::ServiceController;
pub use host::{Host, SystemHost};
pub use status::{Mode, RunningStatus};
