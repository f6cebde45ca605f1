//! Command-line interface definitions
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Parser, Subcommand};

use crate::status::Mode;

/// onionctl - Tor daemon control
///
/// Observe, start and stop the Tor daemon as a system service or a user process.
#[derive(Parser)]
#[command(name = "onionctl")]
#[command(version)]
#[command(about = "Observe and control the Tor daemon, system-wide or as a user process")]
#[command(after_help = "\
MODES:
  system   Control the tor service. Uses `service` on systemd hosts and a
           privilege helper (kdesu/kdesudo + torctl) elsewhere
  user     Start tor as a detached child process, stop it with SIGTERM

COMMANDS:
  onionctl status           Show the current status (or just: onionctl)
  onionctl start            Start tor if it is not running
  onionctl stop             Stop tor if it is running
  onionctl watch            Keep reconciling and print every change
  onionctl detect           Show init system, privilege helper and pid
  onionctl install          Install tor through PackageKit
  onionctl validate         Validate the config file

CONFIG:
  $XDG_CONFIG_HOME/onionctl/config.toml (created on first run)

LOGS:
  Interactive commands log to stderr (RUST_LOG, default warn).
  Background watch logs to $XDG_STATE_HOME/onionctl/watch.log")]
pub struct Args {
    /// Control a tor process owned by this user
    #[arg(long, global = true, conflicts_with = "system")]
    pub user: bool,

    /// Control the system-wide tor service
    #[arg(long, global = true)]
    pub system: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Args {
    /// Mode requested on the command line, if any
    #[must_use]
    pub fn mode_override(&self) -> Option<Mode> {
        if self.user {
            Some(Mode::User)
        } else if self.system {
            Some(Mode::System)
        } else {
            None
        }
    }
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Reconcile once and print the status
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Start tor (no-op if already running)
    Start,

    /// Stop tor (no-op if not running)
    Stop,

    /// Run the control loop and print status changes
    Watch {
        /// Log to stderr instead of the log file
        #[arg(short, long)]
        foreground: bool,
    },

    /// Show what this host uses to run tor
    Detect {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Install tor through PackageKit
    Install,

    /// Validate config file
    Validate,
}
