//! Tor installation through PackageKit
//!
//! A two-step workflow: resolve the configured package names, then install the
//! ones that are available. Each step streams percentage progress into a
//! [`WorkStatus`] message; the terminal message clears itself after a short delay.
//!
//! The workflow only ever touches `WorkStatus`. Whether tor now runs is left to
//! the next reconciliation pass.

use color_eyre::eyre::{self, Context, Result};
use serde::Serialize;
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Progress values above this mean "unknown" in PackageKit
const MAX_PERCENTAGE: u32 = 100;

/// Progress message shown while the installer works
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkStatus {
    /// Empty when there is nothing to report
    pub message: String,
    pub finished: bool,
    /// Set when the terminal message reports a failure
    pub failed: bool,
}

impl WorkStatus {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.message.is_empty()
    }
}

/// How the workflow ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    NothingToInstall,
    ResolveFailed,
    InstallFailed,
}

/// Package manager operations needed by the installer
///
/// Progress percentages go to `progress`; the sender is dropped when the step ends.
pub trait PackageBackend: Send + Sync + 'static {
    /// Resolve package names, returning the ones that are available to install
    fn resolve(
        &self,
        packages: &[String],
        progress: mpsc::UnboundedSender<u32>,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn install(
        &self,
        packages: &[String],
        progress: mpsc::UnboundedSender<u32>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Runs the install workflow and publishes its progress
pub struct Installer<B: PackageBackend> {
    backend: Arc<B>,
    packages: Vec<String>,
    label: String,
    clear_delay: Duration,
    work: watch::Sender<WorkStatus>,
    generation: Arc<AtomicU64>,
}

impl<B: PackageBackend> Installer<B> {
    pub fn new(backend: Arc<B>, config: &Config) -> Self {
        let packages = config
            .install
            .packages
            .iter()
            .filter(|p| !p.trim().is_empty())
            .cloned()
            .collect();
        let (work, _) = watch::channel(WorkStatus::default());
        Self {
            backend,
            packages,
            label: config.primary_package().to_string(),
            clear_delay: config.settings.work_clear_delay,
            work,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receiver for progress and terminal messages
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WorkStatus> {
        self.work.subscribe()
    }

    #[must_use]
    pub fn work_status(&self) -> WorkStatus {
        self.work.borrow().clone()
    }

    /// Resolve, then install what was found
    pub async fn run(&self) -> InstallOutcome {
        info!("Attempting to install {}", self.packages.join(", "));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(format!("Installing {}", self.label), false, false);

        let resolved = self
            .step(|tx| self.backend.resolve(&self.packages, tx))
            .await;

        let mut ids = match resolved {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Resolve failed: {e:#}");
                self.finish(
                    generation,
                    format!(
                        "{} is not available, or has an unexpected name. Please install it manually.",
                        self.label
                    ),
                    true,
                );
                return InstallOutcome::ResolveFailed;
            }
        };

        if ids.is_empty() {
            self.finish(generation, "There was nothing to install.".to_string(), false);
            return InstallOutcome::NothingToInstall;
        }

        ids.sort();
        ids.dedup();
        info!("Installing {}", ids.join(", "));

        match self.step(|tx| self.backend.install(&ids, tx)).await {
            Ok(()) => {
                self.finish(generation, format!("Installed {}", self.label), false);
                InstallOutcome::Installed
            }
            Err(e) => {
                warn!("Install failed: {e:#}");
                self.finish(generation, format!("{} installation failed!", self.label), true);
                InstallOutcome::InstallFailed
            }
        }
    }

    /// Run one backend step while forwarding its progress into the work message
    async fn step<T, F>(&self, work: impl FnOnce(mpsc::UnboundedSender<u32>) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forward = async {
            while let Some(percentage) = rx.recv().await {
                self.publish(self.progress_message(percentage), false, false);
            }
        };
        let (result, ()) = tokio::join!(work(tx), forward);
        result
    }

    fn progress_message(&self, percentage: u32) -> String {
        if percentage <= MAX_PERCENTAGE {
            format!("Installing {} ({percentage}%)", self.label)
        } else {
            format!("Installing {}...", self.label)
        }
    }

    fn publish(&self, message: String, finished: bool, failed: bool) {
        self.work.send_replace(WorkStatus {
            message,
            finished,
            failed,
        });
    }

    fn finish(&self, generation: u64, message: String, failed: bool) {
        if failed {
            warn!("Work completed with an error: {message}");
        } else {
            info!("Work completed: {message}");
        }
        self.publish(message, true, failed);

        let work = self.work.clone();
        let current = Arc::clone(&self.generation);
        let delay = self.clear_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A newer run owns the message now
            if current.load(Ordering::SeqCst) == generation {
                work.send_replace(WorkStatus::default());
            }
        });
    }
}

// ============================================================================
// PackageKit backend (pkcon)
// ============================================================================

/// PackageKit through its console client, `pkcon --plain`
#[derive(Debug, Clone)]
pub struct PkconBackend {
    program: String,
    timeout: Duration,
}

impl PkconBackend {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "pkcon".to_string(),
            timeout,
        }
    }

    /// Run pkcon, forwarding `Percentage:` lines and collecting all stdout lines
    async fn run(&self, args: &[&str], progress: &mpsc::UnboundedSender<u32>) -> Result<Vec<String>> {
        let mut child = Command::new(&self.program)
            .arg("--plain")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", self.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| eyre::eyre!("{} stdout was not captured", self.program))?;

        let collect = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut collected = Vec::new();
            while let Some(line) = lines.next_line().await? {
                if let Some(percentage) = parse_percentage(&line) {
                    let _ = progress.send(percentage);
                }
                collected.push(line);
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((collected, status))
        };

        let (lines, status) = tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| eyre::eyre!("{} {} timed out", self.program, args.join(" ")))?
            .with_context(|| format!("Failed to read {} output", self.program))?;

        if !status.success() {
            eyre::bail!("{} {} failed: {status}", self.program, args.join(" "));
        }
        debug!("{} {} finished", self.program, args.join(" "));
        Ok(lines)
    }
}

impl PackageBackend for PkconBackend {
    async fn resolve(
        &self,
        packages: &[String],
        progress: mpsc::UnboundedSender<u32>,
    ) -> Result<Vec<String>> {
        let mut args = vec!["resolve"];
        args.extend(packages.iter().map(String::as_str));
        let lines = self.run(&args, &progress).await?;
        Ok(available_packages(&lines, packages))
    }

    async fn install(
        &self,
        packages: &[String],
        progress: mpsc::UnboundedSender<u32>,
    ) -> Result<()> {
        let mut args = vec!["-y", "install"];
        args.extend(packages.iter().map(String::as_str));
        self.run(&args, &progress).await?;
        Ok(())
    }
}

/// Parse a `Percentage:\t42` progress line
fn parse_percentage(line: &str) -> Option<u32> {
    line.trim()
        .strip_prefix("Percentage:")
        .and_then(|rest| rest.trim().parse().ok())
}

/// Requested package names that resolve to an `Available` row
///
/// Rows look like `Available   tor-0.4.8.12-1.fc40.x86_64 (updates)`. Installed
/// packages are reported as `Installed` and are not candidates.
fn available_packages(lines: &[String], requested: &[String]) -> Vec<String> {
    let mut found: Vec<String> = lines
        .iter()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            (fields.next()? == "Available").then_some(fields.next()?)
        })
        .filter_map(|nevra| {
            requested
                .iter()
                .find(|name| {
                    nevra
                        .strip_prefix(name.as_str())
                        .is_some_and(|rest| rest.starts_with('-'))
                })
                .cloned()
        })
        .collect();
    found.sort();
    found.dedup();
    found
}
