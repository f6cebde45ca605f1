//! Logging setup
//!
//! Interactive commands log to stderr at `warn` unless `RUST_LOG` says otherwise.
//! `onionctl watch` running in the background writes to a size-rotated file under
//! the XDG state directory instead.

use color_eyre::eyre::{self, Context, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::status::Mode;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Log file name inside [`log_dir`]
pub const WATCH_LOG: &str = "watch.log";

/// Rotate once the active file reaches this size
pub const MAX_LOG_BYTES: u64 = 1_000_000;

/// Initialize stderr logging for one-shot commands
pub fn init_cli_logging() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

/// Initialize stderr logging for `watch --foreground` at the configured level
pub fn init_foreground_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(crate_filter(level))
        .init();
}

/// Initialize file logging for background `watch`
///
/// The returned guard flushes buffered lines when dropped; keep it alive for the
/// lifetime of the process.
///
/// # Errors
/// Returns an error if the log directory cannot be determined or created.
pub fn init_file_logging(level: &str, mode: Mode) -> Result<WorkerGuard> {
    let dir = log_dir()?;
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log dir: {}", dir.display()))?;

    let appender = RotatingFileAppender::new(&dir, WATCH_LOG, MAX_LOG_BYTES)
        .with_header(watch_header(mode, std::process::id()));
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(crate_filter(level))
        .init();

    Ok(guard)
}

/// First line of every fresh watch log, so a file can be tied to its mode and process
fn watch_header(mode: Mode, pid: u32) -> String {
    format!(
        "# onionctl {} watch, {mode} mode, pid {pid}",
        env!("CARGO_PKG_VERSION")
    )
}

/// `RUST_LOG` if set, otherwise only this crate at `level`
fn crate_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("onionctl={level}")))
}

/// `$XDG_STATE_HOME/onionctl`, falling back to the cache directory
///
/// # Errors
/// Returns an error if neither directory can be determined.
pub fn log_dir() -> Result<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join("onionctl"))
        .ok_or_else(|| eyre::eyre!("Could not determine a state or cache directory for logs"))
}

/// Size-rotated log file
///
/// Keeps the active file plus one `.old` generation. A file deleted from under
/// the appender is recreated on the next write. New files are created `0600`.
pub struct RotatingFileAppender {
    path: PathBuf,
    rotated_path: PathBuf,
    max_bytes: u64,
    /// Written as the first line whenever a new, empty file is started
    header: Option<String>,
    file: Mutex<Option<File>>,
}

impl RotatingFileAppender {
    pub fn new(dir: impl AsRef<Path>, filename: &str, max_bytes: u64) -> Self {
        let dir = dir.as_ref();
        Self {
            path: dir.join(filename),
            rotated_path: dir.join(format!("{filename}.old")),
            max_bytes,
            header: None,
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path, truncate: bool) -> io::Result<File> {
        let mut options = fs::OpenOptions::new();
        options.create(true).write(true);
        if truncate {
            options.truncate(true);
        } else {
            options.append(true);
        }
        #[cfg(unix)]
        options.mode(0o600);
        options.open(path)
    }

    /// Open the active file, starting it with the header if it is empty
    fn start_file(&self, truncate: bool) -> io::Result<File> {
        let mut file = Self::open(&self.path, truncate)?;
        if let Some(header) = &self.header
            && file.metadata()?.len() == 0
        {
            writeln!(file, "{header}")?;
        }
        Ok(file)
    }

    /// Current handle, reopened if the file vanished
    fn current<'a>(&self, slot: &'a mut Option<File>) -> io::Result<&'a mut File> {
        if !self.path.exists() {
            *slot = None;
        }
        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            *slot = Some(self.start_file(false)?);
        }
        slot.as_mut()
            .ok_or_else(|| io::Error::other("log file is not open"))
    }

    fn rotate(&self, slot: &mut Option<File>) -> io::Result<()> {
        *slot = None;
        if self.path.exists() {
            fs::rename(&self.path, &self.rotated_path)?;
        }
        *slot = Some(self.start_file(true)?);
        Ok(())
    }
}

impl Write for RotatingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;

        let size = self
            .current(&mut slot)
            .and_then(|f| f.metadata())
            .map_or(0, |m| m.len());

        if size >= self.max_bytes
            && let Err(e) = self.rotate(&mut slot)
        {
            eprintln!("Failed to rotate {}: {e}", self.path.display());
        }

        self.current(&mut slot)?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;
        if let Some(file) = slot.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}
