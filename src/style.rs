//! Terminal styling utilities
//!
//! One small palette for all CLI output:
//! - Semantic colors for status (green/yellow/red)
//! - Cyan for headers and technical terms

use crossterm::style::{StyledContent, Stylize};

use crate::status::RunningStatus;

/// Extension trait for consistent onionctl styling
///
/// # Examples
///
/// ```
/// use onionctl::style::OnionStyle;
///
/// println!("{}", "Tor".header());
/// println!("{}", "/usr/sbin/service".technical());
/// ```
pub trait OnionStyle: Stylize {
    /// Section headers (cyan bold)
    fn header(self) -> <<Self as Stylize>::Styled as Stylize>::Styled
    where
        Self: Sized,
        <Self as Stylize>::Styled: Stylize,
    {
        self.cyan().bold()
    }

    /// Positive states: "running", "Installed tor"
    fn success(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.green()
    }

    /// Problems: "tor not installed", failed installs
    fn error(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.red()
    }

    /// Partial or undecided states
    fn warning(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.yellow()
    }

    /// Paths, program names, pids
    fn technical(self) -> <Self as Stylize>::Styled
    where
        Self: Sized,
    {
        self.cyan()
    }
}

impl<T: Stylize> OnionStyle for T {}

/// Status text colored by meaning
#[must_use]
pub fn styled_status(status: RunningStatus) -> StyledContent<String> {
    let text = status.to_string();
    match status {
        RunningStatus::Running => text.success(),
        RunningStatus::NotRunning => text.warning(),
        RunningStatus::NoTor => text.error(),
        RunningStatus::Unknown => text.dark_grey(),
    }
}
