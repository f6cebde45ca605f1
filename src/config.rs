//! Configuration management
//!
//! Handles loading, parsing, and validating the TOML configuration file.
//! Covers control settings, the daemon's names and paths, privilege helpers
//! and the packages the installer resolves.

use color_eyre::eyre::{self, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::status::Mode;

// ============================================================================
// Public Configuration Types
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub settings: Settings,
    pub daemon: DaemonSettings,
    pub privilege: PrivilegeSettings,
    pub install: InstallSettings,
}

/// Control loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub mode: Mode,
    pub poll_interval: Duration,
    /// Bound for every external command except the liveness check
    pub command_timeout: Duration,
    /// Bound for `tor --version`; kept short so `NoTor` is published quickly
    pub liveness_timeout: Duration,
    /// How long a finished installation message stays visible
    pub work_clear_delay: Duration,
    pub notify_install: bool,
    pub log_level: String,
}

/// Names and paths of the daemon and the host's service tooling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    /// Daemon executable, looked up in `PATH`
    pub binary: String,
    /// Service unit name
    pub unit: String,
    /// `service` wrapper used for systemd status/start/stop
    pub service_command: String,
    /// Control script run through the privilege helper on non-systemd hosts
    pub service_helper: String,
    pub init_binary: String,
    /// A well-known SysV script whose presence marks a SysV host
    pub legacy_init_script: PathBuf,
}

/// Privilege escalation helpers, in order of preference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegeSettings {
    pub helpers: Vec<String>,
}

/// Packages resolved and installed by `onionctl install`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSettings {
    pub packages: Vec<String>,
    /// Upper bound for each package manager step
    pub timeout: Duration,
}

// ============================================================================
// Config File Deserialization (TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    settings: SettingsFile,
    #[serde(default)]
    daemon: DaemonFile,
    #[serde(default)]
    privilege: PrivilegeFile,
    #[serde(default)]
    install: InstallFile,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SettingsFile {
    mode: String,
    poll_interval_secs: u64,
    command_timeout_ms: u64,
    liveness_timeout_ms: u64,
    work_clear_secs: u64,
    notify_install: bool,
    log_level: String,
}

impl Default for SettingsFile {
    fn default() -> Self {
        Self {
            mode: "system".to_string(),
            poll_interval_secs: 5,
            command_timeout_ms: 30_000,
            liveness_timeout_ms: 1_000,
            work_clear_secs: 3,
            notify_install: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DaemonFile {
    binary: String,
    unit: String,
    service_command: String,
    service_helper: String,
    init_binary: String,
    legacy_init_script: PathBuf,
}

impl Default for DaemonFile {
    fn default() -> Self {
        Self {
            binary: "tor".to_string(),
            unit: "tor".to_string(),
            service_command: "/usr/sbin/service".to_string(),
            service_helper: "torctl".to_string(),
            init_binary: "/sbin/init".to_string(),
            legacy_init_script: PathBuf::from("/etc/init.d/cron"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PrivilegeFile {
    helpers: Vec<String>,
}

impl Default for PrivilegeFile {
    fn default() -> Self {
        Self {
            helpers: vec!["kdesu".to_string(), "kdesudo".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct InstallFile {
    packages: Vec<String>,
    timeout_secs: u64,
}

impl Default for InstallFile {
    fn default() -> Self {
        Self {
            packages: vec!["tor".to_string()],
            timeout_secs: 600,
        }
    }
}

// ============================================================================
// Config Implementation
// ============================================================================

impl Default for Config {
    fn default() -> Self {
        // Built-in defaults always validate
        Self::from_config_file(ConfigFile::default()).unwrap_or_else(|e| {
            unreachable!("default configuration is invalid: {e:#}")
        })
    }
}

impl Config {
    /// Load configuration from the default XDG config path, creating it if missing
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be created, or the file cannot
    /// be read, parsed or validated.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            info!("Creating default config at {}", config_path.display());
            Self::create_default_config(&config_path)?;
        }

        Self::load_from_path(&config_path)
    }

    /// Load configuration from an explicit path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    /// Returns an error if the TOML is malformed or a value fails validation.
    pub fn parse(contents: &str) -> Result<Self> {
        let config_file: ConfigFile =
            toml::from_str(contents).context("Failed to parse config TOML")?;
        Self::from_config_file(config_file)
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mode = file
            .settings
            .mode
            .parse::<Mode>()
            .map_err(|e| eyre::eyre!(e))?;

        let config = Config {
            settings: Settings {
                mode,
                poll_interval: Duration::from_secs(file.settings.poll_interval_secs),
                command_timeout: Duration::from_millis(file.settings.command_timeout_ms),
                liveness_timeout: Duration::from_millis(file.settings.liveness_timeout_ms),
                work_clear_delay: Duration::from_secs(file.settings.work_clear_secs),
                notify_install: file.settings.notify_install,
                log_level: file.settings.log_level,
            },
            daemon: DaemonSettings {
                binary: file.daemon.binary,
                unit: file.daemon.unit,
                service_command: file.daemon.service_command,
                service_helper: file.daemon.service_helper,
                init_binary: file.daemon.init_binary,
                legacy_init_script: file.daemon.legacy_init_script,
            },
            privilege: PrivilegeSettings {
                helpers: file.privilege.helpers,
            },
            install: InstallSettings {
                packages: file.install.packages,
                timeout: Duration::from_secs(file.install.timeout_secs),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.settings.log_level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            level => eyre::bail!(
                "Invalid log_level '{level}'. Must be: error, warn, info, debug, or trace"
            ),
        }

        if self.settings.poll_interval < Duration::from_secs(1) {
            eyre::bail!("poll_interval_secs must be at least 1");
        }

        if self.settings.liveness_timeout.is_zero() {
            eyre::bail!("liveness_timeout_ms must be greater than 0");
        }

        if self.settings.liveness_timeout >= self.settings.command_timeout {
            eyre::bail!(
                "liveness_timeout_ms ({}) must be shorter than command_timeout_ms ({})",
                self.settings.liveness_timeout.as_millis(),
                self.settings.command_timeout.as_millis()
            );
        }

        for (key, value) in [
            ("daemon.binary", &self.daemon.binary),
            ("daemon.unit", &self.daemon.unit),
            ("daemon.service_command", &self.daemon.service_command),
            ("daemon.service_helper", &self.daemon.service_helper),
            ("daemon.init_binary", &self.daemon.init_binary),
        ] {
            if value.trim().is_empty() {
                eyre::bail!("{key} must not be empty");
            }
        }

        if self.privilege.helpers.iter().all(|h| h.trim().is_empty()) {
            eyre::bail!("privilege.helpers must name at least one helper program");
        }

        if self.install.packages.iter().all(|p| p.trim().is_empty()) {
            eyre::bail!("install.packages must name at least one package");
        }

        if self.install.timeout.is_zero() {
            eyre::bail!("install.timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Get the XDG config path for onionctl
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined or created.
    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre::eyre!("Could not determine config directory"))?
            .join("onionctl");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;
        Ok(config_dir.join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<()> {
        let default_config = r#"# onionctl configuration
#
# Observes and starts/stops the Tor daemon, either as the system-wide
# service or as a user-local process.

[settings]
mode = "system"              # "system" (service, needs privilege) or "user" (own process)
poll_interval_secs = 5       # Status reconciliation interval for `onionctl watch`
command_timeout_ms = 30000   # Upper bound for any external command
liveness_timeout_ms = 1000   # Upper bound for `tor --version` (must be shorter)
work_clear_secs = 3          # How long a finished install message stays visible
notify_install = true        # Desktop notification when `onionctl install` finishes
log_level = "info"           # error, warn, info, debug, trace

[daemon]
binary = "tor"
unit = "tor"
service_command = "/usr/sbin/service"
service_helper = "torctl"          # Run through the privilege helper on non-systemd hosts
init_binary = "/sbin/init"
legacy_init_script = "/etc/init.d/cron"

[privilege]
helpers = ["kdesu", "kdesudo"]     # Tried in order with --version

[install]
packages = ["tor"]
timeout_secs = 600                 # Upper bound for each PackageKit step
"#;
        fs::write(path, default_config)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;

        eprintln!("Created default config at: {}", path.display());
        eprintln!();
        eprintln!("Next steps:");
        eprintln!("  1. Run 'onionctl detect' to see what this host uses");
        eprintln!("  2. Edit the config file if tor lives under other names");
        eprintln!("  3. Run 'onionctl validate' to check your config");
        eprintln!();

        Ok(())
    }

    /// Print a human-readable summary of the configuration
    pub fn print_summary(&self) {
        println!("✓ Configuration valid\n");

        println!("Settings:");
        println!("  mode: {}", self.settings.mode);
        println!("  poll_interval: {:?}", self.settings.poll_interval);
        println!("  command_timeout: {:?}", self.settings.command_timeout);
        println!("  liveness_timeout: {:?}", self.settings.liveness_timeout);
        println!("  work_clear_delay: {:?}", self.settings.work_clear_delay);
        println!("  notify_install: {}", self.settings.notify_install);
        println!("  log_level: {}", self.settings.log_level);

        println!("\nDaemon:");
        println!("  binary: {}", self.daemon.binary);
        println!("  unit: {}", self.daemon.unit);
        println!("  service_command: {}", self.daemon.service_command);
        println!("  service_helper: {}", self.daemon.service_helper);
        println!("  init_binary: {}", self.daemon.init_binary);
        println!(
            "  legacy_init_script: {}",
            self.daemon.legacy_init_script.display()
        );

        println!("\nPrivilege helpers: {}", self.privilege.helpers.join(", "));
        println!("Install packages: {}", self.install.packages.join(", "));
        println!("Install timeout: {:?}", self.install.timeout);

        if let Ok(path) = Self::get_config_path() {
            println!("\nConfig: {}", path.display());
        }
    }

    /// First configured package, used in installer messages
    #[must_use]
    pub fn primary_package(&self) -> &str {
        self.install
            .packages
            .iter()
            .find(|p| !p.trim().is_empty())
            .map_or(self.daemon.binary.as_str(), String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.settings.mode, Mode::System);
        assert_eq!(config.settings.poll_interval, Duration::from_secs(5));
        assert_eq!(config.settings.liveness_timeout, Duration::from_millis(1000));
        assert_eq!(config.settings.work_clear_delay, Duration::from_secs(3));
        assert_eq!(config.daemon.service_helper, "torctl");
        assert_eq!(config.privilege.helpers, vec!["kdesu", "kdesudo"]);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
[settings]
mode = "user"

[daemon]
binary = "/opt/tor/bin/tor"
"#,
        )
        .unwrap();
        assert_eq!(config.settings.mode, Mode::User);
        assert_eq!(config.daemon.binary, "/opt/tor/bin/tor");
        assert_eq!(config.daemon.unit, "tor");
        assert!(config.settings.notify_install);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let err = Config::parse("[settings]\nmode = \"root\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("Invalid mode"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let err = Config::parse("[settings]\nlog_level = \"loud\"\n").unwrap_err();
        assert!(format!("{err:#}").contains("Invalid log_level"));
    }

    #[test]
    fn test_liveness_timeout_must_be_shorter() {
        let err = Config::parse(
            "[settings]\ncommand_timeout_ms = 500\nliveness_timeout_ms = 500\n",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("must be shorter"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(Config::parse("[settings]\npoll_interval_secs = 0\n").is_err());
    }

    #[test]
    fn test_empty_helper_list_rejected() {
        let err = Config::parse("[privilege]\nhelpers = []\n").unwrap_err();
        assert!(format!("{err:#}").contains("privilege.helpers"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse("[settings]\nsystem_tor = true\n").is_err());
    }

    #[test]
    fn test_generated_default_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Config::create_default_config(&path).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_primary_package() {
        let config = Config::parse("[install]\npackages = [\"tor\", \"torsocks\"]\n").unwrap();
        assert_eq!(config.primary_package(), "tor");
    }
}
