//! Service lifecycle control, delegated to the OS-native service manager.
//!
//! - Linux: systemd (`systemctl`), user units by default
//! - macOS: launchd (`launchctl`), per-user agents by default
//! - anything else: informational no-op
//!
//! The backend is chosen once from the detected platform; callers only see
//! [`ServiceBackend`].

mod files;
mod launchd;
mod systemd;
mod unsupported;

pub use launchd::Launchd;
pub use systemd::Systemd;
pub use unsupported::Unsupported;

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::Scope;
use crate::error::{DistError, Result};
use crate::exec::{CommandOutput, CommandRunner};
use crate::platform::{Os, Platform};

pub const SERVICE_LABEL: &str = "femtobot";

/// Variables copied from the installing environment into the service.
pub const PASSTHROUGH_ENV: &[&str] = &["RUST_LOG", "FEMTOBOT_DATA_DIR", "FEMTOBOT_WORKSPACE_DIR"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Everything needed to render a unit or plist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub label: String,
    pub exec_path: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_paths: LogPaths,
    pub restart_policy: RestartPolicy,
    pub auto_start: bool,
    pub env: Vec<(String, String)>,
}

impl ServiceDescriptor {
    /// Descriptor for running `exec_path run` from `home`, logging under
    /// `~/.femtobot/logs`.
    pub fn for_binary(exec_path: &Path, home: &Path, env: Vec<(String, String)>) -> Self {
        if is_debug_build(exec_path) {
            warn!(
                "{} looks like a debug build; the service will run unoptimized",
                exec_path.display()
            );
        }

        let log_dir = home.join(".femtobot").join("logs");
        Self {
            label: SERVICE_LABEL.to_string(),
            exec_path: exec_path.to_path_buf(),
            args: vec!["run".to_string()],
            working_dir: home.to_path_buf(),
            log_paths: LogPaths {
                stdout: log_dir.join(format!("{SERVICE_LABEL}.out.log")),
                stderr: log_dir.join(format!("{SERVICE_LABEL}.err.log")),
            },
            restart_policy: RestartPolicy::Always,
            auto_start: true,
            env,
        }
    }
}

/// Outcome of an attached log viewer. A follow is normally ended with
/// Ctrl-C, which kills the viewer by signal; that is not a failure.
pub(crate) fn log_viewer_result(tool: &str, out: &CommandOutput, follow: bool) -> Result<()> {
    if out.success() {
        return Ok(());
    }
    if follow && out.status.is_none() {
        debug!("{tool} ended by signal");
        return Ok(());
    }
    Err(DistError::ServiceTool {
        tool: tool.to_string(),
        step: "logs".to_string(),
        detail: out.detail(),
    })
}

/// The [`PASSTHROUGH_ENV`] variables that are set and non-empty.
pub fn passthrough_env(lookup: impl Fn(&str) -> Option<String>) -> Vec<(String, String)> {
    PASSTHROUGH_ENV
        .iter()
        .filter_map(|key| lookup(key).filter(|v| !v.is_empty()).map(|v| (key.to_string(), v)))
        .collect()
}

fn is_debug_build(path: &Path) -> bool {
    let components: Vec<_> = path.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    components
        .windows(2)
        .any(|pair| pair[0] == "target" && pair[1] == "debug")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    NotInstalled,
    Running,
    /// Installed but not running, with the manager's own word for it.
    Stopped(Option<String>),
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::NotInstalled => write!(f, "not installed"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Stopped(Some(reason)) => write!(f, "stopped ({reason})"),
            ServiceStatus::Stopped(None) => write!(f, "stopped"),
        }
    }
}

/// One OS service manager. Every operation other than `install` and `start`
/// tolerates a missing service.
pub trait ServiceBackend {
    fn name(&self) -> &'static str;

    /// Where the unit/plist lives, if this backend persists one.
    fn definition_path(&self) -> Option<PathBuf>;

    /// Render, write (overwriting), reload, enable and start.
    fn install(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    fn status(&self) -> Result<ServiceStatus>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn restart(&self) -> Result<()>;

    fn logs(&self, lines: usize, follow: bool) -> Result<()>;

    fn uninstall(&self) -> Result<()>;
}

/// Pick the backend for `platform`. Linux without `systemctl` on `PATH`
/// falls back to the no-op backend.
pub fn for_platform<'a, R: CommandRunner + 'a>(
    platform: Platform,
    scope: Scope,
    home: &Path,
    runner: R,
) -> Box<dyn ServiceBackend + 'a> {
    match platform.os {
        Os::Linux if which::which("systemctl").is_ok() => Box::new(Systemd::new(runner, scope, home, SERVICE_LABEL)),
        Os::Darwin => Box::new(Launchd::new(runner, scope, home, SERVICE_LABEL)),
        _ => {
            info!("no supported service manager on {platform}");
            Box::new(Unsupported::new(platform))
        }
    }
}
