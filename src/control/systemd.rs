//! systemd backend (`systemctl`, `journalctl`).

use std::path::{Path, PathBuf};

use log::{info, warn};

use super::files::{remove_if_present, write_file_atomic};
use super::{log_viewer_result, RestartPolicy, ServiceBackend, ServiceDescriptor, ServiceStatus};
use crate::config::Scope;
use crate::error::{DistError, Result};
use crate::exec::{CommandOutput, CommandRunner};

const SYSTEMCTL: &str = "systemctl";
const JOURNALCTL: &str = "journalctl";

const LINGER_HINT: &str = "user services need a systemd user session. Over SSH this usually means \
lingering is off: run `loginctl enable-linger $USER` (or log in on a console), check that \
XDG_RUNTIME_DIR is set, then retry `femtodist service install`";

pub struct Systemd<R> {
    runner: R,
    scope: Scope,
    unit_dir: PathBuf,
    unit: String,
}

impl<R: CommandRunner> Systemd<R> {
    pub fn new(runner: R, scope: Scope, home: &Path, label: &str) -> Self {
        let unit_dir = match scope {
            Scope::User => home.join(".config").join("systemd").join("user"),
            Scope::System => PathBuf::from("/etc/systemd/system"),
        };
        Self::with_unit_dir(runner, scope, unit_dir, label)
    }

    pub fn with_unit_dir(runner: R, scope: Scope, unit_dir: PathBuf, label: &str) -> Self {
        Self {
            runner,
            scope,
            unit_dir,
            unit: format!("{label}.service"),
        }
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(&self.unit)
    }

    fn scoped<'a>(&self, program_args: &[&'a str]) -> Vec<&'a str> {
        let mut args = Vec::with_capacity(program_args.len() + 1);
        if self.scope == Scope::User {
            args.push("--user");
        }
        args.extend_from_slice(program_args);
        args
    }

    fn systemctl(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(SYSTEMCTL, &self.scoped(args))
    }

    /// Run a step that must succeed.
    fn require(&self, step: &str, args: &[&str]) -> Result<CommandOutput> {
        let out = self.systemctl(args)?;
        if !out.success() {
            return Err(DistError::ServiceTool {
                tool: SYSTEMCTL.to_string(),
                step: step.to_string(),
                detail: out.detail(),
            });
        }
        Ok(out)
    }

    /// Run a step where "no such unit" counts as done.
    fn tolerate_absent(&self, step: &str, args: &[&str]) -> Result<()> {
        let out = self.systemctl(args)?;
        if out.success() || out.is_absent() {
            return Ok(());
        }
        Err(DistError::ServiceTool {
            tool: SYSTEMCTL.to_string(),
            step: step.to_string(),
            detail: out.detail(),
        })
    }

    fn teardown(&self) {
        match self.systemctl(&["disable", "--now", &self.unit]) {
            Ok(out) if out.success() || out.is_absent() => {}
            Ok(out) => warn!("ignoring failure to stop previous {}: {}", self.unit, out.detail()),
            Err(e) => warn!("ignoring failure to stop previous {}: {e}", self.unit),
        }
    }
}

/// Quote an `ExecStart=` word if systemd would otherwise split it.
fn quote(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return word.to_string();
    }
    format!("\"{}\"", word.replace('\\', "\\\\").replace('"', "\\\""))
}

pub(crate) fn render_unit(descriptor: &ServiceDescriptor, scope: Scope) -> String {
    let mut content = String::with_capacity(512);

    content.push_str("[Unit]\n");
    content.push_str(&format!("Description={} agent\n", descriptor.label));
    content.push_str("Wants=network-online.target\n");
    content.push_str("After=network-online.target\n");
    content.push('\n');

    content.push_str("[Service]\n");
    content.push_str("Type=simple\n");
    let mut exec = quote(&descriptor.exec_path.to_string_lossy());
    for arg in &descriptor.args {
        exec.push(' ');
        exec.push_str(&quote(arg));
    }
    content.push_str(&format!("ExecStart={exec}\n"));
    content.push_str(&format!(
        "WorkingDirectory={}\n",
        quote(&descriptor.working_dir.to_string_lossy())
    ));
    match descriptor.restart_policy {
        RestartPolicy::Always => {
            content.push_str("Restart=always\n");
            content.push_str("RestartSec=5s\n");
        }
    }
    for (key, value) in &descriptor.env {
        content.push_str(&format!("Environment={}\n", quote(&format!("{key}={value}"))));
    }
    content.push_str("StandardOutput=journal\n");
    content.push_str("StandardError=journal\n");
    content.push_str(&format!("SyslogIdentifier={}\n", descriptor.label));
    content.push('\n');

    if descriptor.auto_start {
        content.push_str("[Install]\n");
        match scope {
            Scope::User => content.push_str("WantedBy=default.target\n"),
            Scope::System => content.push_str("WantedBy=multi-user.target\n"),
        }
    }

    content
}

impl<R: CommandRunner> ServiceBackend for Systemd<R> {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn definition_path(&self) -> Option<PathBuf> {
        Some(self.unit_path())
    }

    fn install(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let unit_path = self.unit_path();
        self.teardown();

        write_file_atomic(&unit_path, render_unit(descriptor, self.scope).as_bytes(), 0o644)?;
        info!("wrote {}", unit_path.display());

        self.require("daemon-reload", &["daemon-reload"])?;

        let verb = if descriptor.auto_start { "enable" } else { "start" };
        let args: Vec<&str> = if descriptor.auto_start {
            vec!["enable", "--now", self.unit.as_str()]
        } else {
            vec!["start", self.unit.as_str()]
        };
        if let Err(e) = self.require(verb, &args) {
            if self.scope == Scope::User {
                warn!("{LINGER_HINT}");
            }
            return Err(e);
        }

        info!("{} enabled and started", self.unit);
        Ok(())
    }

    fn status(&self) -> Result<ServiceStatus> {
        if !self.unit_path().is_file() {
            return Ok(ServiceStatus::NotInstalled);
        }
        let out = self.systemctl(&["is-active", &self.unit])?;
        let state = out.stdout.trim();
        if out.success() && state == "active" {
            Ok(ServiceStatus::Running)
        } else {
            Ok(ServiceStatus::Stopped((!state.is_empty()).then(|| state.to_string())))
        }
    }

    fn start(&self) -> Result<()> {
        self.require("start", &["start", &self.unit]).map(|_| ())
    }

    fn stop(&self) -> Result<()> {
        self.tolerate_absent("stop", &["stop", &self.unit])
    }

    fn restart(&self) -> Result<()> {
        self.require("restart", &["restart", &self.unit]).map(|_| ())
    }

    fn logs(&self, lines: usize, follow: bool) -> Result<()> {
        let lines = lines.to_string();
        let mut args = self.scoped(&["-u", self.unit.as_str(), "-n", lines.as_str(), "--no-pager"]);
        if follow {
            args.push("-f");
        }
        let out = self.runner.run_attached(JOURNALCTL, &args)?;
        log_viewer_result(JOURNALCTL, &out, follow)
    }

    fn uninstall(&self) -> Result<()> {
        self.tolerate_absent("disable", &["disable", "--now", &self.unit])?;
        let unit_path = self.unit_path();
        if remove_if_present(&unit_path)? {
            info!("removed {}", unit_path.display());
            self.require("daemon-reload", &["daemon-reload"])?;
        } else {
            info!("{} is not installed", self.unit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::control::{LogPaths, SERVICE_LABEL};
    use crate::exec::testing::ScriptedRunner;

    fn descriptor(exec: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            label: SERVICE_LABEL.to_string(),
            exec_path: PathBuf::from(exec),
            args: vec!["run".into()],
            working_dir: PathBuf::from("/home/ada"),
            log_paths: LogPaths {
                stdout: PathBuf::from("/home/ada/.femtobot/logs/femtobot.out.log"),
                stderr: PathBuf::from("/home/ada/.femtobot/logs/femtobot.err.log"),
            },
            restart_policy: RestartPolicy::Always,
            auto_start: true,
            env: vec![("RUST_LOG".into(), "info".into())],
        }
    }

    #[test]
    fn unit_targets_the_scope() {
        let user = render_unit(&descriptor("/home/ada/.local/bin/femtobot"), Scope::User);
        assert!(user.contains("ExecStart=/home/ada/.local/bin/femtobot run\n"));
        assert!(user.contains("Restart=always\n"));
        assert!(user.contains("Environment=RUST_LOG=info\n"));
        assert!(user.contains("WantedBy=default.target\n"));

        let system = render_unit(&descriptor("/usr/local/bin/femtobot"), Scope::System);
        assert!(system.contains("WantedBy=multi-user.target\n"));
    }

    #[test]
    fn paths_with_spaces_are_quoted() {
        let unit = render_unit(&descriptor("/home/ada/my bin/femtobot"), Scope::User);
        assert!(unit.contains("ExecStart=\"/home/ada/my bin/femtobot\" run\n"));
    }

    #[test]
    fn install_twice_leaves_one_unit_pointing_at_the_latest_binary() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("systemctl --user disable", 1, "Unit femtobot.service not loaded.");
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");

        systemd.install(&descriptor("/old/femtobot")).unwrap();
        systemd.install(&descriptor("/new/femtobot")).unwrap();

        let units: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(units, vec![std::ffi::OsString::from("femtobot.service")]);
        let unit = fs::read_to_string(dir.path().join("femtobot.service")).unwrap();
        assert!(unit.contains("ExecStart=/new/femtobot run"));
        assert!(!unit.contains("/old/"));

        let calls = runner.calls();
        assert_eq!(
            calls[..3],
            [
                "systemctl --user disable --now femtobot.service",
                "systemctl --user daemon-reload",
                "systemctl --user enable --now femtobot.service",
            ]
        );
        assert_eq!(calls.len(), 6);
    }

    #[test]
    fn enable_failure_is_fatal_and_names_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("systemctl --user enable", 1, "Failed to connect to bus: No medium found");
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");

        match systemd.install(&descriptor("/bin/femtobot")).unwrap_err() {
            DistError::ServiceTool { tool, step, detail } => {
                assert_eq!(tool, "systemctl");
                assert_eq!(step, "enable");
                assert!(detail.contains("Failed to connect to bus"));
            }
            other => panic!("expected service tool error, got {other:?}"),
        }
    }

    #[test]
    fn daemon_reload_failure_stops_before_enable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("systemctl --user daemon-reload", 1, "Access denied");
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");

        assert!(systemd.install(&descriptor("/bin/femtobot")).is_err());
        assert!(!runner.calls().iter().any(|c| c.contains("enable")));
    }

    #[test]
    fn system_scope_drops_the_user_flag() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let systemd = Systemd::with_unit_dir(&runner, Scope::System, dir.path().to_path_buf(), "femtobot");
        systemd.restart().unwrap();
        assert_eq!(runner.calls(), vec!["systemctl restart femtobot.service"]);
    }

    #[test]
    fn status_reports_each_state() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().reply("systemctl --user is-active", "active\n");
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");
        assert_eq!(systemd.status().unwrap(), ServiceStatus::NotInstalled);

        fs::write(dir.path().join("femtobot.service"), "[Unit]\n").unwrap();
        assert_eq!(systemd.status().unwrap(), ServiceStatus::Running);

        let stopped = ScriptedRunner::new().on(
            "systemctl --user is-active",
            CommandOutput {
                status: Some(3),
                stdout: "failed\n".into(),
                stderr: String::new(),
            },
        );
        let systemd = Systemd::with_unit_dir(&stopped, Scope::User, dir.path().to_path_buf(), "femtobot");
        assert_eq!(systemd.status().unwrap(), ServiceStatus::Stopped(Some("failed".into())));
    }

    #[test]
    fn stop_and_uninstall_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .fail("systemctl --user stop", 5, "Failed to stop femtobot.service: Unit femtobot.service not loaded.")
            .fail("systemctl --user disable", 1, "Failed to disable unit: Unit file femtobot.service does not exist.");
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");

        systemd.stop().unwrap();
        systemd.uninstall().unwrap();
        systemd.uninstall().unwrap();
        assert!(!runner.calls().iter().any(|c| c.ends_with("daemon-reload")));
    }

    #[test]
    fn logs_follow_the_journal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");
        systemd.logs(50, true).unwrap();
        assert_eq!(
            runner.calls(),
            vec!["journalctl --user -u femtobot.service -n 50 --no-pager -f"]
        );
    }

    #[test]
    fn interrupted_follow_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let killed = CommandOutput { status: None, ..CommandOutput::default() };
        let runner = ScriptedRunner::new().on("journalctl", killed);
        let systemd = Systemd::with_unit_dir(&runner, Scope::User, dir.path().to_path_buf(), "femtobot");

        systemd.logs(50, true).unwrap();
        assert!(matches!(
            systemd.logs(50, false),
            Err(DistError::ServiceTool { step, .. }) if step == "logs"
        ));
    }
}
