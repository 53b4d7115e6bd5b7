//! launchd backend (`launchctl`).
//!
//! User scope installs a LaunchAgent into `~/Library/LaunchAgents` under the
//! `gui/<uid>` domain; system scope installs a LaunchDaemon into
//! `/Library/LaunchDaemons` under `system`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use plist::{Dictionary, Value};

use super::files::{remove_if_present, write_file_atomic};
use super::{log_viewer_result, RestartPolicy, ServiceBackend, ServiceDescriptor, ServiceStatus};
use crate::config::Scope;
use crate::error::{DistError, Result};
use crate::exec::{CommandOutput, CommandRunner};

const LAUNCHCTL: &str = "launchctl";

/// `bootout` returns before the job is gone; a `bootstrap` issued meanwhile
/// fails with "5: Input/output error".
const UNLOAD_POLLS: u32 = 20;
const UNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(250);

const GUI_SESSION_HINT: &str = "per-user agents live in the gui/<uid> domain, which only exists \
while you are logged in at the console. From an SSH session, log in on the Mac once or install \
system-wide with `femtodist service install --system`";

pub fn launchd_label(label: &str) -> String {
    format!("io.{label}.agent")
}

pub struct Launchd<R> {
    runner: R,
    scope: Scope,
    plist_dir: PathBuf,
    domain: String,
    label: String,
    unload_poll: Duration,
}

impl<R: CommandRunner> Launchd<R> {
    pub fn new(runner: R, scope: Scope, home: &Path, label: &str) -> Self {
        let (plist_dir, domain) = match scope {
            Scope::User => (
                home.join("Library").join("LaunchAgents"),
                format!("gui/{}", nix::unistd::getuid().as_raw()),
            ),
            Scope::System => (PathBuf::from("/Library/LaunchDaemons"), "system".to_string()),
        };
        Self::with_paths(runner, scope, plist_dir, domain, label)
    }

    pub fn with_paths(runner: R, scope: Scope, plist_dir: PathBuf, domain: String, label: &str) -> Self {
        Self {
            runner,
            scope,
            plist_dir,
            domain,
            label: launchd_label(label),
            unload_poll: UNLOAD_POLL_INTERVAL,
        }
    }

    pub fn with_unload_poll(mut self, interval: Duration) -> Self {
        self.unload_poll = interval;
        self
    }

    fn plist_path(&self) -> PathBuf {
        self.plist_dir.join(format!("{}.plist", self.label))
    }

    /// `<domain>/<label>`, the service target most subcommands take.
    fn target(&self) -> String {
        format!("{}/{}", self.domain, self.label)
    }

    fn launchctl(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(LAUNCHCTL, args)
    }

    fn require(&self, step: &str, args: &[&str]) -> Result<CommandOutput> {
        let out = self.launchctl(args)?;
        if !out.success() {
            if self.scope == Scope::User && matches!(step, "bootstrap" | "kickstart") {
                warn!("{GUI_SESSION_HINT}");
            }
            return Err(DistError::ServiceTool {
                tool: LAUNCHCTL.to_string(),
                step: step.to_string(),
                detail: out.detail(),
            });
        }
        Ok(out)
    }

    fn bootout(&self) -> Result<CommandOutput> {
        self.launchctl(&["bootout", &self.target()])
    }

    fn is_loaded(&self) -> Result<bool> {
        Ok(self.launchctl(&["print", &self.target()])?.success())
    }

    fn wait_until_unloaded(&self) -> Result<()> {
        for _ in 0..UNLOAD_POLLS {
            if !self.is_loaded()? {
                return Ok(());
            }
            std::thread::sleep(self.unload_poll);
        }
        warn!("{} is still loaded after bootout; continuing anyway", self.target());
        Ok(())
    }

    fn bootstrap(&self) -> Result<()> {
        let plist = self.plist_path().to_string_lossy().into_owned();
        self.require("bootstrap", &["bootstrap", self.domain.as_str(), plist.as_str()])?;
        Ok(())
    }

    /// `(stdout, stderr)` log paths recorded in the installed plist.
    fn installed_log_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let path = self.plist_path();
        if !path.is_file() {
            return Err(DistError::Precondition(format!(
                "service is not installed ({} missing)",
                path.display()
            )));
        }
        let value = Value::from_file(&path).map_err(|e| DistError::Config(format!("{}: {e}", path.display())))?;
        let dict = value
            .as_dictionary()
            .ok_or_else(|| DistError::Config(format!("{}: not a dictionary", path.display())))?;
        let get = |key: &str| {
            dict.get(key)
                .and_then(Value::as_string)
                .map(PathBuf::from)
                .ok_or_else(|| DistError::Config(format!("{}: missing {key}", path.display())))
        };
        Ok((get("StandardOutPath")?, get("StandardErrorPath")?))
    }
}

pub(crate) fn render_plist(descriptor: &ServiceDescriptor) -> Result<Vec<u8>> {
    let mut plist = Dictionary::new();

    plist.insert("Label".to_string(), Value::String(launchd_label(&descriptor.label)));

    let mut program_args = vec![Value::String(descriptor.exec_path.to_string_lossy().into_owned())];
    program_args.extend(descriptor.args.iter().map(|a| Value::String(a.clone())));
    plist.insert("ProgramArguments".to_string(), Value::Array(program_args));

    plist.insert(
        "WorkingDirectory".to_string(),
        Value::String(descriptor.working_dir.to_string_lossy().into_owned()),
    );

    if !descriptor.env.is_empty() {
        let env: Dictionary = descriptor
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        plist.insert("EnvironmentVariables".to_string(), Value::Dictionary(env));
    }

    plist.insert("RunAtLoad".to_string(), Value::Boolean(descriptor.auto_start));
    let keep_alive = match descriptor.restart_policy {
        RestartPolicy::Always => true,
    };
    plist.insert("KeepAlive".to_string(), Value::Boolean(keep_alive));
    plist.insert("ProcessType".to_string(), Value::String("Background".to_string()));

    plist.insert(
        "StandardOutPath".to_string(),
        Value::String(descriptor.log_paths.stdout.to_string_lossy().into_owned()),
    );
    plist.insert(
        "StandardErrorPath".to_string(),
        Value::String(descriptor.log_paths.stderr.to_string_lossy().into_owned()),
    );

    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &Value::Dictionary(plist))
        .map_err(|e| DistError::Config(format!("failed to render plist: {e}")))?;
    Ok(buf)
}

impl<R: CommandRunner> ServiceBackend for Launchd<R> {
    fn name(&self) -> &'static str {
        "launchd"
    }

    fn definition_path(&self) -> Option<PathBuf> {
        Some(self.plist_path())
    }

    fn install(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        match self.bootout() {
            Ok(out) if out.success() => self.wait_until_unloaded()?,
            Ok(out) if out.is_absent() => {}
            Ok(out) => warn!("ignoring failure to unload previous {}: {}", self.label, out.detail()),
            Err(e) => warn!("ignoring failure to unload previous {}: {e}", self.label),
        }

        for log in [&descriptor.log_paths.stdout, &descriptor.log_paths.stderr] {
            if let Some(dir) = log.parent() {
                fs::create_dir_all(dir).map_err(|e| DistError::io("failed to create log directory", dir, e))?;
            }
        }

        let plist_path = self.plist_path();
        write_file_atomic(&plist_path, &render_plist(descriptor)?, 0o644)?;
        info!("wrote {}", plist_path.display());

        self.bootstrap()?;
        self.require("kickstart", &["kickstart", "-k", &self.target()])?;

        info!("{} loaded into {}", self.label, self.domain);
        Ok(())
    }

    fn status(&self) -> Result<ServiceStatus> {
        if !self.plist_path().is_file() {
            return Ok(ServiceStatus::NotInstalled);
        }
        let out = self.launchctl(&["print", &self.target()])?;
        if !out.success() {
            return Ok(ServiceStatus::Stopped(Some("not loaded".to_string())));
        }

        let state = out
            .stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix("state = "))
            .next()
            .map(str::trim);
        match state {
            Some("running") => Ok(ServiceStatus::Running),
            other => Ok(ServiceStatus::Stopped(other.map(str::to_string))),
        }
    }

    fn start(&self) -> Result<()> {
        if !self.is_loaded()? {
            self.bootstrap()?;
        }
        self.require("kickstart", &["kickstart", &self.target()]).map(|_| ())
    }

    fn stop(&self) -> Result<()> {
        let out = self.bootout()?;
        if out.success() {
            return self.wait_until_unloaded();
        }
        if out.is_absent() {
            return Ok(());
        }
        Err(DistError::ServiceTool {
            tool: LAUNCHCTL.to_string(),
            step: "bootout".to_string(),
            detail: out.detail(),
        })
    }

    fn restart(&self) -> Result<()> {
        let out = self.launchctl(&["kickstart", "-k", &self.target()])?;
        if out.success() {
            return Ok(());
        }
        if out.is_absent() {
            // Stopped via bootout, so it has to be loaded again.
            return self.start();
        }
        Err(DistError::ServiceTool {
            tool: LAUNCHCTL.to_string(),
            step: "kickstart".to_string(),
            detail: out.detail(),
        })
    }

    fn logs(&self, lines: usize, follow: bool) -> Result<()> {
        let (stdout, stderr) = self.installed_log_paths()?;
        let lines = lines.to_string();
        let stdout = stdout.to_string_lossy().into_owned();
        let stderr = stderr.to_string_lossy().into_owned();

        let mut args = vec!["-n", lines.as_str()];
        if follow {
            args.push("-F");
        }
        args.push(stdout.as_str());
        args.push(stderr.as_str());

        let out = self.runner.run_attached("tail", &args)?;
        log_viewer_result("tail", &out, follow)
    }

    fn uninstall(&self) -> Result<()> {
        self.stop()?;
        let plist_path = self.plist_path();
        if remove_if_present(&plist_path)? {
            info!("removed {}", plist_path.display());
        } else {
            info!("{} is not installed", self.label);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{LogPaths, SERVICE_LABEL};
    use crate::exec::testing::ScriptedRunner;

    fn descriptor(home: &Path, exec: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            label: SERVICE_LABEL.to_string(),
            exec_path: PathBuf::from(exec),
            args: vec!["run".into()],
            working_dir: home.to_path_buf(),
            log_paths: LogPaths {
                stdout: home.join("logs/femtobot.out.log"),
                stderr: home.join("logs/femtobot.err.log"),
            },
            restart_policy: RestartPolicy::Always,
            auto_start: true,
            env: vec![("FEMTOBOT_DATA_DIR".into(), "/data".into())],
        }
    }

    fn agent<'a>(runner: &'a ScriptedRunner, dir: &Path) -> Launchd<&'a ScriptedRunner> {
        Launchd::with_paths(runner, Scope::User, dir.join("LaunchAgents"), "gui/501".into(), "femtobot")
            .with_unload_poll(Duration::ZERO)
    }

    #[test]
    fn plist_carries_the_descriptor() {
        let home = Path::new("/Users/ada");
        let xml = render_plist(&descriptor(home, "/Users/ada/.local/bin/femtobot")).unwrap();
        let value = Value::from_reader_xml(xml.as_slice()).unwrap();
        let dict = value.as_dictionary().unwrap();

        assert_eq!(dict.get("Label").and_then(Value::as_string), Some("io.femtobot.agent"));
        let args: Vec<_> = dict
            .get("ProgramArguments")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(Value::as_string)
            .collect();
        assert_eq!(args, vec!["/Users/ada/.local/bin/femtobot", "run"]);
        assert_eq!(dict.get("KeepAlive").and_then(Value::as_boolean), Some(true));
        assert_eq!(dict.get("RunAtLoad").and_then(Value::as_boolean), Some(true));
        assert_eq!(
            dict.get("EnvironmentVariables")
                .and_then(Value::as_dictionary)
                .and_then(|env| env.get("FEMTOBOT_DATA_DIR"))
                .and_then(Value::as_string),
            Some("/data")
        );
    }

    #[test]
    fn install_twice_rewrites_a_single_plist() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("launchctl bootout", 3, "Boot-out failed: 3: No such process");
        let launchd = agent(&runner, dir.path());

        launchd.install(&descriptor(dir.path(), "/old/femtobot")).unwrap();
        launchd.install(&descriptor(dir.path(), "/new/femtobot")).unwrap();

        let plists: Vec<_> = fs::read_dir(dir.path().join("LaunchAgents")).unwrap().collect();
        assert_eq!(plists.len(), 1);
        let text = fs::read_to_string(launchd.plist_path()).unwrap();
        assert!(text.contains("/new/femtobot"));
        assert!(!text.contains("/old/femtobot"));
        assert!(dir.path().join("logs").is_dir());

        let plist = launchd.plist_path();
        let calls = runner.calls();
        assert_eq!(
            calls[..3],
            [
                "launchctl bootout gui/501/io.femtobot.agent".to_string(),
                format!("launchctl bootstrap gui/501 {}", plist.display()),
                "launchctl kickstart -k gui/501/io.femtobot.agent".to_string(),
            ]
        );
    }

    #[test]
    fn reinstall_waits_for_the_old_agent_to_unload() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .once("launchctl print", CommandOutput { status: Some(0), ..CommandOutput::default() })
            .once("launchctl print", CommandOutput { status: Some(0), ..CommandOutput::default() })
            .fail("launchctl print", 113, "Could not find service \"io.femtobot.agent\" in domain");
        let launchd = agent(&runner, dir.path());

        launchd.install(&descriptor(dir.path(), "/bin/femtobot")).unwrap();

        let target = "gui/501/io.femtobot.agent";
        assert_eq!(
            runner.calls(),
            [
                format!("launchctl bootout {target}"),
                format!("launchctl print {target}"),
                format!("launchctl print {target}"),
                format!("launchctl print {target}"),
                format!("launchctl bootstrap gui/501 {}", launchd.plist_path().display()),
                format!("launchctl kickstart -k {target}"),
            ]
        );
    }

    #[test]
    fn stuck_unload_still_attempts_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let launchd = agent(&runner, dir.path());

        launchd.install(&descriptor(dir.path(), "/bin/femtobot")).unwrap();

        let calls = runner.calls();
        let polls = calls.iter().filter(|c| c.starts_with("launchctl print")).count();
        assert_eq!(polls, UNLOAD_POLLS as usize);
        assert!(calls.iter().any(|c| c.starts_with("launchctl bootstrap")));
    }

    #[test]
    fn bootstrap_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("launchctl bootstrap", 5, "Bootstrap failed: 5: Input/output error");
        let launchd = agent(&runner, dir.path());

        let err = launchd.install(&descriptor(dir.path(), "/bin/femtobot")).unwrap_err();
        assert!(err.to_string().contains("Input/output error"));
        assert!(!runner.calls().iter().any(|c| c.contains("kickstart")));
    }

    #[test]
    fn status_parses_launchctl_print() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().reply(
            "launchctl print",
            "gui/501/io.femtobot.agent = {\n\tactive count = 1\n\tstate = running\n\tpid = 4242\n}\n",
        );
        let launchd = agent(&runner, dir.path());
        assert_eq!(launchd.status().unwrap(), ServiceStatus::NotInstalled);

        fs::create_dir_all(dir.path().join("LaunchAgents")).unwrap();
        fs::write(launchd.plist_path(), "<plist/>").unwrap();
        assert_eq!(launchd.status().unwrap(), ServiceStatus::Running);

        let unloaded = ScriptedRunner::new().fail("launchctl print", 113, "Could not find service");
        let launchd = agent(&unloaded, dir.path());
        assert_eq!(
            launchd.status().unwrap(),
            ServiceStatus::Stopped(Some("not loaded".into()))
        );
    }

    #[test]
    fn restart_after_stop_loads_again() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .fail("launchctl kickstart -k", 113, "Could not find service \"io.femtobot.agent\" in domain")
            .fail("launchctl print", 113, "Could not find service");
        let launchd = agent(&runner, dir.path());

        launchd.restart().unwrap();
        let calls = runner.calls();
        assert!(calls.iter().any(|c| c.starts_with("launchctl bootstrap gui/501 ")));
        assert_eq!(calls.last().unwrap(), "launchctl kickstart gui/501/io.femtobot.agent");
    }

    #[test]
    fn uninstall_of_absent_agent_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new().fail("launchctl bootout", 3, "Boot-out failed: 3: No such process");
        let launchd = agent(&runner, dir.path());
        launchd.uninstall().unwrap();
        launchd.uninstall().unwrap();
    }

    #[test]
    fn logs_tail_the_paths_in_the_plist() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        let launchd = agent(&runner, dir.path());
        assert!(matches!(launchd.logs(20, false), Err(DistError::Precondition(_))));

        launchd.install(&descriptor(dir.path(), "/bin/femtobot")).unwrap();
        launchd.logs(20, true).unwrap();

        let out = dir.path().join("logs/femtobot.out.log");
        let err = dir.path().join("logs/femtobot.err.log");
        assert_eq!(
            runner.calls().last().unwrap(),
            &format!("tail -n 20 -F {} {}", out.display(), err.display())
        );
    }
}
