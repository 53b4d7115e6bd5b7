//! Subprocess execution behind a trait, so OS-tool interactions can be
//! scripted in tests instead of spawning real service managers.

use std::process::{Command, Stdio};

use log::debug;

use crate::error::{DistError, Result};

/// Structured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Best diagnostic text: stderr, then stdout, then the exit code.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    /// Heuristic for "the thing you asked about does not exist", which the
    /// idempotent teardown paths treat as success.
    pub fn is_absent(&self) -> bool {
        const MARKERS: &[&str] = &[
            "not loaded",
            "not found",
            "does not exist",
            "no such process",
            "could not find",
            "no such file",
            "not-found",
        ];
        let text = format!("{} {}", self.stderr, self.stdout).to_ascii_lowercase();
        MARKERS.iter().any(|m| text.contains(m))
    }
}

pub trait CommandRunner {
    /// Run to completion, capturing output.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run with the terminal attached (log following). Output is not captured.
    fn run_attached(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }

    fn run_attached(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run_attached(program, args)
    }
}

/// Runs real processes with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| DistError::ToolUnavailable {
                tool: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run_attached(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!("exec (attached): {program} {}", args.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|source| DistError::ToolUnavailable {
                tool: program.to_string(),
                source,
            })?;

        Ok(CommandOutput {
            status: status.code(),
            ..CommandOutput::default()
        })
    }
}
