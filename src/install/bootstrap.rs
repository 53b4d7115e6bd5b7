//! Hand-off to the application's own first-run configuration.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::Result;
use crate::exec::CommandRunner;

/// Whatever prepares application configuration after the binary is in place.
pub trait ConfigBootstrap {
    fn bootstrap(&self, binary: &Path) -> Result<()>;
}

/// Runs `<binary> configure` when there is no configuration yet and someone
/// is at the keyboard to answer it.
pub struct CommandBootstrap<R> {
    runner: R,
    config_file: PathBuf,
    interactive: bool,
}

impl<R: CommandRunner> CommandBootstrap<R> {
    pub fn new(runner: R, home: &Path) -> Self {
        Self::with_terminal(runner, home, std::io::stdin().is_terminal())
    }

    pub fn with_terminal(runner: R, home: &Path, interactive: bool) -> Self {
        Self {
            runner,
            config_file: home.join(".femtobot").join("config.json"),
            interactive,
        }
    }
}

impl<R: CommandRunner> ConfigBootstrap for CommandBootstrap<R> {
    fn bootstrap(&self, binary: &Path) -> Result<()> {
        let command = format!("{} configure", binary.display());

        if self.config_file.is_file() {
            info!("using existing configuration at {}", self.config_file.display());
            return Ok(());
        }
        if !self.interactive {
            info!(
                "no configuration at {}; run `{command}` to create one",
                self.config_file.display()
            );
            return Ok(());
        }

        let out = self.runner.run_attached(&binary.to_string_lossy(), &["configure"])?;
        if !out.success() {
            warn!("configuration did not finish ({}); run `{command}` later", out.detail());
        }
        Ok(())
    }
}
