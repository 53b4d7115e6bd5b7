use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "femtobot release publisher, installer and service manager")]
pub struct Args {
    #[command(subcommand)]
    pub sub: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Publish dist/ artifacts and checksums to the release for VERSION
    Release {
        /// Version to publish, with or without the leading `v`
        version: String,

        /// Release config file (default: ./femtodist.toml if present)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Directory holding the built binaries
        #[arg(long)]
        dist_dir: Option<PathBuf>,

        /// Repository as owner/name
        #[arg(long)]
        repo: Option<String>,

        /// Release body used when the release has to be created
        #[arg(long)]
        notes: Option<String>,
    },
    /// Download, verify and install femtobot (configured by FEMTOBOT_* variables)
    Install,
    /// Remove the femtobot service and the installed binary
    ///
    /// Configuration and workspace data under ~/.femtobot are kept.
    Uninstall {
        /// Remove the system-wide service instead of the per-user one
        #[arg(long)]
        system: bool,
    },
    /// Manage the femtobot background service
    Service {
        #[command(subcommand)]
        action: ServiceCmd,

        /// Use the system-wide service instead of the per-user one
        #[arg(long, global = true)]
        system: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ServiceCmd {
    /// Write the unit/plist and start the service
    Install {
        /// Binary to run (default: ~/.local/bin/femtobot)
        #[arg(long)]
        binary: Option<PathBuf>,
    },
    /// Exit 0 = running, 1 = anything else
    Status,
    Start,
    Stop,
    Restart,
    /// Show service output
    Logs(LogsArgs),
    /// Stop the service and remove its definition
    Uninstall,
}

#[derive(ClapArgs, Debug)]
pub struct LogsArgs {
    #[arg(long, short = 'n', default_value_t = 100)]
    pub lines: usize,

    #[arg(long, short = 'f')]
    pub follow: bool,
}
