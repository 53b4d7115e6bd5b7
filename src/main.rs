mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use femtodist::config::{InstallConfig, ReleaseConfig, Scope};
use femtodist::control::{self, ServiceDescriptor, passthrough_env};
use femtodist::exec::SystemRunner;
use femtodist::install::BinaryRemoval;
use femtodist::platform::Platform;
use femtodist::shutdown::Shutdown;
use femtodist::{install, release};

use cli::{Cmd, ServiceCmd};

fn main() {
    env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    // Losing the race drops `real_main`, and with it any scratch directory.
    let code = rt.block_on(async {
        let mut shutdown = match Shutdown::listen() {
            Ok(shutdown) => shutdown,
            Err(e) => {
                error!("failed to install signal handlers: {e}");
                return 1;
            }
        };
        tokio::select! {
            biased;
            result = real_main() => match result {
                Ok(code) => code,
                Err(e) => {
                    error!("{e:#}");
                    1
                }
            },
            sig = shutdown.recv() => {
                warn!("received {sig}; stopping");
                sig.exit_code()
            }
        }
    });
    // Does not wait for a service tool still running on a blocking thread.
    rt.shutdown_background();
    std::process::exit(code);
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine the home directory (is HOME set?)")
}

async fn real_main() -> Result<i32> {
    let args = cli::Args::parse();

    match args.sub {
        Cmd::Release {
            version,
            config,
            dist_dir,
            repo,
            notes,
        } => {
            let mut cfg = ReleaseConfig::load(config.as_deref(), env_var)?;
            if let Some(dist_dir) = dist_dir {
                cfg.dist_dir = dist_dir;
            }
            if let Some(repo) = repo {
                cfg.repo = repo;
            }
            if notes.is_some() {
                cfg.notes = notes;
            }
            release::run(&cfg, &version).await?;
            Ok(0)
        }
        Cmd::Install => {
            let cfg = InstallConfig::from_env(home_dir()?, env_var)?;
            let report = install::run(&cfg).await?;
            info!(
                "femtobot installed at {} for {}",
                report.binary.display(),
                report.platform
            );
            Ok(0)
        }
        // Off the runtime thread, so signals are still seen while a service
        // tool (say `tail -F`) holds on.
        Cmd::Uninstall { system } => tokio::task::spawn_blocking(move || handle_uninstall(system)).await?,
        Cmd::Service { action, system } => {
            tokio::task::spawn_blocking(move || handle_service(action, system)).await?
        }
    }
}

fn handle_uninstall(system: bool) -> Result<i32> {
    let home = home_dir()?;
    let cfg = InstallConfig::from_env(home.clone(), env_var)?;
    let scope = if system { Scope::System } else { cfg.scope };
    let backend = control::for_platform(Platform::detect(), scope, &home, SystemRunner);
    let report = install::uninstall(&cfg, backend.as_ref(), which::which(&cfg.project).ok())?;
    match report.binary {
        BinaryRemoval::Removed(path) => println!("removed {}", path.display()),
        BinaryRemoval::NotFound => println!("no femtobot binary found"),
        BinaryRemoval::SkippedDevBuild(path) => println!("left development build {}", path.display()),
    }
    println!("femtobot uninstalled; configuration in ~/.femtobot was kept");
    Ok(0)
}

fn handle_service(action: ServiceCmd, system: bool) -> Result<i32> {
    let home = home_dir()?;
    let cfg = InstallConfig::from_env(home.clone(), env_var)?;
    let scope = if system { Scope::System } else { cfg.scope };
    let backend = control::for_platform(Platform::detect(), scope, &home, SystemRunner);

    match action {
        ServiceCmd::Install { binary } => {
            let binary = match binary {
                Some(path) if path.is_relative() => std::env::current_dir()
                    .context("could not resolve the current directory")?
                    .join(path),
                Some(path) => path,
                None => cfg.binary_path(),
            };
            if !binary.is_file() {
                anyhow::bail!("no femtobot binary at {}", binary.display());
            }
            let descriptor = ServiceDescriptor::for_binary(&binary, &home, passthrough_env(env_var));
            backend.install(&descriptor)?;
            match backend.definition_path() {
                Some(path) => println!("femtobot service installed ({})", path.display()),
                None => println!("femtobot service not managed on this platform"),
            }
        }
        ServiceCmd::Status => {
            let status = backend.status()?;
            println!("femtobot is {status}");
            return Ok(if status.is_running() { 0 } else { 1 });
        }
        ServiceCmd::Start => {
            backend.start()?;
            println!("femtobot started");
        }
        ServiceCmd::Stop => {
            backend.stop()?;
            println!("femtobot stopped");
        }
        ServiceCmd::Restart => {
            backend.restart()?;
            println!("femtobot restarted");
        }
        ServiceCmd::Logs(logs) => backend.logs(logs.lines, logs.follow)?,
        ServiceCmd::Uninstall => {
            backend.uninstall()?;
            println!("femtobot service removed");
        }
    }
    Ok(0)
}
