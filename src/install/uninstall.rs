//! Taking back what the installer put down: the service definition and the
//! installed binary. Configuration and workspace data are left alone.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;

use crate::config::InstallConfig;
use crate::control::ServiceBackend;
use crate::error::{DistError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryRemoval {
    Removed(PathBuf),
    NotFound,
    /// A cargo build output; deleting it is left to the developer.
    SkippedDevBuild(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallReport {
    pub service: &'static str,
    pub binary: BinaryRemoval,
}

/// Remove the service, then the binary.
///
/// The binary is looked for in the install directory first, then at
/// `on_path` (the `PATH` hit for the project name, if any).
pub fn uninstall(
    config: &InstallConfig,
    service: &dyn ServiceBackend,
    on_path: Option<PathBuf>,
) -> Result<UninstallReport> {
    service.uninstall()?;

    let binary = match locate_binary(&[config.binary_path(), on_path.unwrap_or_default()]) {
        None => {
            info!("no installed {} binary found", config.project);
            BinaryRemoval::NotFound
        }
        Some(path) if is_dev_build(&path) => {
            info!("{} is a development build; remove it by hand if you mean to", path.display());
            BinaryRemoval::SkippedDevBuild(path)
        }
        Some(path) => remove_binary(path)?,
    };

    Ok(UninstallReport {
        service: service.name(),
        binary,
    })
}

/// First existing candidate that is not a build output, else the first
/// existing one at all.
fn locate_binary(candidates: &[PathBuf]) -> Option<PathBuf> {
    let existing: Vec<&PathBuf> = candidates
        .iter()
        .filter(|p| !p.as_os_str().is_empty() && p.is_file())
        .collect();
    existing
        .iter()
        .find(|p| !is_dev_build(p))
        .or_else(|| existing.first())
        .map(|p| (*p).clone())
}

fn remove_binary(path: PathBuf) -> Result<BinaryRemoval> {
    match fs::remove_file(&path) {
        Ok(()) => {
            info!("removed {}", path.display());
            Ok(BinaryRemoval::Removed(path))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BinaryRemoval::NotFound),
        Err(e) => Err(DistError::io("failed to remove", path, e)),
    }
}

fn is_dev_build(path: &Path) -> bool {
    let components: Vec<_> = path.components().map(|c| c.as_os_str().to_owned()).collect();
    components
        .windows(2)
        .any(|pair| pair[0] == "target" && (pair[1] == "debug" || pair[1] == "release"))
}
