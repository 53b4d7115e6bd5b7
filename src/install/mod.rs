//! Installer pipeline
//!
//! dependency check -> platform -> base URL -> download -> verify ->
//! chmod -> atomic move -> config bootstrap -> service install.
//! Each step finishes before the next starts and the first failure aborts
//! the run; the scratch directory goes away with the run either way.

mod bootstrap;
mod uninstall;

pub use bootstrap::{CommandBootstrap, ConfigBootstrap};
pub use uninstall::{BinaryRemoval, UninstallReport, uninstall};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::asset::{AssetKind, asset_name};
use crate::checksum::{ChecksumVerifier, Digester, VerificationOutcome};
use crate::config::InstallConfig;
use crate::control::{self, ServiceBackend, ServiceDescriptor};
use crate::download::{Downloader, ScratchDir};
use crate::error::{DistError, Result};
use crate::exec::SystemRunner;
use crate::platform::{Platform, Side};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub platform: Platform,
    pub binary: PathBuf,
    pub verification: VerificationOutcome,
    /// Backend that installed the service, if one was asked to.
    pub service: Option<&'static str>,
}

pub struct Installer<'a> {
    config: &'a InstallConfig,
    platform: Platform,
    downloader: Downloader,
    digester: Option<Digester>,
    bootstrap: &'a dyn ConfigBootstrap,
    service: &'a dyn ServiceBackend,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a InstallConfig,
        platform: Platform,
        downloader: Downloader,
        digester: Option<Digester>,
        bootstrap: &'a dyn ConfigBootstrap,
        service: &'a dyn ServiceBackend,
    ) -> Self {
        Self {
            config,
            platform,
            downloader,
            digester,
            bootstrap,
            service,
        }
    }

    pub async fn run(&self) -> Result<InstallReport> {
        self.downloader.ensure_available()?;
        debug!("transports: {}", self.downloader.transport_names().join(", "));

        Side::Installer.require(self.platform)?;
        info!("platform: {}", self.platform);

        let base_url = self.config.base_url();
        let asset = asset_name(&self.config.project, self.platform, AssetKind::Binary);
        let scratch = ScratchDir::new("femtodist-install.")?;
        let staged = scratch.join(&asset);

        let url = format!("{base_url}/{asset}");
        info!("downloading {url}");
        self.downloader.fetch(&url, &staged).await?;

        let verification = ChecksumVerifier::new(&self.downloader, self.digester.clone())
            .verify(&asset, &staged, &base_url, &scratch)
            .await?;
        if let VerificationOutcome::Mismatch { expected, actual } = &verification {
            return Err(DistError::ChecksumMismatch {
                asset,
                expected: expected.clone(),
                actual: actual.clone(),
            });
        }

        make_executable(&staged)?;
        let binary = self.config.binary_path();
        move_into_place(&staged, &binary)?;
        info!("installed {}", binary.display());

        self.bootstrap.bootstrap(&binary)?;

        let service = if self.config.install_service {
            let descriptor =
                ServiceDescriptor::for_binary(&binary, &self.config.home_dir, self.config.service_env.clone());
            self.service.install(&descriptor)?;
            Some(self.service.name())
        } else {
            info!("FEMTOBOT_NO_SERVICE set; not installing a service");
            None
        };

        Ok(InstallReport {
            platform: self.platform,
            binary,
            verification,
            service,
        })
    }
}

/// Installer wired to the real host: detected platform, probed transports
/// and digest tool, OS service manager.
pub async fn run(config: &InstallConfig) -> Result<InstallReport> {
    let platform = Platform::detect();
    let downloader = Downloader::probe(&config.transports);
    let digester = Digester::select(config.checksum_tool);
    if digester.is_none() {
        warn!("no SHA-256 tool selected ({:?}); downloads will not be verified", config.checksum_tool);
    }

    let bootstrap = CommandBootstrap::new(SystemRunner, &config.home_dir);
    let service = control::for_platform(platform, config.scope, &config.home_dir, SystemRunner);

    Installer::new(config, platform, downloader, digester, &bootstrap, service.as_ref())
        .run()
        .await
}

fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .map_err(|e| DistError::io("failed to mark executable", path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Rename into place; across filesystems, copy into a temp file beside
/// `dest` and rename that instead.
fn move_into_place(staged: &Path, dest: &Path) -> Result<()> {
    let dir = dest
        .parent()
        .ok_or_else(|| DistError::Config(format!("{} has no parent directory", dest.display())))?;
    fs::create_dir_all(dir).map_err(|e| DistError::io("failed to create install directory", dir, e))?;

    match fs::rename(staged, dest) {
        Ok(()) => return Ok(()),
        Err(e) => debug!("rename {} -> {} failed ({e}); copying", staged.display(), dest.display()),
    }

    let mut temp = tempfile::Builder::new()
        .prefix(".femtodist.")
        .tempfile_in(dir)
        .map_err(|e| DistError::io("failed to create temp file in", dir, e))?;
    let mut source = fs::File::open(staged).map_err(|e| DistError::io("failed to open", staged, e))?;
    io::copy(&mut source, temp.as_file_mut()).map_err(|e| DistError::io("failed to copy into", temp.path(), e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| DistError::io("failed to sync", temp.path(), e))?;
    make_executable(temp.path())?;

    temp.persist(dest)
        .map_err(|e| DistError::io("failed to move binary into place at", dest, e.error))?;
    Ok(())
}
