//! Backend for hosts without a supported service manager. Every operation
//! succeeds after telling the operator what to do by hand.

use std::path::PathBuf;

use log::info;

use super::{ServiceBackend, ServiceDescriptor, ServiceStatus};
use crate::error::Result;
use crate::platform::Platform;

pub struct Unsupported {
    platform: Platform,
}

impl Unsupported {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }

    fn skip(&self, operation: &str) {
        info!("service {operation} skipped: no supported service manager on {}", self.platform);
    }
}

impl ServiceBackend for Unsupported {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn definition_path(&self) -> Option<PathBuf> {
        None
    }

    fn install(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        self.skip("install");
        info!(
            "start it yourself with: {} {}",
            descriptor.exec_path.display(),
            descriptor.args.join(" ")
        );
        Ok(())
    }

    fn status(&self) -> Result<ServiceStatus> {
        Ok(ServiceStatus::NotInstalled)
    }

    fn start(&self) -> Result<()> {
        self.skip("start");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.skip("stop");
        Ok(())
    }

    fn restart(&self) -> Result<()> {
        self.skip("restart");
        Ok(())
    }

    fn logs(&self, _lines: usize, _follow: bool) -> Result<()> {
        self.skip("logs");
        Ok(())
    }

    fn uninstall(&self) -> Result<()> {
        self.skip("uninstall");
        Ok(())
    }
}
