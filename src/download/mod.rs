//! Asset download with transport fallback
//!
//! ## Module Organization
//!
//! - `transport` - native / curl / wget transports with plain and strict variants
//! - `scratch` - run-scoped temporary directory

mod scratch;
mod transport;

pub use scratch::ScratchDir;
pub use transport::{DEFAULT_TRANSPORTS, Strictness, Transport, TransportKind};

use std::path::Path;

use log::{debug, info};

use crate::error::{DistError, Result};

/// Fetches URLs by walking the transports in order, plain before strict,
/// until one succeeds.
#[derive(Debug)]
pub struct Downloader {
    transports: Vec<Transport>,
}

impl Downloader {
    /// Keep only the requested transports that are usable on this host.
    pub fn probe(kinds: &[TransportKind]) -> Self {
        let transports: Vec<Transport> = kinds.iter().filter_map(|k| Transport::probe(*k)).collect();
        debug!(
            "available transports: {}",
            transports.iter().map(Transport::name).collect::<Vec<_>>().join(", ")
        );
        Self { transports }
    }

    pub fn with_transports(transports: Vec<Transport>) -> Self {
        Self { transports }
    }

    pub fn transport_names(&self) -> Vec<&'static str> {
        self.transports.iter().map(Transport::name).collect()
    }

    /// Dependency check: at least one transport must exist.
    pub fn ensure_available(&self) -> Result<()> {
        if self.transports.is_empty() {
            return Err(DistError::Precondition(
                "no download transport available (install curl or wget, or enable the native client)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Download `url` to `dest`. On failure nothing is left at `dest`.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.ensure_available()?;
        let mut attempts = Vec::new();

        for transport in &self.transports {
            for strictness in [Strictness::Plain, Strictness::Strict] {
                match transport.fetch(url, dest, strictness).await {
                    Ok(()) if dest.is_file() => {
                        info!("fetched {url} via {}", transport.name());
                        return Ok(());
                    }
                    Ok(()) => attempts.push(format!(
                        "{} ({strictness:?}): reported success but {} is missing",
                        transport.name(),
                        dest.display()
                    )),
                    Err(e) => {
                        debug!("{} ({strictness:?}) failed for {url}: {e}", transport.name());
                        attempts.push(format!("{} ({strictness:?}): {e}", transport.name()));
                    }
                }
                // Never leave a partial file behind for the next attempt or the caller.
                let _ = std::fs::remove_file(dest);
            }
        }

        Err(DistError::Fetch {
            url: url.to_string(),
            attempts,
        })
    }
}
