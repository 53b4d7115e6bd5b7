//! SHA-256 sidecar generation and verification.
//!
//! Sidecar format is the `sha256sum` one: the first whitespace-delimited
//! token of the first line is the lowercase hex digest, the rest (filename)
//! is ignored on read.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::asset::checksum_name;
use crate::download::{Downloader, ScratchDir};
use crate::error::{DistError, Result};
use crate::exec::{CommandRunner, SystemRunner};

const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumRecord {
    pub algorithm: Algorithm,
    pub digest: String,
    pub subject_asset_name: String,
}

impl ChecksumRecord {
    pub fn new(subject_asset_name: &str, digest: String) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            digest,
            subject_asset_name: subject_asset_name.to_string(),
        }
    }

    /// Parse sidecar text. Empty or non-hex content is an error.
    pub fn parse(subject_asset_name: &str, text: &str) -> Result<Self> {
        let malformed = |reason: &str| DistError::MalformedChecksum {
            source_name: checksum_name(subject_asset_name),
            reason: reason.to_string(),
        };

        let first_line = text.lines().next().unwrap_or_default();
        let digest = first_line
            .split_whitespace()
            .next()
            .ok_or_else(|| malformed("file is empty"))?;

        if digest.len() != SHA256_HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(malformed(&format!("'{digest}' is not a SHA-256 hex digest")));
        }
        Ok(Self::new(subject_asset_name, digest.to_string()))
    }

    pub fn render(&self) -> String {
        format!("{}  {}\n", self.digest, self.subject_asset_name)
    }
}

/// Hash a file in-process.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| DistError::io("failed to open", path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| DistError::io("failed to read", path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Write `<binary>.sha256` next to `binary` and return its path and record.
pub fn write_sidecar(binary: &Path, asset_name: &str) -> Result<(PathBuf, ChecksumRecord)> {
    let record = ChecksumRecord::new(asset_name, sha256_file(binary)?);
    let sidecar = binary.with_file_name(checksum_name(asset_name));
    fs::write(&sidecar, record.render()).map_err(|e| DistError::io("failed to write", &sidecar, e))?;
    debug!("wrote {} ({})", sidecar.display(), record.digest);
    Ok((sidecar, record))
}

/// Which digesting tool the installer should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestPreference {
    #[default]
    Auto,
    Builtin,
    Sha256sum,
    Shasum,
    None,
}

impl FromStr for DigestPreference {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "builtin" => Ok(Self::Builtin),
            "sha256sum" => Ok(Self::Sha256sum),
            "shasum" => Ok(Self::Shasum),
            "none" | "off" => Ok(Self::None),
            other => Err(DistError::Config(format!(
                "unknown checksum tool '{other}' (expected auto, builtin, sha256sum, shasum or none)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Digester {
    Builtin,
    External { program: PathBuf, args: Vec<String> },
}

impl Digester {
    /// Capability probe. `None` means no tool is usable.
    pub fn select(preference: DigestPreference) -> Option<Self> {
        let external = |name: &str, args: &[&str]| {
            which::which(name).ok().map(|program| Digester::External {
                program,
                args: args.iter().map(ToString::to_string).collect(),
            })
        };
        match preference {
            DigestPreference::Auto | DigestPreference::Builtin => Some(Digester::Builtin),
            DigestPreference::Sha256sum => external("sha256sum", &[]),
            DigestPreference::Shasum => external("shasum", &["-a", "256"]),
            DigestPreference::None => None,
        }
    }

    pub fn digest_file(&self, path: &Path) -> Result<String> {
        match self {
            Digester::Builtin => sha256_file(path),
            Digester::External { program, args } => {
                let program_str = program.to_string_lossy();
                let path_str = path.to_string_lossy();
                let mut argv: Vec<&str> = args.iter().map(String::as_str).collect();
                argv.push(&path_str);

                let out = SystemRunner.run(&program_str, &argv)?;
                let failed = |detail: String| DistError::DigestTool {
                    tool: program_str.to_string(),
                    path: path.to_path_buf(),
                    detail,
                };
                if !out.success() {
                    return Err(failed(out.detail()));
                }
                out.stdout
                    .split_whitespace()
                    .next()
                    .map(str::to_string)
                    .ok_or_else(|| failed("no digest in output".to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    SkippedNoChecksumAvailable,
    SkippedNoToolAvailable,
    Mismatch { expected: String, actual: String },
}

pub struct ChecksumVerifier<'a> {
    downloader: &'a Downloader,
    digester: Option<Digester>,
}

impl<'a> ChecksumVerifier<'a> {
    pub fn new(downloader: &'a Downloader, digester: Option<Digester>) -> Self {
        Self { downloader, digester }
    }

    /// Verify `local_file` against `<base_url>/<asset_name>.sha256`.
    ///
    /// A missing sidecar or missing tool is a skip, not an error; a sidecar
    /// that exists but cannot be parsed is an error.
    pub async fn verify(
        &self,
        asset_name: &str,
        local_file: &Path,
        base_url: &str,
        scratch: &ScratchDir,
    ) -> Result<VerificationOutcome> {
        let sidecar_name = checksum_name(asset_name);
        let url = format!("{}/{sidecar_name}", base_url.trim_end_matches('/'));
        let sidecar_path = scratch.join(&sidecar_name);

        if let Err(e) = self.downloader.fetch(&url, &sidecar_path).await {
            warn!("no checksum available for {asset_name} ({e}); continuing without verification");
            return Ok(VerificationOutcome::SkippedNoChecksumAvailable);
        }

        let text = fs::read_to_string(&sidecar_path)
            .map_err(|e| DistError::io("failed to read", &sidecar_path, e))?;
        let expected = ChecksumRecord::parse(asset_name, &text)?;

        let Some(digester) = &self.digester else {
            warn!("no SHA-256 tool available; skipping verification of {asset_name}");
            return Ok(VerificationOutcome::SkippedNoToolAvailable);
        };

        let actual = digester.digest_file(local_file)?;
        if actual == expected.digest {
            info!("checksum verified for {asset_name}");
            Ok(VerificationOutcome::Verified)
        } else {
            Ok(VerificationOutcome::Mismatch {
                expected: expected.digest,
                actual,
            })
        }
    }
}
