//! Asset naming: the join key between the publisher and the installer.

use crate::platform::{Os, Platform};

pub const CHECKSUM_SUFFIX: &str = ".sha256";
const WINDOWS_SUFFIX: &str = ".exe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Binary,
    Checksum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub platform: Platform,
    pub kind: AssetKind,
}

impl Asset {
    pub fn new(project: &str, platform: Platform, kind: AssetKind) -> Self {
        Self {
            name: asset_name(project, platform, kind),
            platform,
            kind,
        }
    }

    /// Recover the asset a name was generated from, if any.
    pub fn parse(project: &str, name: &str) -> Option<Self> {
        let (stem, kind) = match name.strip_suffix(CHECKSUM_SUFFIX) {
            Some(stem) => (stem, AssetKind::Checksum),
            None => (name, AssetKind::Binary),
        };
        let rest = stem.strip_prefix(project)?.strip_prefix('-')?;
        let tag = rest.strip_suffix(WINDOWS_SUFFIX).unwrap_or(rest);
        let platform: Platform = tag.parse().ok()?;

        let asset = Self::new(project, platform, kind);
        (asset.name == name).then_some(asset)
    }
}

/// `<project>-<os>-<arch>[.exe][.sha256]`
pub fn asset_name(project: &str, platform: Platform, kind: AssetKind) -> String {
    let mut name = format!("{project}-{platform}");
    if platform.os == Os::Windows {
        name.push_str(WINDOWS_SUFFIX);
    }
    if kind == AssetKind::Checksum {
        name.push_str(CHECKSUM_SUFFIX);
    }
    name
}

pub fn checksum_name(binary_name: &str) -> String {
    format!("{binary_name}{CHECKSUM_SUFFIX}")
}
