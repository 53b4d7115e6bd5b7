//! Host platform classification
//!
//! Raw `uname`-style identifiers are mapped onto a closed set of operating
//! systems and architectures. Anything not recognised becomes `Unknown`;
//! there is no "closest match" guessing.

use std::fmt;
use std::str::FromStr;

use log::debug;

use crate::error::{DistError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    FreeBsd,
    /// Only ever produced by the publisher's asset list; nothing installs on it.
    Windows,
    Unknown,
}

impl Os {
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "linux" => Os::Linux,
            "darwin" | "macos" => Os::Darwin,
            "freebsd" => Os::FreeBsd,
            "windows" => Os::Windows,
            other
                if other.starts_with("mingw")
                    || other.starts_with("msys")
                    || other.starts_with("cygwin") =>
            {
                Os::Windows
            }
            _ => Os::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::FreeBsd => "freebsd",
            Os::Windows => "windows",
            Os::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
    Armv7,
    I686,
    Unknown,
}

impl Arch {
    pub fn from_raw(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "x86_64" | "amd64" | "x64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            "armv7" | "armv7l" | "armhf" => Arch::Armv7,
            "i686" | "i586" | "i386" | "x86" => Arch::I686,
            _ => Arch::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Armv7 => "armv7",
            Arch::I686 => "i686",
            Arch::Unknown => "unknown",
        }
    }
}

/// Canonical (OS, architecture) pair. Rendered as `{os}-{arch}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

/// Which side of the wire is asking. The publisher names more targets than
/// the installer will ever accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Installer,
    Publisher,
}

pub const INSTALLER_PLATFORMS: &[Platform] = &[
    Platform::new(Os::Linux, Arch::X86_64),
    Platform::new(Os::Linux, Arch::Aarch64),
    Platform::new(Os::Linux, Arch::Armv7),
    Platform::new(Os::Darwin, Arch::X86_64),
    Platform::new(Os::Darwin, Arch::Aarch64),
];

pub const PUBLISHER_PLATFORMS: &[Platform] = &[
    Platform::new(Os::Linux, Arch::X86_64),
    Platform::new(Os::Linux, Arch::Aarch64),
    Platform::new(Os::Linux, Arch::Armv7),
    Platform::new(Os::Linux, Arch::I686),
    Platform::new(Os::Darwin, Arch::X86_64),
    Platform::new(Os::Darwin, Arch::Aarch64),
    Platform::new(Os::FreeBsd, Arch::X86_64),
    Platform::new(Os::Windows, Arch::X86_64),
];

impl Side {
    pub fn allowed(self) -> &'static [Platform] {
        match self {
            Side::Installer => INSTALLER_PLATFORMS,
            Side::Publisher => PUBLISHER_PLATFORMS,
        }
    }

    pub fn supports(self, platform: Platform) -> bool {
        platform.is_known() && self.allowed().contains(&platform)
    }

    /// Fail with the full supported set when `platform` is not allowed here.
    pub fn require(self, platform: Platform) -> Result<()> {
        if self.supports(platform) {
            return Ok(());
        }
        Err(DistError::UnsupportedPlatform {
            platform: platform.to_string(),
            supported: self
                .allowed()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

impl Platform {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    pub fn from_raw(os: &str, arch: &str) -> Self {
        Self::new(Os::from_raw(os), Arch::from_raw(arch))
    }

    /// Classify raw identifiers and report whether `side` accepts the result.
    pub fn classify(os: &str, arch: &str, side: Side) -> (Self, bool) {
        let platform = Self::from_raw(os, arch);
        (platform, side.supports(platform))
    }

    pub fn is_known(self) -> bool {
        self.os != Os::Unknown && self.arch != Arch::Unknown
    }

    /// Detect the running host from `uname`, falling back to the compile
    /// target when the syscall is unavailable.
    pub fn detect() -> Self {
        let (os, arch) = match nix::sys::utsname::uname() {
            Ok(uts) => (
                uts.sysname().to_string_lossy().into_owned(),
                uts.machine().to_string_lossy().into_owned(),
            ),
            Err(e) => {
                debug!("uname failed ({e}), using compile-time target");
                (
                    std::env::consts::OS.to_string(),
                    std::env::consts::ARCH.to_string(),
                )
            }
        };
        let platform = Self::from_raw(&os, &arch);
        debug!("host {os}/{arch} classified as {platform}");
        platform
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os.as_str(), self.arch.as_str())
    }
}

impl FromStr for Platform {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self> {
        // Architectures never contain '-', so split from the right.
        let (os, arch) = s
            .rsplit_once('-')
            .ok_or_else(|| DistError::Config(format!("'{s}' is not of the form <os>-<arch>")))?;
        let platform = Self::from_raw(os, arch);
        if !platform.is_known() || platform.to_string() != s {
            return Err(DistError::Config(format!("'{s}' is not a canonical platform tag")));
        }
        Ok(platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_tags_for_supported_hosts() {
        let cases = [
            ("Linux", "x86_64", "linux-x86_64"),
            ("Linux", "amd64", "linux-x86_64"),
            ("Linux", "aarch64", "linux-aarch64"),
            ("Linux", "arm64", "linux-aarch64"),
            ("Linux", "armv7l", "linux-armv7"),
            ("Darwin", "x86_64", "darwin-x86_64"),
            ("Darwin", "arm64", "darwin-aarch64"),
        ];
        for (os, arch, tag) in cases {
            let (platform, supported) = Platform::classify(os, arch, Side::Installer);
            assert_eq!(platform.to_string(), tag);
            assert!(supported, "{os}/{arch} should be installable");
        }
    }

    #[test]
    fn unknown_components_are_never_guessed() {
        let (platform, supported) = Platform::classify("Plan9", "x86_64", Side::Publisher);
        assert_eq!(platform.os, Os::Unknown);
        assert!(!supported);

        let (platform, supported) = Platform::classify("Linux", "riscv64", Side::Publisher);
        assert_eq!(platform.arch, Arch::Unknown);
        assert!(!supported);

        // Bare "arm" could be v6; it is not silently promoted to armv7.
        assert_eq!(Arch::from_raw("arm"), Arch::Unknown);
    }

    #[test]
    fn publisher_allows_more_than_installer() {
        let freebsd = Platform::new(Os::FreeBsd, Arch::X86_64);
        assert!(Side::Publisher.supports(freebsd));
        assert!(!Side::Installer.supports(freebsd));
        for platform in INSTALLER_PLATFORMS {
            assert!(Side::Publisher.supports(*platform));
        }
    }

    #[test]
    fn unsupported_error_lists_supported_set() {
        let err = Side::Installer
            .require(Platform::from_raw("MINGW64_NT-10.0", "x86_64"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("windows-x86_64"));
        for platform in INSTALLER_PLATFORMS {
            assert!(msg.contains(&platform.to_string()));
        }
    }

    #[test]
    fn parse_round_trips_display() {
        for platform in PUBLISHER_PLATFORMS {
            assert_eq!(platform.to_string().parse::<Platform>().unwrap(), *platform);
        }
        assert!("linux".parse::<Platform>().is_err());
        assert!("linux-amd64".parse::<Platform>().is_err());
    }
}
