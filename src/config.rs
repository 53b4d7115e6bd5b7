//! Run configuration, built once at startup and passed down.
//!
//! Nothing below reads process state directly: environment access goes
//! through a lookup closure so tests can supply their own.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::Deserialize;

use crate::checksum::DigestPreference;
use crate::control::passthrough_env;
use crate::download::{DEFAULT_TRANSPORTS, TransportKind};
use crate::error::{DistError, Result};
use crate::release::JsonMode;

pub const PROJECT: &str = "femtobot";
pub const DEFAULT_REPO: &str = "femtobot/femtobot";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_RELEASE_FILE: &str = "femtodist.toml";
const LATEST: &str = "latest";

/// Service scope: per-user (default) or system-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    User,
    System,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::User => "user",
            Scope::System => "system",
        }
    }
}

impl FromStr for Scope {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "user" => Ok(Scope::User),
            "system" => Ok(Scope::System),
            other => Err(DistError::Config(format!("unknown service scope '{other}' (expected user or system)"))),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Installer configuration, sourced from `FEMTOBOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallConfig {
    pub project: String,
    /// `latest` or an explicit version.
    pub version: String,
    pub install_dir: PathBuf,
    pub repo: String,
    /// Replaces `https://github.com/<repo>/releases` (mirrors, tests).
    pub download_base: Option<String>,
    pub checksum_tool: DigestPreference,
    pub transports: Vec<TransportKind>,
    pub install_service: bool,
    pub scope: Scope,
    pub home_dir: PathBuf,
    /// Copied into the service definition.
    pub service_env: Vec<(String, String)>,
}

impl InstallConfig {
    pub fn from_env(home_dir: PathBuf, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| non_empty(lookup(key));

        let install_dir = get("FEMTOBOT_INSTALL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join(".local").join("bin"));

        let transports = match get("FEMTOBOT_TRANSPORTS") {
            Some(list) => list
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(TransportKind::from_str)
                .collect::<Result<Vec<_>>>()?,
            None => DEFAULT_TRANSPORTS.to_vec(),
        };

        let config = Self {
            project: PROJECT.to_string(),
            version: get("FEMTOBOT_VERSION").unwrap_or_else(|| LATEST.to_string()),
            install_dir,
            repo: get("FEMTOBOT_REPO").unwrap_or_else(|| DEFAULT_REPO.to_string()),
            download_base: get("FEMTOBOT_DOWNLOAD_BASE"),
            checksum_tool: get("FEMTOBOT_CHECKSUM_TOOL")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            transports,
            install_service: !get("FEMTOBOT_NO_SERVICE").is_some_and(|v| truthy(&v)),
            scope: get("FEMTOBOT_SERVICE_SCOPE")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or_default(),
            home_dir,
            service_env: passthrough_env(&lookup),
        };
        debug!("install config: {config:?}");
        Ok(config)
    }

    /// `<root>/latest/download` for the alias, `<root>/download/v<version>` otherwise.
    pub fn base_url(&self) -> String {
        let root = self
            .download_base
            .clone()
            .unwrap_or_else(|| format!("https://github.com/{}/releases", self.repo));
        let root = root.trim_end_matches('/');

        if self.version == LATEST {
            format!("{root}/latest/download")
        } else {
            let version = self.version.strip_prefix('v').unwrap_or(&self.version);
            format!("{root}/download/v{version}")
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(&self.project)
    }
}

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseConfig {
    pub project: String,
    pub repo: String,
    pub api_base: String,
    pub dist_dir: PathBuf,
    pub notes: Option<String>,
    pub json_mode: JsonMode,
    /// Environment only; never read from the file.
    pub token: Option<String>,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            project: PROJECT.to_string(),
            repo: DEFAULT_REPO.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            dist_dir: PathBuf::from("dist"),
            notes: None,
            json_mode: JsonMode::Auto,
            token: None,
        }
    }
}

/// On-disk TOML shape of `femtodist.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReleaseFile {
    project: Option<String>,
    repo: Option<String>,
    api_base: Option<String>,
    dist_dir: Option<PathBuf>,
    notes: Option<String>,
    json: Option<String>,
}

impl ReleaseConfig {
    /// Defaults, then the TOML file, then the environment. An explicit
    /// `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(path) => Some(Self::read_file(path)?),
            None => {
                let default = Path::new(DEFAULT_RELEASE_FILE);
                if default.is_file() { Some(Self::read_file(default)?) } else { None }
            }
        };

        if let Some(file) = file {
            config.project = file.project.unwrap_or(config.project);
            config.repo = file.repo.unwrap_or(config.repo);
            config.api_base = file.api_base.unwrap_or(config.api_base);
            config.dist_dir = file.dist_dir.unwrap_or(config.dist_dir);
            config.notes = file.notes.or(config.notes);
            if let Some(json) = file.json {
                config.json_mode = json.parse()?;
            }
        }

        let get = |key: &str| non_empty(lookup(key));
        config.token = get("GITHUB_TOKEN").or_else(|| get("GH_TOKEN"));
        if let Some(repo) = get("FEMTOBOT_REPO") {
            config.repo = repo;
        }
        if let Some(json) = get("FEMTODIST_JSON") {
            config.json_mode = json.parse()?;
        }
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<ReleaseFile> {
        let text = fs::read_to_string(path).map_err(|e| DistError::io("failed to read config", path, e))?;
        toml::from_str(&text).map_err(|e| DistError::Config(format!("{}: {e}", path.display())))
    }
}
