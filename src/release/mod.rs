//! Release publishing
//!
//! - `api` - release API trait and the GitHub client
//! - `json` - structured and pattern field extraction
//! - `publisher` - get-or-create release, replace-on-publish assets

pub mod api;
#[cfg(test)]
pub(crate) mod fake;
pub mod json;
pub mod publisher;

pub use api::{GitHubApi, NewRelease, ReleaseApi};
pub use json::{JsonAccessor, JsonMode, RemoteAssetRecord, select_accessor};
pub use publisher::{PlannedAsset, PublishReport, ReleasePublisher};

use std::path::Path;

use log::info;

use crate::asset::{AssetKind, asset_name, checksum_name};
use crate::checksum::write_sidecar;
use crate::config::ReleaseConfig;
use crate::error::{DistError, Result};
use crate::platform::PUBLISHER_PLATFORMS;

/// A release as resolved on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    pub id: String,
    pub upload_endpoint: String,
    pub prerelease: bool,
}

/// Version string as given on the command line, without the `v`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseVersion(String);

impl ReleaseVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let version = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let valid = version.starts_with(|c: char| c.is_ascii_digit())
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+'));
        if !valid {
            return Err(DistError::InvalidVersion(raw.to_string()));
        }
        Ok(Self(version.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tag(&self) -> String {
        format!("v{}", self.0)
    }

    /// Semver pre-release convention: any hyphen.
    pub fn is_prerelease(&self) -> bool {
        self.0.contains('-')
    }
}

/// One planned binary plus its sidecar per publishable platform, in
/// platform order. Sidecars are (re)generated for binaries that exist;
/// missing binaries stay in the plan so the publisher reports them.
pub fn collect_artifacts(project: &str, dist_dir: &Path) -> Result<Vec<PlannedAsset>> {
    if !dist_dir.is_dir() {
        return Err(DistError::Precondition(format!(
            "artifact directory {} does not exist",
            dist_dir.display()
        )));
    }

    let mut planned = Vec::with_capacity(PUBLISHER_PLATFORMS.len() * 2);
    for platform in PUBLISHER_PLATFORMS {
        let name = asset_name(project, *platform, AssetKind::Binary);
        let binary = dist_dir.join(&name);
        let sidecar_name = checksum_name(&name);
        let sidecar = dist_dir.join(&sidecar_name);

        if binary.is_file() {
            let (_, record) = write_sidecar(&binary, &name)?;
            info!("{name}: sha256 {}", record.digest);
        } else if sidecar.is_file() {
            // Never publish a checksum for a binary that is not being published.
            std::fs::remove_file(&sidecar).map_err(|e| DistError::io("failed to remove stale", &sidecar, e))?;
        }

        planned.push(PlannedAsset { name, path: binary });
        planned.push(PlannedAsset {
            name: sidecar_name,
            path: sidecar,
        });
    }
    Ok(planned)
}

/// Release orchestration: credential check, artifact collection, checksum
/// generation, publish.
pub async fn run(config: &ReleaseConfig, version: &str) -> Result<PublishReport> {
    let token = config
        .token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| DistError::Precondition("GITHUB_TOKEN (or GH_TOKEN) must be set to publish".to_string()))?;

    let version = ReleaseVersion::parse(version)?;
    let api = GitHubApi::new(&config.api_base, &config.repo, token)?;
    publish_with(&api, config, &version).await
}

pub async fn publish_with<A: ReleaseApi>(
    api: &A,
    config: &ReleaseConfig,
    version: &ReleaseVersion,
) -> Result<PublishReport> {
    let planned = collect_artifacts(&config.project, &config.dist_dir)?;
    let json = select_accessor(config.json_mode);
    info!(
        "publishing {} {} to {} ({} JSON extraction)",
        config.project,
        version.tag(),
        config.repo,
        json.name()
    );

    let title = format!("{} {}", config.project, version.tag());
    let notes = config
        .notes
        .clone()
        .unwrap_or_else(|| format!("{} {}", config.project, version.tag()));

    let report = ReleasePublisher::new(api, json.as_ref())
        .publish(version, &title, &notes, &planned)
        .await?;

    info!(
        "published {} asset(s) to {}; {} replaced, {} skipped",
        report.uploaded.len(),
        report.tag,
        report.replaced.len(),
        report.skipped.len()
    );
    Ok(report)
}
