//! Idempotent get-or-create release and replace-on-publish asset sync.

use std::fs;
use std::path::PathBuf;

use log::{info, warn};

use super::api::{NewRelease, ReleaseApi};
use super::json::JsonAccessor;
use super::{Release, ReleaseVersion};
use crate::error::{DistError, Result};

/// A file the publisher should attach under `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub tag: String,
    pub release_id: String,
    pub created: bool,
    pub uploaded: Vec<String>,
    /// Uploaded after deleting a same-named remote record.
    pub replaced: Vec<String>,
    /// Not present on local disk.
    pub skipped: Vec<String>,
}

pub struct ReleasePublisher<'a, A> {
    api: &'a A,
    json: &'a dyn JsonAccessor,
}

impl<'a, A: ReleaseApi> ReleasePublisher<'a, A> {
    pub fn new(api: &'a A, json: &'a dyn JsonAccessor) -> Self {
        Self { api, json }
    }

    /// Resolve or create the release for `version`, then sync `assets` in order.
    pub async fn publish(
        &self,
        version: &ReleaseVersion,
        title: &str,
        notes: &str,
        assets: &[PlannedAsset],
    ) -> Result<PublishReport> {
        let (release, created) = self.resolve(version, title, notes).await?;
        info!(
            "{} release {} (id {})",
            if created { "created" } else { "found" },
            release.tag_name,
            release.id
        );

        let mut report = PublishReport {
            tag: release.tag_name.clone(),
            release_id: release.id.clone(),
            created,
            ..PublishReport::default()
        };

        for asset in assets {
            if !asset.path.is_file() {
                warn!("{} not found at {}, skipping", asset.name, asset.path.display());
                report.skipped.push(asset.name.clone());
                continue;
            }
            let replaced = self.publish_asset(&release, asset).await?;
            if replaced {
                report.replaced.push(asset.name.clone());
            }
            report.uploaded.push(asset.name.clone());
        }

        Ok(report)
    }

    async fn resolve(&self, version: &ReleaseVersion, title: &str, notes: &str) -> Result<(Release, bool)> {
        let tag = version.tag();

        let (body, created) = match self.api.release_by_tag(&tag).await? {
            Some(body) => (body, false),
            None => {
                info!("no release for {tag}, creating it");
                let request = NewRelease {
                    tag_name: tag.clone(),
                    name: title.to_string(),
                    body: notes.to_string(),
                    draft: false,
                    prerelease: version.is_prerelease(),
                };
                (self.api.create_release(&request).await?, true)
            }
        };

        // Without both fields nothing can be uploaded; usually a bad token or repo.
        let upload_url = self.json.upload_url(&body);
        let id = self.json.release_id(&body);
        let (Some(upload_url), Some(id)) = (upload_url, id) else {
            return Err(DistError::RemoteApi {
                context: format!(
                    "release {tag} response has no upload_url/id (check token scope and repository)"
                ),
                response: body,
            });
        };

        Ok((
            Release {
                tag_name: tag,
                id,
                upload_endpoint: strip_uri_template(&upload_url),
                prerelease: version.is_prerelease(),
            },
            created,
        ))
    }

    /// Delete every same-named record, then upload. Returns whether anything
    /// was deleted.
    async fn publish_asset(&self, release: &Release, asset: &PlannedAsset) -> Result<bool> {
        let bytes = fs::read(&asset.path).map_err(|e| DistError::io("failed to read", &asset.path, e))?;

        let listing = self.api.list_assets(&release.id).await?;
        let stale: Vec<_> = self
            .json
            .assets(&listing)
            .into_iter()
            .filter(|record| record.name == asset.name)
            .collect();

        for record in &stale {
            info!("removing existing {} (asset id {})", record.name, record.id);
            self.api.delete_asset(&record.id).await?;
        }

        info!("uploading {} ({} bytes)", asset.name, bytes.len());
        self.api
            .upload_asset(&release.upload_endpoint, &asset.name, bytes)
            .await?;
        Ok(!stale.is_empty())
    }
}

/// `https://uploads.example/.../assets{?name,label}` -> `https://uploads.example/.../assets`
fn strip_uri_template(url: &str) -> String {
    url.split('{').next().unwrap_or(url).to_string()
}
