//! In-memory release API with GitHub's constraints: one asset per name per
//! release, JSON shaped like the real responses (nested ids included).

use std::sync::Mutex;

use serde_json::json;

use super::api::{NewRelease, ReleaseApi};
use crate::error::{DistError, Result};

struct FakeAsset {
    id: u64,
    name: String,
    bytes: Vec<u8>,
}

struct FakeRelease {
    id: u64,
    tag: String,
    assets: Vec<FakeAsset>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    releases: Vec<FakeRelease>,
    created: Vec<NewRelease>,
    deleted: Vec<String>,
    create_rejection: Option<String>,
}

impl State {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        100 + self.next_id
    }

    fn release_json(release: &FakeRelease) -> String {
        json!({
            "url": format!("https://api.example/releases/{}", release.id),
            "upload_url": format!("https://uploads.example/releases/{}/assets{{?name,label}}", release.id),
            "author": { "login": "bot", "id": 1 },
            "id": release.id,
            "tag_name": release.tag,
            "assets": release.assets.iter().map(|a| json!({"id": a.id, "name": a.name})).collect::<Vec<_>>(),
        })
        .to_string()
    }
}

#[derive(Default)]
pub(crate) struct FakeReleaseApi {
    state: Mutex<State>,
}

impl FakeReleaseApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `create_release` answer with `body` instead of a release.
    pub(crate) fn rejecting_creates(self, body: &str) -> Self {
        self.state.lock().unwrap().create_rejection = Some(body.to_string());
        self
    }

    pub(crate) fn seed_release(&self, tag: &str) {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        state.releases.push(FakeRelease {
            id,
            tag: tag.to_string(),
            assets: Vec::new(),
        });
    }

    pub(crate) fn created_requests(&self) -> Vec<NewRelease> {
        self.state.lock().unwrap().created.clone()
    }

    pub(crate) fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// `(name, bytes)` attached to the release tagged `tag`, in upload order.
    pub(crate) fn attached(&self, tag: &str) -> Vec<(String, Vec<u8>)> {
        let state = self.state.lock().unwrap();
        state
            .releases
            .iter()
            .find(|r| r.tag == tag)
            .map(|r| r.assets.iter().map(|a| (a.name.clone(), a.bytes.clone())).collect())
            .unwrap_or_default()
    }
}

impl ReleaseApi for FakeReleaseApi {
    async fn release_by_tag(&self, tag: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.releases.iter().find(|r| r.tag == tag).map(State::release_json))
    }

    async fn create_release(&self, release: &NewRelease) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.created.push(release.clone());
        if let Some(body) = &state.create_rejection {
            return Ok(body.clone());
        }
        let id = state.id();
        let created = FakeRelease {
            id,
            tag: release.tag_name.clone(),
            assets: Vec::new(),
        };
        let body = State::release_json(&created);
        state.releases.push(created);
        Ok(body)
    }

    async fn list_assets(&self, release_id: &str) -> Result<String> {
        let state = self.state.lock().unwrap();
        let release = state
            .releases
            .iter()
            .find(|r| r.id.to_string() == release_id)
            .ok_or_else(|| DistError::RemoteApi {
                context: format!("listing assets of {release_id}"),
                response: r#"{"message":"Not Found"}"#.to_string(),
            })?;
        let items: Vec<_> = release
            .assets
            .iter()
            .map(|a| json!({"id": a.id, "name": a.name, "uploader": {"id": 1, "name": "bot"}}))
            .collect();
        Ok(serde_json::Value::Array(items).to_string())
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for release in &mut state.releases {
            release.assets.retain(|a| a.id.to_string() != asset_id);
        }
        state.deleted.push(asset_id.to_string());
        Ok(())
    }

    async fn upload_asset(&self, upload_url: &str, name: &str, bytes: Vec<u8>) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let id = state.id();
        let release_id = upload_url
            .trim_end_matches("/assets")
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let release = state
            .releases
            .iter_mut()
            .find(|r| r.id.to_string() == release_id)
            .ok_or_else(|| DistError::RemoteApi {
                context: format!("uploading {name}"),
                response: format!("no release behind {upload_url}"),
            })?;

        if release.assets.iter().any(|a| a.name == name) {
            return Err(DistError::RemoteApi {
                context: format!("uploading {name}"),
                response: r#"{"message":"Validation Failed","errors":[{"code":"already_exists"}]}"#.to_string(),
            });
        }
        release.assets.push(FakeAsset {
            id,
            name: name.to_string(),
            bytes,
        });
        Ok(json!({"id": id, "name": name}).to_string())
    }
}
