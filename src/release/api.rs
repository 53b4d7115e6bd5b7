//! Release API client.
//!
//! Methods hand back raw response bodies; field extraction is the job of the
//! `JsonAccessor` chosen for the run, so both extraction paths see exactly
//! what the server sent.

use std::time::Duration;

use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::error::{DistError, Result};

const API_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Body of `POST /releases`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewRelease {
    pub tag_name: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

#[allow(async_fn_in_trait)]
pub trait ReleaseApi {
    /// `GET /releases/tags/{tag}`; `None` when the server has nothing for it.
    async fn release_by_tag(&self, tag: &str) -> Result<Option<String>>;

    /// `POST /releases`. The body is returned whatever the status, so a
    /// rejected request still reaches the operator verbatim.
    async fn create_release(&self, release: &NewRelease) -> Result<String>;

    /// `GET /releases/{id}/assets`
    async fn list_assets(&self, release_id: &str) -> Result<String>;

    /// `DELETE /releases/assets/{id}`. Deleting an absent asset succeeds.
    async fn delete_asset(&self, asset_id: &str) -> Result<()>;

    /// `POST {upload_url}?name={name}` with the raw bytes.
    async fn upload_asset(&self, upload_url: &str, name: &str, bytes: Vec<u8>) -> Result<String>;
}

/// GitHub-shaped release API over `reqwest`.
#[derive(Debug, Clone)]
pub struct GitHubApi {
    client: Client,
    repo_url: String,
}

impl GitHubApi {
    /// `api_root` is e.g. `https://api.github.com`; `repo` is `owner/name`.
    pub fn new(api_root: &str, repo: &str, token: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(DistError::Precondition(
                "a bearer token is required (set GITHUB_TOKEN)".to_string(),
            ));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| DistError::Precondition("token contains invalid header characters".to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let client = Client::builder()
            .user_agent(format!("femtodist/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(API_TIMEOUT)
            .build()
            .map_err(|e| DistError::http("building API client", e))?;

        Ok(Self {
            client,
            repo_url: format!("{}/repos/{}", api_root.trim_end_matches('/'), repo.trim_matches('/')),
        })
    }

    async fn text(context: &str, response: reqwest::Response) -> Result<(StatusCode, String)> {
        let status = response.status();
        let body = response.text().await.map_err(|e| DistError::http(context, e))?;
        debug!("{context}: HTTP {status}, {} bytes", body.len());
        Ok((status, body))
    }
}

impl ReleaseApi for GitHubApi {
    async fn release_by_tag(&self, tag: &str) -> Result<Option<String>> {
        let context = format!("looking up release {tag}");
        let response = self
            .client
            .get(format!("{}/releases/tags/{tag}", self.repo_url))
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(|e| DistError::http(&context, e))?;

        let (status, body) = Self::text(&context, response).await?;
        if status.is_success() && !body.trim().is_empty() {
            Ok(Some(body))
        } else {
            Ok(None)
        }
    }

    async fn create_release(&self, release: &NewRelease) -> Result<String> {
        let context = format!("creating release {}", release.tag_name);
        let response = self
            .client
            .post(format!("{}/releases", self.repo_url))
            .timeout(API_TIMEOUT)
            .json(release)
            .send()
            .await
            .map_err(|e| DistError::http(&context, e))?;

        Ok(Self::text(&context, response).await?.1)
    }

    async fn list_assets(&self, release_id: &str) -> Result<String> {
        let context = format!("listing assets of release {release_id}");
        let response = self
            .client
            .get(format!("{}/releases/{release_id}/assets", self.repo_url))
            .query(&[("per_page", "100")])
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(|e| DistError::http(&context, e))?;

        let (status, body) = Self::text(&context, response).await?;
        if !status.is_success() {
            return Err(DistError::RemoteApi { context, response: body });
        }
        Ok(body)
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<()> {
        let context = format!("deleting asset {asset_id}");
        let response = self
            .client
            .delete(format!("{}/releases/assets/{asset_id}", self.repo_url))
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(|e| DistError::http(&context, e))?;

        let (status, body) = Self::text(&context, response).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(DistError::RemoteApi { context, response: body })
        }
    }

    async fn upload_asset(&self, upload_url: &str, name: &str, bytes: Vec<u8>) -> Result<String> {
        let context = format!("uploading {name}");
        let mut url = url::Url::parse(upload_url).map_err(|e| DistError::RemoteApi {
            context: format!("{context}: invalid upload URL ({e})"),
            response: upload_url.to_string(),
        })?;
        url.query_pairs_mut().append_pair("name", name);

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, bytes.len())
            .timeout(UPLOAD_TIMEOUT)
            .body(bytes)
            .send()
            .await
            .map_err(|e| DistError::http(&context, e))?;

        let (status, body) = Self::text(&context, response).await?;
        if !status.is_success() {
            return Err(DistError::RemoteApi { context, response: body });
        }
        Ok(body)
    }
}
