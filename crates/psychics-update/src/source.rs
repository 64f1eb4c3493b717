//! Remote release sources.
//!
//! A [`ReleaseSource`] answers two questions: what is the latest release of a
//! repository, and what are the bytes of one of its assets. The agent only
//! talks to this trait, so tests and alternative hosts can plug in their own
//! source. [`GitHubReleaseSource`] is the production implementation.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::UpdateConfig;
use crate::error::UpdateError;

/// Identifies a repository on the release host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
}

impl RepoRef {
    /// Creates a repository reference.
    #[must_use]
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    /// File name of the asset.
    pub name: String,
    /// Where the asset bytes can be fetched.
    #[serde(rename = "browser_download_url")]
    pub url: String,
}

/// The latest published release of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    /// Version tag of the release.
    #[serde(rename = "tag_name")]
    pub tag: String,
    /// Files attached to the release.
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Picks the asset to install for a package file name.
    ///
    /// Prefers an exact name match and falls back to the first asset.
    #[must_use]
    pub fn asset_for(&self, file_name: &str) -> Option<&ReleaseAsset> {
        self.assets
            .iter()
            .find(|a| a.name == file_name)
            .or_else(|| self.assets.first())
    }
}

/// Source of release metadata and artifacts.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Returns the latest release of `repo`.
    async fn latest_version(&self, repo: &RepoRef) -> Result<Release, UpdateError>;

    /// Writes `asset` to `destination`, returning the number of bytes written.
    ///
    /// `destination` is always a scratch file owned by the caller; a partial
    /// write is discarded by the caller on error.
    async fn download_asset(
        &self,
        repo: &RepoRef,
        asset: &ReleaseAsset,
        destination: &Path,
    ) -> Result<u64, UpdateError>;
}

/// Release source backed by the GitHub releases API.
#[derive(Debug, Clone)]
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    api_base: String,
}

impl GitHubReleaseSource {
    /// Builds a client with the configured timeout applied to every request.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Check`] if the HTTP client cannot be built.
    pub fn new(config: &UpdateConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("psychics-update/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdateError::Check(e.to_string()))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn latest_url(&self, repo: &RepoRef) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, repo.owner, repo.name
        )
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn latest_version(&self, repo: &RepoRef) -> Result<Release, UpdateError> {
        let url = self.latest_url(repo);
        debug!(%repo, %url, "querying latest release");

        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| UpdateError::Check(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateError::Check(format!(
                "{url} returned http={}",
                status.as_u16()
            )));
        }
        resp.json::<Release>()
            .await
            .map_err(|e| UpdateError::Check(format!("malformed release index: {e}")))
    }

    async fn download_asset(
        &self,
        repo: &RepoRef,
        asset: &ReleaseAsset,
        destination: &Path,
    ) -> Result<u64, UpdateError> {
        debug!(%repo, asset = %asset.name, "downloading release asset");

        let mut resp = self
            .client
            .get(&asset.url)
            .send()
            .await
            .map_err(|e| UpdateError::Download(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateError::Download(format!(
                "{} returned http={}",
                asset.url,
                status.as_u16()
            )));
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| UpdateError::io("create", destination, e))?;
        let mut written = 0u64;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| UpdateError::Download(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdateError::io("write", destination, e))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| UpdateError::io("flush", destination, e))?;
        file.sync_all()
            .await
            .map_err(|e| UpdateError::io("sync", destination, e))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(assets: &[&str]) -> Release {
        Release {
            tag: "1.0.0".to_string(),
            assets: assets
                .iter()
                .map(|name| ReleaseAsset {
                    name: (*name).to_string(),
                    url: format!("https://example.invalid/{name}"),
                })
                .collect(),
        }
    }

    #[test]
    fn asset_for_prefers_exact_name() {
        let r = release(&["sources.zip", "psychics.jar"]);
        assert_eq!(r.asset_for("psychics.jar").unwrap().name, "psychics.jar");
    }

    #[test]
    fn asset_for_falls_back_to_first() {
        let r = release(&["psychics-1.0.0.jar", "sources.zip"]);
        assert_eq!(
            r.asset_for("psychics.jar").unwrap().name,
            "psychics-1.0.0.jar"
        );
        assert!(release(&[]).asset_for("psychics.jar").is_none());
    }

    #[test]
    fn release_parses_github_shape() {
        let json = r#"{
            "tag_name": "v1.4.0",
            "name": "Psychics 1.4.0",
            "assets": [
                {"name": "psychics.jar", "browser_download_url": "https://example.invalid/a", "size": 10}
            ]
        }"#;
        let r: Release = serde_json::from_str(json).unwrap();
        assert_eq!(r.tag, "v1.4.0");
        assert_eq!(r.assets.len(), 1);
        assert_eq!(r.assets[0].url, "https://example.invalid/a");
    }

    #[test]
    fn latest_url_shape() {
        let config = UpdateConfig {
            api_base: "https://api.example.invalid/".to_string(),
            ..UpdateConfig::new("noonmaru", "psychics", "psychics.jar")
        };
        let source = GitHubReleaseSource::new(&config).unwrap();
        assert_eq!(
            source.latest_url(&config.repo()),
            "https://api.example.invalid/repos/noonmaru/psychics/releases/latest"
        );
    }

    #[test]
    fn repo_display() {
        assert_eq!(RepoRef::new("a", "b").to_string(), "a/b");
    }
}
