use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::version::LATEST;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// A published release and its downloadable assets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    /// Release name, or the tag when the release was published unnamed.
    pub fn name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.tag_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

/// Remote API listing releases and serving their assets.
#[async_trait::async_trait]
pub trait ReleaseSource: Send + Sync {
    /// List releases, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    async fn list(&self) -> Result<Vec<Release>>;

    /// Stream the bytes at `url` into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or any write fails. Bytes already
    /// written are left in `out`.
    async fn download(&self, url: &str, out: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()>;
}

/// GitHub releases of `owner/repo`.
#[derive(Clone)]
pub struct GithubReleases {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GithubReleases {
    pub fn new(owner: &str, repo: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: DEFAULT_API_URL.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token,
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "regression-gitbase")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => req.header("Authorization", format!("token {token}")),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl ReleaseSource for GithubReleases {
    async fn list(&self) -> Result<Vec<Release>> {
        let url = format!(
            "{}/repos/{}/{}/releases?per_page=100",
            self.api_url, self.owner, self.repo
        );
        debug!(url = %url, "listing releases");
        let body = self.request(&url).send().await?.error_for_status()?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn download(&self, url: &str, out: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<()> {
        let mut resp = self
            .request(url)
            .header("Accept", "application/octet-stream")
            .send()
            .await?
            .error_for_status()?;
        while let Some(chunk) = resp.chunk().await? {
            out.write_all(&chunk).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

/// Release lookups over a [`ReleaseSource`].
///
/// The release list is fetched on first use and kept for the lifetime of
/// the client. Construct a new client to observe newly published releases.
pub struct ReleaseClient<S: ReleaseSource = GithubReleases> {
    source: S,
    releases: OnceCell<Vec<Release>>,
}

impl<S: ReleaseSource> ReleaseClient<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            releases: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    async fn releases(&self) -> Result<&[Release]> {
        let releases = self
            .releases
            .get_or_try_init(|| self.source.list())
            .await?;
        Ok(releases.as_slice())
    }

    /// Name of the newest release.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] when there are no releases, or the
    /// listing error.
    pub async fn latest(&self) -> Result<String> {
        self.releases()
            .await?
            .first()
            .map(|r| r.name().to_string())
            .ok_or_else(|| Error::VersionNotFound(LATEST.to_string()))
    }

    /// Download asset `asset` of release `version` to `dest`.
    ///
    /// The transfer goes to `<dest>.download` and is renamed into place once
    /// complete, so `dest` never holds a partial file. A stale `.download`
    /// file from an earlier failure is removed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] or [`Error::AssetNotFound`] when
    /// the lookup fails, or the transfer/filesystem error.
    #[tracing::instrument(skip(self, dest), fields(dest = %dest.display()))]
    pub async fn fetch_asset(&self, version: &str, asset: &str, dest: &Path) -> Result<()> {
        let release = self
            .releases()
            .await?
            .iter()
            .find(|r| r.name() == version)
            .ok_or_else(|| Error::VersionNotFound(version.to_string()))?;

        let found = release
            .assets
            .iter()
            .find(|a| a.name == asset)
            .ok_or_else(|| Error::AssetNotFound {
                asset: asset.to_string(),
                version: version.to_string(),
            })?;

        info!(url = %found.browser_download_url, "downloading release asset");
        self.download(&found.browser_download_url, dest).await
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let partial = download_path(dest);
        if tokio::fs::try_exists(&partial).await? {
            debug!(path = %partial.display(), "removing stale partial download");
            tokio::fs::remove_file(&partial).await?;
        }

        let mut file = tokio::fs::File::create(&partial).await?;
        self.source.download(url, &mut file).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }
}

/// `<path>.download`, the in-flight name of a download.
pub fn download_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".download");
    PathBuf::from(name)
}
