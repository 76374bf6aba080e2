use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::archive::extract_binary;
use crate::build::Build;
use crate::config::Config;
use crate::error::Result;
use crate::releases::{GithubReleases, ReleaseClient, ReleaseSource, download_path};
use crate::tool::Tool;
use crate::version::VersionSpec;

/// A resolved, runnable version of a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    /// Version specifier as given by the user.
    pub version: String,
    /// What the specifier resolved to: release name, commit hash or path.
    pub resolved: String,
    pub path: PathBuf,
}

impl Binary {
    /// Path of an extra file copied out of the source checkout, if this
    /// binary was built from source and the file existed there.
    pub fn extra_file(&self, name: &str) -> Option<PathBuf> {
        let path = extras_dir(&self.path).join(name);
        path.is_file().then_some(path)
    }
}

/// `<binary>.d`, the directory holding a built binary's extra files.
pub fn extras_dir(binary: &Path) -> PathBuf {
    let mut name = OsString::from(binary.as_os_str());
    name.push(".d");
    PathBuf::from(name)
}

/// Turns version specifiers into binaries, memoized per specifier.
///
/// Resolutions are serialized: a second request for a version that is
/// being resolved waits for the first one instead of building again.
pub struct BinaryResolver<S: ReleaseSource = GithubReleases> {
    config: Config,
    tool: Tool,
    releases: ReleaseClient<S>,
    resolved: Mutex<HashMap<String, Binary>>,
}

impl<S: ReleaseSource> BinaryResolver<S> {
    pub fn new(config: Config, tool: Tool, source: S) -> Self {
        Self {
            config,
            tool,
            releases: ReleaseClient::new(source),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Resolve `version` to a binary on disk.
    ///
    /// # Errors
    ///
    /// Returns the release lookup, download, extraction or build error for
    /// the version's kind. Literal paths never fail.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, version: &str) -> Result<Binary> {
        let mut resolved = self.resolved.lock().await;
        if let Some(binary) = resolved.get(version) {
            debug!(path = %binary.path.display(), "already resolved");
            return Ok(binary.clone());
        }

        let binary = match VersionSpec::classify(version) {
            VersionSpec::Release(tag) => self.release(version, &tag).await?,
            VersionSpec::Latest => {
                let tag = self.releases.latest().await?;
                info!(release = %tag, "latest release");
                self.release(version, &tag).await?
            }
            VersionSpec::GitRef { .. } => {
                let output = Build::new(&self.config, &self.tool, version)?.build().await?;
                Binary {
                    version: version.to_string(),
                    resolved: output.hash,
                    path: output.path,
                }
            }
            VersionSpec::Path(path) => Binary {
                version: version.to_string(),
                resolved: version.to_string(),
                path,
            },
        };

        resolved.insert(version.to_string(), binary.clone());
        Ok(binary)
    }

    async fn release(&self, version: &str, tag: &str) -> Result<Binary> {
        let path = self
            .config
            .binary_cache
            .join(self.tool.cache_name(tag));
        let binary = Binary {
            version: version.to_string(),
            resolved: tag.to_string(),
            path,
        };

        if tokio::fs::try_exists(&binary.path).await? {
            debug!(path = %binary.path.display(), "release binary cached");
            return Ok(binary);
        }

        let os = &self.config.os;
        let asset = self.tool.release_asset(tag, os);
        let scratch = tempfile::tempdir()?;
        let archive = scratch.path().join(&asset);
        self.releases.fetch_asset(tag, &asset, &archive).await?;

        // Extract beside the cache entry first so a bad archive leaves no
        // half-written binary under the final name.
        let partial = download_path(&binary.path);
        extract_binary(&archive, &self.tool.dir_name(os), &self.tool.name, &partial)?;
        tokio::fs::rename(&partial, &binary.path).await?;

        info!(path = %binary.path.display(), "release binary installed");
        Ok(binary)
    }
}
