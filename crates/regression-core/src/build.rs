use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::archive::copy_executable;
use crate::binary::extras_dir;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::releases::download_path;
use crate::tool::{BuildStep, Tool};
use crate::version::{GitSource, VersionSpec};

/// Local branch the fetched reference is mapped to before checkout.
const BUILD_BRANCH: &str = "master";

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Cached executable, named after the commit hash.
    pub path: PathBuf,
    pub hash: String,
    /// `true` when the commit was already built and nothing was fetched or run.
    pub cached: bool,
}

/// Builds a `local:`, `remote:` or `pull:` version from source.
///
/// Every build runs in its own temporary workspace that is removed when
/// [`Build::build`] returns, whatever the outcome. Only the executable (and
/// the tool's extra files) are copied out, into the binary cache under the
/// commit hash.
#[derive(Debug)]
pub struct Build<'a> {
    config: &'a Config,
    tool: &'a Tool,
    version: String,
    source: GitSource,
    reference: String,
    url: String,
}

impl<'a> Build<'a> {
    /// # Errors
    ///
    /// Returns [`Error::InvalidVersion`] when `version` is not a git
    /// reference, or an I/O error if the working directory is unreadable
    /// for `local:` versions.
    pub fn new(config: &'a Config, tool: &'a Tool, version: &str) -> Result<Self> {
        let VersionSpec::GitRef { source, reference } = VersionSpec::classify(version) else {
            return Err(Error::InvalidVersion(version.to_string()));
        };

        let url = match source {
            GitSource::Local => format!("file://{}", std::env::current_dir()?.display()),
            GitSource::Remote | GitSource::Pull => config
                .git_url
                .clone()
                .unwrap_or_else(|| tool.git_url.clone()),
        };

        Ok(Self {
            config,
            tool,
            version: version.to_string(),
            source,
            reference,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch, build and cache the binary for this reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReferenceNotFound`] if the remote has no matching
    /// reference, [`Error::CommandFailed`] if git or a build step exits
    /// unsuccessfully, or any underlying I/O error.
    #[tracing::instrument(skip(self), fields(version = %self.version, url = %self.url))]
    pub async fn build(&self) -> Result<BuildOutput> {
        let workspace = tempfile::Builder::new()
            .prefix("regression-build-")
            .tempdir()?;
        let project = workspace.path().join("src").join(&self.tool.project_path);
        tokio::fs::create_dir_all(&project).await?;

        git(&project, &["init", "--quiet"]).await?;
        git(&project, &["remote", "add", "origin", &self.url]).await?;

        let listing = git(&project, &["ls-remote", "origin"]).await?;
        let (name, hash) = find_reference(self.source, &self.reference, &listing)?;

        let path = self.binary_path(&hash);
        if tokio::fs::try_exists(&path).await? {
            info!(hash = %hash, "binary already built");
            return Ok(BuildOutput {
                path,
                hash,
                cached: true,
            });
        }

        info!(reference = %name, "fetching");
        let refspec = format!("+{name}:refs/heads/{BUILD_BRANCH}");
        git(
            &project,
            &["fetch", "--quiet", "--depth", "1", "--update-head-ok", "origin", &refspec],
        )
        .await?;
        git(&project, &["checkout", "--quiet", "--force", BUILD_BRANCH]).await?;

        info!(hash = %hash, "building");
        for step in &self.tool.build_steps {
            self.run_step(workspace.path(), &project, step).await?;
        }

        self.publish(&project, &path)?;
        Ok(BuildOutput {
            path,
            hash,
            cached: false,
        })
    }

    async fn run_step(&self, workspace: &Path, project: &Path, step: &BuildStep) -> Result<()> {
        let dir = project.join(&step.dir);
        debug!(command = %step.command, args = ?step.args, dir = %dir.display(), "build step");

        let status = Command::new(&step.command)
            .args(&step.args)
            .current_dir(&dir)
            .env_clear()
            .env(&self.tool.workspace_env, workspace)
            .env("PWD", &dir)
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("HOME", std::env::var_os("HOME").unwrap_or_default())
            .env("PKG_OS", &self.tool.target_os)
            .stdin(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(Error::CommandFailed {
                program: step.command.clone(),
                args: step.args.join(" "),
                status,
                stderr: "see build output above".to_string(),
            });
        }
        Ok(())
    }

    /// Copy the binary and extra files into the cache.
    ///
    /// Everything is staged under `.download` names first. The extras
    /// directory is moved into place before the binary, so a binary in the
    /// cache always comes with its extras and a failed publish caches
    /// nothing.
    fn publish(&self, project: &Path, path: &Path) -> Result<()> {
        let staged = download_path(path);
        let extras = extras_dir(path);
        let staged_extras = download_path(&extras);

        let published = self
            .stage(project, &staged, &staged_extras)
            .and_then(|has_extras| {
                if has_extras {
                    if extras.is_dir() {
                        std::fs::remove_dir_all(&extras)?;
                    }
                    std::fs::rename(&staged_extras, &extras)?;
                }
                std::fs::rename(&staged, path)?;
                Ok(())
            });

        if published.is_err() {
            let _ = std::fs::remove_file(&staged);
            let _ = std::fs::remove_dir_all(&staged_extras);
        }
        published
    }

    /// Returns whether any extra file was staged.
    fn stage(&self, project: &Path, staged: &Path, staged_extras: &Path) -> Result<bool> {
        let output = project.join(self.tool.build_output(&self.tool.target_os));
        copy_executable(&output, staged)?;

        if staged_extras.exists() {
            std::fs::remove_dir_all(staged_extras)?;
        }
        let mut has_extras = false;
        for file in &self.tool.extra_files {
            let from = project.join(file);
            if !from.is_file() {
                debug!(file = %file, "extra file not present in checkout");
                continue;
            }
            let to = staged_extras.join(file);
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&from, &to)?;
            has_extras = true;
        }
        Ok(has_extras)
    }

    fn binary_path(&self, hash: &str) -> PathBuf {
        self.config.binary_cache.join(self.tool.cache_name(hash))
    }
}

/// Pick the reference to fetch from `git ls-remote` output.
///
/// Pull requests must match `refs/pull/<n>/head` exactly. Other sources
/// match a branch or tag whose short name equals `reference`; annotated
/// tags resolve to the commit they point at.
fn find_reference(source: GitSource, reference: &str, listing: &str) -> Result<(String, String)> {
    let refs: Vec<(&str, &str)> = listing
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(hash, name)| (hash.trim(), name.trim()))
        .collect();

    let found = if source == GitSource::Pull {
        let wanted = format!("refs/pull/{reference}/head");
        refs.iter().find(|(_, name)| *name == wanted)
    } else {
        refs.iter().find(|(_, name)| {
            let short = name
                .strip_prefix("refs/heads/")
                .or_else(|| name.strip_prefix("refs/tags/"));
            short == Some(reference)
        })
    };

    let Some(&(hash, name)) = found else {
        return Err(Error::ReferenceNotFound(reference.to_string()));
    };

    let peeled = format!("{name}^{{}}");
    let hash = refs
        .iter()
        .find(|(_, n)| *n == peeled)
        .map_or(hash, |(h, _)| h);

    Ok((name.to_string(), hash.to_string()))
}

async fn git(dir: &Path, args: &[&str]) -> Result<String> {
    debug!(cmd = "git", args = ?args, dir = %dir.display(), "running command");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            program: "git".to_string(),
            args: args.join(" "),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
