use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

/// A git repository served by gitbase during the benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// Rough size class; higher means bigger and slower to query.
    pub complexity: u32,
}

impl Repository {
    fn new(name: &str, url: &str, description: &str, complexity: u32) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            description: description.to_string(),
            complexity,
        }
    }
}

pub fn default_repositories() -> Vec<Repository> {
    vec![
        Repository::new(
            "cangallo",
            "https://github.com/jfontan/cangallo.git",
            "Small repository that should be fast to clone",
            0,
        ),
        Repository::new(
            "octoprint-tft",
            "https://github.com/mcuadros/OctoPrint-TFT.git",
            "Small repository that should be fast to clone",
            1,
        ),
        Repository::new(
            "gitbase",
            "https://github.com/src-d/gitbase.git",
            "Medium sized repository with some history",
            2,
        ),
    ]
}

/// Load a YAML sequence of repositories.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_repositories(path: &Path) -> Result<Vec<Repository>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// The fixture repositories of a run, cloned below `path`.
#[derive(Debug, Clone)]
pub struct Repositories {
    path: PathBuf,
    complexity: u32,
    repos: Vec<Repository>,
}

impl Repositories {
    pub fn new(path: PathBuf, complexity: u32, repos: Vec<Repository>) -> Self {
        Self {
            path,
            complexity,
            repos,
        }
    }

    /// Repositories at or below the configured complexity.
    pub fn selected(&self) -> impl Iterator<Item = &Repository> {
        self.repos.iter().filter(|r| r.complexity <= self.complexity)
    }

    pub fn repo_path(&self, repo: &Repository) -> PathBuf {
        self.path.join(&repo.name)
    }

    /// Clone every selected repository that is not cached yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a clone fails.
    pub fn download(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))?;

        for repo in self.selected() {
            let dest = self.repo_path(repo);
            if dest.exists() {
                debug!(repo = %repo.name, "repository already cloned");
                continue;
            }

            info!(repo = %repo.name, url = %repo.url, "cloning repository");
            let partial = self.path.join(format!("{}.tmp", repo.name));
            if partial.exists() {
                std::fs::remove_dir_all(&partial)?;
            }
            let status = Command::new("git")
                .args(["clone", "--quiet", &repo.url])
                .arg(&partial)
                .env("GIT_TERMINAL_PROMPT", "0")
                .status()
                .context("failed to run git clone")?;
            if !status.success() {
                bail!("git clone {} failed ({status})", repo.url);
            }
            std::fs::rename(&partial, &dest)?;
        }
        Ok(())
    }

    /// Directory of symlinks to the selected repositories, used as the
    /// gitbase fixture directory. Rebuilt on every call.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a link cannot be created.
    pub fn links_dir(&self) -> Result<PathBuf> {
        let dir = self.path.join(format!("links-{}", self.complexity));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        for repo in self.selected() {
            let target = std::path::absolute(self.repo_path(repo))?;
            symlink_dir(&target, &dir.join(&repo.name))
                .with_context(|| format!("failed to link {}", target.display()))?;
        }
        Ok(dir)
    }

    /// Print every known repository.
    ///
    /// # Errors
    ///
    /// Returns the error from writing to `out`.
    pub fn show(&self, out: &mut dyn Write) -> std::io::Result<()> {
        for repo in &self.repos {
            writeln!(out, "* {} ({})", repo.name, repo.complexity)?;
            writeln!(out, "  {}", repo.url)?;
            if !repo.description.is_empty() {
                writeln!(out, "  {}", repo.description)?;
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
