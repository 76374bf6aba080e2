use std::path::PathBuf;

/// One command of a tool's build, run inside `dir` relative to the checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub dir: String,
    pub command: String,
    pub args: Vec<String>,
}

impl BuildStep {
    pub fn new(dir: &str, command: &str, args: &[&str]) -> Self {
        Self {
            dir: dir.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Static description of the benchmarked product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    /// Executable name, also used for cache and release asset names.
    pub name: String,
    /// Canonical git repository.
    pub git_url: String,
    /// Location of the checkout below `<workspace>/src`, so builds that
    /// expect a fixed layout (e.g. a GOPATH) keep working.
    pub project_path: String,
    /// Environment variable pointed at the ephemeral build workspace.
    pub workspace_env: String,
    /// Target OS passed to source builds as `PKG_OS`. Source builds always
    /// produce this platform's binary, whatever the host is.
    pub target_os: String,
    pub build_steps: Vec<BuildStep>,
    /// Files copied out of the source checkout next to the built binary.
    pub extra_files: Vec<String>,
}

impl Tool {
    /// Directory holding the executable in release tarballs and build
    /// output, e.g. `gitbase_linux_amd64`.
    pub fn dir_name(&self, os: &str) -> String {
        format!("{}_{os}_amd64", self.name)
    }

    /// Path of the built executable relative to the checkout.
    pub fn build_output(&self, os: &str) -> PathBuf {
        PathBuf::from("build").join(self.dir_name(os)).join(&self.name)
    }

    pub fn release_asset(&self, version: &str, os: &str) -> String {
        format!("{}_{version}_{os}_amd64.tar.gz", self.name)
    }

    /// Cache file name for a release tag or commit hash.
    pub fn cache_name(&self, version_or_hash: &str) -> String {
        format!("{}.{version_or_hash}", self.name)
    }
}
