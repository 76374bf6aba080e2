use std::path::PathBuf;

/// Settings shared by every binary resolution of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Operating system name used in release asset and build directory
    /// names (`linux`, `darwin`, `windows`).
    pub os: String,
    /// Directory holding downloaded and built binaries.
    pub binary_cache: PathBuf,
    /// Overrides the tool's git URL for `remote:` and `pull:` versions.
    pub git_url: Option<String>,
    /// Token for the release API.
    pub github_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            os: host_os().to_string(),
            binary_cache: PathBuf::from("binaries"),
            git_url: None,
            github_token: None,
        }
    }
}

/// Host operating system spelled the way release assets name it.
pub fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}
