use core::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

static RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v[0-9]+\.[0-9]+\.[0-9]+$").expect("release regex is valid"));

static GIT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(local|remote|pull):(.+)$").expect("git ref regex is valid"));

/// Sentinel resolved lazily to the newest published release.
pub const LATEST: &str = "latest";

/// Where a git reference is fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitSource {
    /// The repository in the current working directory.
    Local,
    /// The tool's canonical repository (or the configured URL override).
    Remote,
    /// A numbered pull request head of the canonical repository.
    Pull,
}

impl GitSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Pull => "pull",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            "pull" => Some(Self::Pull),
            _ => None,
        }
    }
}

impl fmt::Display for GitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed form of a user supplied version specifier.
///
/// Every string maps to exactly one variant: release tags are checked
/// first, then `latest`, then `source:reference`, and anything else is
/// taken to be the path of a pre-built binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// `vMAJOR.MINOR.PATCH`
    Release(String),
    Latest,
    GitRef {
        source: GitSource,
        reference: String,
    },
    Path(PathBuf),
}

impl VersionSpec {
    pub fn classify(version: &str) -> Self {
        if RELEASE.is_match(version) {
            return Self::Release(version.to_string());
        }

        if version == LATEST {
            return Self::Latest;
        }

        if let Some(caps) = GIT_REF.captures(version)
            && let Some(source) = GitSource::parse(&caps[1])
        {
            return Self::GitRef {
                source,
                reference: caps[2].to_string(),
            };
        }

        Self::Path(PathBuf::from(version))
    }

    pub fn is_release(&self) -> bool {
        matches!(self, Self::Release(_))
    }

    pub fn is_git_ref(&self) -> bool {
        matches!(self, Self::GitRef { .. })
    }
}

impl From<&str> for VersionSpec {
    fn from(version: &str) -> Self {
        Self::classify(version)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Release(tag) => f.write_str(tag),
            Self::Latest => f.write_str(LATEST),
            Self::GitRef { source, reference } => write!(f, "{source}:{reference}"),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_tags() {
        for tag in ["v0.12.1", "v1.0.0", "v10.200.3000"] {
            assert_eq!(VersionSpec::classify(tag), VersionSpec::Release(tag.into()));
        }
    }

    #[test]
    fn almost_release_tags_are_paths() {
        for s in ["0.12.1", "v0.12", "v0.12.1-rc1", "v0.12.1 ", "vx.y.z"] {
            assert_eq!(VersionSpec::classify(s), VersionSpec::Path(s.into()), "{s}");
        }
    }

    #[test]
    fn latest_sentinel() {
        assert_eq!(VersionSpec::classify("latest"), VersionSpec::Latest);
        assert_eq!(
            VersionSpec::classify("Latest"),
            VersionSpec::Path("Latest".into())
        );
    }

    #[test]
    fn git_refs() {
        let cases = [
            ("remote:master", GitSource::Remote, "master"),
            ("local:fix/some-bug", GitSource::Local, "fix/some-bug"),
            ("pull:266", GitSource::Pull, "266"),
            ("remote:v0.11.0", GitSource::Remote, "v0.11.0"),
            ("remote:a:b", GitSource::Remote, "a:b"),
        ];
        for (input, source, reference) in cases {
            assert_eq!(
                VersionSpec::classify(input),
                VersionSpec::GitRef {
                    source,
                    reference: reference.into()
                },
                "{input}"
            );
        }
    }

    #[test]
    fn unknown_source_falls_through_to_path() {
        for s in ["origin:master", "remote:", "pull", ":master", "REMOTE:master"] {
            assert_eq!(VersionSpec::classify(s), VersionSpec::Path(s.into()), "{s}");
        }
    }

    #[test]
    fn paths() {
        assert_eq!(
            VersionSpec::classify("/path/to/gitbase"),
            VersionSpec::Path("/path/to/gitbase".into())
        );
        assert_eq!(VersionSpec::classify(""), VersionSpec::Path(PathBuf::new()));
    }

    #[test]
    fn display_round_trips_the_input() {
        for s in ["v1.2.3", "latest", "pull:12", "local:dev", "./gitbase"] {
            assert_eq!(VersionSpec::classify(s).to_string(), s);
        }
    }
}
