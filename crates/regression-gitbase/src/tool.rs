use regression_core::{BuildStep, Tool};

/// Query definitions shipped in the gitbase source tree.
pub const QUERIES_FILE: &str = "regression.yml";

pub const GITHUB_OWNER: &str = "src-d";
pub const GITHUB_REPO: &str = "gitbase";

/// gitbase, built with its Makefile inside a GOPATH layout.
pub fn gitbase() -> Tool {
    Tool {
        name: "gitbase".to_string(),
        git_url: "https://github.com/src-d/gitbase".to_string(),
        project_path: "github.com/src-d/gitbase".to_string(),
        workspace_env: "GOPATH".to_string(),
        target_os: "linux".to_string(),
        build_steps: vec![BuildStep::new("", "make", &["dependencies", "packages"])],
        extra_files: vec![QUERIES_FILE.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_layout() {
        let tool = gitbase();
        assert_eq!(
            tool.release_asset("v0.12.1", "linux"),
            "gitbase_v0.12.1_linux_amd64.tar.gz"
        );
        assert_eq!(tool.dir_name("darwin"), "gitbase_darwin_amd64");
        assert!(tool.git_url.ends_with(&format!("{GITHUB_OWNER}/{GITHUB_REPO}")));
        assert_eq!(tool.extra_files, vec![QUERIES_FILE]);
    }
}
