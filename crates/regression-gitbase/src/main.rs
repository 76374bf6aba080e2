#![doc = include_str!("../README.md")]

use core::time::Duration;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use bpaf::Bpaf;
use regression_core::{Aggregation, Binary, BinaryResolver, Config, GithubReleases};
use regression_gitbase::repos::{default_repositories, load_repositories};
use regression_gitbase::server::PORT;
use regression_gitbase::tool::{self, GITHUB_OWNER, GITHUB_REPO};
use regression_gitbase::{
    BenchmarkRunner, CompareOptions, ErrorPolicy, GitbaseServer, MySqlConnector, Repositories,
    RunOptions, compare_versions, report,
};
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version, generate(cli))]
#[allow(clippy::struct_excessive_bools)]
/// gitbase regression tester
///
/// Runs several versions of gitbase and compares query times and resource
/// usage. Versions are given as a release (v0.12.1), latest, a branch or
/// tag of the gitbase repository (remote:master), a branch or tag of the
/// repository in the current directory (local:fix/some-bug), a pull
/// request (pull:266) or the path to a gitbase binary.
struct Cli {
    /// Directory to store binaries
    #[bpaf(long("binaries"), env("REG_BINARIES"), argument("DIR"), fallback(PathBuf::from("binaries")))]
    binaries: PathBuf,

    /// Directory to store repositories
    #[bpaf(long("repos"), env("REG_REPOS"), argument("DIR"), fallback(PathBuf::from("repos")))]
    repos: PathBuf,

    /// URL to the gitbase repository for remote: and pull: versions
    #[bpaf(long("url"), env("REG_GITURL"), argument("URL"))]
    url: Option<String>,

    /// YAML file with the list of repositories
    #[bpaf(long("repos-file"), env("REG_REPOS_FILE"), argument("FILE"))]
    repos_file: Option<PathBuf>,

    /// Highest complexity of the repositories to test
    #[bpaf(short('c'), long("complexity"), env("REG_COMPLEXITY"), argument("N"), fallback(1))]
    complexity: u32,

    /// Number of times each query is run
    #[bpaf(short('n'), long("repeat"), env("REG_REPEAT"), argument("N"), fallback(3))]
    repeat: usize,

    /// Token used to connect to the GitHub API
    #[bpaf(short('t'), long("token"), env("REG_TOKEN"), argument("TOKEN"))]
    token: Option<String>,

    /// Maximum tolerated regression in percent
    #[bpaf(long("allowance"), env("REG_ALLOWANCE"), argument("PERCENT"), fallback(10.0))]
    allowance: f64,

    /// How repetitions are combined: average or best
    #[bpaf(long("aggregate"), argument("MODE"), fallback(Aggregation::Average), display_fallback)]
    aggregate: Aggregation,

    /// What to do when a query fails: fail or skip
    #[bpaf(long("on-error"), argument("POLICY"), fallback(ErrorPolicy::FailFast), display_fallback)]
    on_error: ErrorPolicy,

    /// Maximum time for one query execution (e.g. "30s", "5m")
    #[bpaf(long("timeout"), argument::<String>("DURATION"), parse(parse_duration), optional)]
    timeout: Option<Duration>,

    /// List available repositories and exit
    #[bpaf(long("show-repos"), switch)]
    show_repos: bool,

    /// Save CSV plot files with the last version's results
    #[bpaf(long("csv"), switch)]
    csv: bool,

    #[bpaf(positional("VERSION"))]
    versions: Vec<String>,
}

fn parse_duration(s: String) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(&s)
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            binary_cache: self.binaries.clone(),
            git_url: self.url.clone(),
            github_token: self.token.clone(),
            ..Config::default()
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            repeat: self.repeat,
            on_error: self.on_error,
            timeout: self.timeout,
        }
    }

    fn compare_options(&self) -> CompareOptions {
        CompareOptions {
            aggregation: self.aggregate,
            allowance: self.allowance,
        }
    }

    fn repositories(&self) -> Result<Repositories> {
        let list = match &self.repos_file {
            Some(file) => load_repositories(file)?,
            None => default_repositories(),
        };
        Ok(Repositories::new(self.repos.clone(), self.complexity, list))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // REGRESSION_LOG overrides the default `info` level; verbose span
    // entry/exit only when it is set explicitly.
    let (filter, explicit) = match tracing_subscriber::EnvFilter::try_from_env("REGRESSION_LOG") {
        Ok(f) => (f, true),
        Err(_) => (tracing_subscriber::EnvFilter::new("info"), false),
    };
    tracing_subscriber::registry()
        .with(
            tracing_tree::HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(true)
                .with_indent_lines(true)
                .with_verbose_exit(explicit)
                .with_verbose_entry(explicit)
                .with_timer(tracing_tree::time::Uptime::default())
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();

    let cli = cli().run();

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

/// Returns whether every comparison passed.
async fn run(cli: &Cli) -> Result<bool> {
    let repos = cli.repositories()?;
    if cli.show_repos {
        let mut stdout = io::stdout().lock();
        repos.show(&mut stdout)?;
        stdout.flush()?;
        return Ok(true);
    }
    if cli.versions.is_empty() {
        bail!("there should be at least one version");
    }

    info!("downloading repositories");
    repos.download().context("could not prepare repositories")?;
    let fixtures = repos.links_dir()?;

    info!("preparing gitbase binaries");
    let binaries = resolve_all(cli).await?;

    let runner = BenchmarkRunner::new(
        MySqlConnector::new(&GitbaseServer::url(PORT)),
        |binary: &Binary| GitbaseServer::new(&binary.path, &fixtures),
        cli.run_options(),
    );
    let results = runner.run(&binaries).await?;

    let mut stdout = io::stdout().lock();
    report::print_table(&mut stdout, &results)?;
    let ok = compare_versions(&mut stdout, &results, cli.compare_options())?;
    stdout.flush()?;

    if ok && cli.csv {
        let written = report::save_csv(Path::new("."), &results)?;
        info!(files = written.len(), "saved csv files");
    }
    Ok(ok)
}

async fn resolve_all(cli: &Cli) -> Result<Vec<Binary>> {
    let releases = GithubReleases::new(GITHUB_OWNER, GITHUB_REPO, cli.token.clone());
    let resolver = BinaryResolver::new(cli.config(), tool::gitbase(), releases);

    let mut binaries = Vec::with_capacity(cli.versions.len());
    for version in &cli.versions {
        let binary = resolver
            .resolve(version)
            .await
            .with_context(|| format!("could not prepare gitbase {version}"))?;
        info!(version = %version, path = %binary.path.display(), "gitbase ready");
        binaries.push(binary);
    }
    Ok(binaries)
}
