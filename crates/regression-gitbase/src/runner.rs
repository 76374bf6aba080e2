use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use regression_core::{Binary, ProcessHandle, SampleResult};
use tracing::{debug, info, warn};

use crate::query::{Query, SqlConnector, execute, queries_for};

/// Samples of one query, in repetition order.
pub type QueryResults = IndexMap<String, Vec<SampleResult>>;
/// Samples per version, then per query id.
pub type ResultSet = IndexMap<String, QueryResults>;

/// What to do when a repetition fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort the whole run.
    #[default]
    FailFast,
    /// Log the failure, drop the query's samples for that version and go on.
    SkipAndContinue,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::FailFast),
            "skip" => Ok(Self::SkipAndContinue),
            _ => Err(format!("unknown error policy '{s}', expected: fail, skip")),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FailFast => "fail",
            Self::SkipAndContinue => "skip",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Repetitions per query; values below 1 run once.
    pub repeat: usize,
    pub on_error: ErrorPolicy,
    /// Upper bound for executing one query, connection excluded.
    pub timeout: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            repeat: 3,
            on_error: ErrorPolicy::FailFast,
            timeout: None,
        }
    }
}

/// Everything measured in a run.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
    /// Versions in the order they were given.
    pub versions: Vec<String>,
    /// Every query seen, first occurrence wins.
    pub queries: Vec<Query>,
    pub results: ResultSet,
}

impl RunResults {
    pub fn samples(&self, version: &str, query: &str) -> Option<&[SampleResult]> {
        self.results
            .get(version)
            .and_then(|q| q.get(query))
            .map(Vec::as_slice)
    }
}

/// Runs every query of every version `repeat` times against a fresh server.
pub struct BenchmarkRunner<C, F> {
    connector: C,
    server: F,
    options: RunOptions,
}

impl<C, F, H> BenchmarkRunner<C, F>
where
    C: SqlConnector,
    F: Fn(&Binary) -> H,
    H: ProcessHandle + Send + 'static,
{
    /// `server` creates the (not yet started) server for a binary.
    pub fn new(connector: C, server: F, options: RunOptions) -> Self {
        Self {
            connector,
            server,
            options,
        }
    }

    /// # Errors
    ///
    /// With [`ErrorPolicy::FailFast`], returns the first failing
    /// repetition's error. Invalid query files always abort.
    pub async fn run(&self, binaries: &[Binary]) -> Result<RunResults> {
        let times = self.options.repeat.max(1);
        let mut run = RunResults::default();

        for binary in binaries {
            info!(version = %binary.version, "running version tests");
            run.versions.push(binary.version.clone());

            let queries = queries_for(binary)?;
            let mut results = QueryResults::new();

            'query: for query in &queries {
                if !run.queries.iter().any(|q| q.id == query.id) {
                    run.queries.push(query.clone());
                }

                let mut samples = Vec::with_capacity(times);
                for i in 0..times {
                    info!(query.id = %query.id, query.name = %query.name, repetition = i + 1, "running query");
                    match self.repetition(binary, query).await {
                        Ok(sample) => samples.push(sample),
                        Err(e) => match self.options.on_error {
                            ErrorPolicy::FailFast => {
                                return Err(e.context(format!(
                                    "version {} query {} failed",
                                    binary.version, query.id
                                )));
                            }
                            ErrorPolicy::SkipAndContinue => {
                                warn!(version = %binary.version, query.id = %query.id, error = %format!("{e:#}"), "skipping query");
                                continue 'query;
                            }
                        },
                    }
                }
                results.insert(query.id.clone(), samples);
            }

            run.results.insert(binary.version.clone(), results);
        }

        Ok(run)
    }

    async fn repetition(&self, binary: &Binary, query: &Query) -> Result<SampleResult> {
        // Starting waits for the server to accept connections; keep that off
        // the async workers.
        let server = (self.server)(binary);
        let (mut server, started) = tokio::task::spawn_blocking(move || {
            let mut server = server;
            let started = server.start();
            (server, started)
        })
        .await
        .context("server start task failed")?;
        started.with_context(|| format!("could not start {}", binary.path.display()))?;

        let measured = self.measure(query).await;
        let stopped = server.stop();
        let (wall, rows) = measured?;
        stopped.context("could not stop server")?;

        let sample = SampleResult::new(wall, server.resource_usage(), rows);
        info!(wall = ?sample.wall, memory = sample.memory, rows, "finished query");
        Ok(sample)
    }

    /// Connect, then time only the execution of the query's statements.
    async fn measure(&self, query: &Query) -> Result<(Duration, u64)> {
        let mut client = self.connector.connect().await?;

        let start = Instant::now();
        let rows = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, execute(client.as_mut(), query))
                .await
                .map_err(|_| anyhow!("query {} timed out after {limit:?}", query.id))??,
            None => execute(client.as_mut(), query).await?,
        };
        let wall = start.elapsed();

        if let Err(e) = client.disconnect().await {
            debug!(error = %e, "disconnect failed");
        }
        Ok((wall, rows))
    }
}
