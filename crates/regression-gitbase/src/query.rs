use std::path::Path;

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable as _;
use regression_core::Binary;
use serde::Deserialize;
use tracing::debug;

use crate::tool::QUERIES_FILE;

/// A named benchmark made of one or more SQL statements.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Query {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Statements")]
    pub statements: Vec<String>,
}

impl Query {
    pub fn new(id: &str, name: &str, statements: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            statements: statements.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

/// Queries used when a binary carries no query file of its own.
pub fn default_queries() -> Vec<Query> {
    vec![
        Query::new("query0", "Count repositories", &["SELECT COUNT(*) FROM repositories"]),
        Query::new(
            "query1",
            "Last commit messages in HEAD for every repository",
            &["SELECT c.commit_message FROM refs r JOIN commits c ON r.commit_hash = c.commit_hash WHERE r.ref_name = 'HEAD'"],
        ),
        Query::new(
            "query2",
            "All commit messages",
            &["SELECT commit_message FROM commits"],
        ),
        Query::new(
            "query3",
            "Number of commits per repository",
            &["SELECT repository_id, COUNT(*) AS commit_count FROM commits GROUP BY repository_id"],
        ),
        Query::new(
            "query4",
            "Files in HEAD trees",
            &["SELECT t.tree_entry_name FROM refs r NATURAL JOIN commit_trees ct NATURAL JOIN tree_entries t WHERE r.ref_name = 'HEAD'"],
        ),
        Query::new(
            "query5",
            "Committers with more than ten commits",
            &["SELECT committer_email, COUNT(*) AS n FROM commits GROUP BY committer_email HAVING n > 10"],
        ),
        Query::new(
            "query6",
            "Go files in HEAD",
            &["SELECT f.file_path FROM refs r NATURAL JOIN commit_files cf NATURAL JOIN files f WHERE r.ref_name = 'HEAD' AND f.file_path LIKE '%.go'"],
        ),
    ]
}

/// Parse a YAML sequence of queries.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_queries(path: &Path) -> Result<Vec<Query>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// Queries for `binary`: its own query file when it was built from a
/// checkout that had one, otherwise the built-in list.
///
/// # Errors
///
/// Returns an error if the binary's query file exists but is invalid.
pub fn queries_for(binary: &Binary) -> Result<Vec<Query>> {
    match binary.extra_file(QUERIES_FILE) {
        Some(path) => {
            debug!(path = %path.display(), "loading queries");
            load_queries(&path)
        }
        None => Ok(default_queries()),
    }
}

/// An open connection able to run statements.
#[async_trait::async_trait]
pub trait SqlClient: Send {
    /// Run `statement` and return the number of rows it produced.
    ///
    /// # Errors
    ///
    /// Returns the driver error.
    async fn query_rows(&mut self, statement: &str) -> Result<u64>;

    /// # Errors
    ///
    /// Returns the driver error.
    async fn disconnect(self: Box<Self>) -> Result<()>;
}

/// Opens [`SqlClient`] connections to the server under test.
#[async_trait::async_trait]
pub trait SqlConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached.
    async fn connect(&self) -> Result<Box<dyn SqlClient>>;
}

/// Run every statement of `query` in order and return the total row count.
///
/// # Errors
///
/// Returns the first statement error.
pub async fn execute(client: &mut dyn SqlClient, query: &Query) -> Result<u64> {
    let mut rows = 0;
    for statement in &query.statements {
        rows += client
            .query_rows(statement)
            .await
            .with_context(|| format!("query {} failed: {statement}", query.id))?;
    }
    Ok(rows)
}

/// MySQL protocol connector.
pub struct MySqlConnector {
    url: String,
}

impl MySqlConnector {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl SqlConnector for MySqlConnector {
    async fn connect(&self) -> Result<Box<dyn SqlClient>> {
        let conn = mysql_async::Conn::from_url(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect to {}", self.url))?;
        Ok(Box::new(MySqlClient { conn }))
    }
}

struct MySqlClient {
    conn: mysql_async::Conn,
}

#[async_trait::async_trait]
impl SqlClient for MySqlClient {
    async fn query_rows(&mut self, statement: &str) -> Result<u64> {
        let mut result = self.conn.query_iter(statement).await?;
        let mut rows = 0;
        while result.next().await?.is_some() {
            rows += 1;
        }
        result.drop_result().await?;
        Ok(rows)
    }

    async fn disconnect(self: Box<Self>) -> Result<()> {
        self.conn.disconnect().await?;
        Ok(())
    }
}
