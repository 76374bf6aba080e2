use std::process::ExitStatus;

use thiserror::Error;

/// Errors produced while resolving, downloading or building a binary.
///
/// None of these are retried internally; the caller decides whether a
/// failed version aborts the whole run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Version {0} is invalid")]
    InvalidVersion(String),

    #[error("Reference {0} not found")]
    ReferenceNotFound(String),

    #[error("Version '{0}' not found")]
    VersionNotFound(String),

    #[error("Asset named '{asset}' not found in release '{version}'")]
    AssetNotFound { asset: String, version: String },

    #[error("binary {binary} not found in release tarball (expected {entry})")]
    BinaryNotFoundInArchive { binary: String, entry: String },

    /// A git or build step process exited unsuccessfully.
    #[error("{program} {args} failed ({status}): {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("release API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid release list: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
