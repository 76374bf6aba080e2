#![doc = include_str!("../README.md")]

mod archive;
pub mod binary;
pub mod build;
pub mod config;
mod error;
pub mod releases;
pub mod result;
pub mod server;
pub mod tool;
pub mod version;

pub use binary::{Binary, BinaryResolver};
pub use build::{Build, BuildOutput};
pub use config::Config;
pub use error::{Error, Result};
pub use releases::{GithubReleases, Release, ReleaseClient, ReleaseSource};
pub use result::{Aggregation, Comparison, SampleResult, compare_print, percent};
pub use server::{ProcessHandle, ResourceUsage, Server};
pub use tool::{BuildStep, Tool};
pub use version::{GitSource, VersionSpec};
