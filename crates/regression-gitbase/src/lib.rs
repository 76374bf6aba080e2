#![doc = include_str!("../README.md")]

extern crate alloc;

pub mod compare;
pub mod query;
pub mod repos;
pub mod report;
pub mod runner;
pub mod server;
pub mod tool;

pub use compare::{CompareOptions, compare_versions};
pub use query::{MySqlConnector, Query, SqlClient, SqlConnector};
pub use repos::{Repositories, Repository};
pub use runner::{BenchmarkRunner, ErrorPolicy, ResultSet, RunOptions, RunResults};
pub use server::GitbaseServer;
