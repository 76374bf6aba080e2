use core::time::Duration;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regression_core::Aggregation;

use crate::runner::RunResults;

const RESET: &str = "\x1b[0m";
const BOLD_YELLOW: &str = "\x1b[1;33m";
const BOLD_WHITE: &str = "\x1b[1;37m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_RED: &str = "\x1b[1;31m";

const MISSING: &str = "--";

/// Print a table of the fastest wall time per query and version.
///
/// The fastest version of each row is green, the slowest red.
///
/// # Errors
///
/// Returns the error from writing to `out`.
pub fn print_table(out: &mut dyn Write, run: &RunResults) -> io::Result<()> {
    let mut rows: Vec<(String, Vec<Option<Duration>>)> = Vec::with_capacity(run.queries.len());
    for query in &run.queries {
        let times = run
            .versions
            .iter()
            .map(|v| {
                run.samples(v, &query.id)
                    .and_then(|s| s.iter().map(|s| s.wall).min())
            })
            .collect();
        rows.push((query.id.clone(), times));
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|(_, times)| {
            times
                .iter()
                .map(|t| t.map_or_else(|| MISSING.to_string(), |t| format!("{t:?}")))
                .collect()
        })
        .collect();

    let id_width = rows
        .iter()
        .map(|(id, _)| id.len())
        .chain([2])
        .max()
        .unwrap_or(2);
    let widths: Vec<usize> = run
        .versions
        .iter()
        .enumerate()
        .map(|(i, v)| {
            cells
                .iter()
                .map(|row| row[i].len())
                .chain([v.len()])
                .max()
                .unwrap_or(0)
        })
        .collect();

    write!(out, "{BOLD_YELLOW} {:<id_width$} {RESET}", "ID")?;
    for (version, width) in run.versions.iter().zip(&widths) {
        write!(out, "|{BOLD_YELLOW} {version:<width$} {RESET}")?;
    }
    writeln!(out)?;

    for ((id, times), row) in rows.iter().zip(&cells) {
        write!(out, "{BOLD_WHITE} {id:<id_width$} {RESET}")?;
        let (fastest, slowest) = extremes(times);
        for (i, (cell, width)) in row.iter().zip(&widths).enumerate() {
            let color = if Some(i) == fastest {
                BOLD_GREEN
            } else if Some(i) == slowest {
                BOLD_RED
            } else {
                BOLD_WHITE
            };
            write!(out, "|{color} {cell:<width$} {RESET}")?;
        }
        writeln!(out)?;
    }
    writeln!(out)
}

/// Indices of the smallest and largest present values.
fn extremes(times: &[Option<Duration>]) -> (Option<usize>, Option<usize>) {
    let present = || times.iter().enumerate().filter_map(|(i, t)| t.map(|t| (i, t)));
    let fastest = present().min_by_key(|(_, t)| *t).map(|(i, _)| i);
    let slowest = present().max_by_key(|(_, t)| *t).map(|(i, _)| i);
    (fastest, slowest)
}

/// Write plot files for the last version: one `plot_{id}_{metric}.csv`
/// per query and metric, each holding a header line and the averaged value.
/// Durations are in nanoseconds and memory in bytes.
///
/// # Errors
///
/// Returns an error if a file cannot be written.
pub fn save_csv(dir: &Path, run: &RunResults) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    let Some(version) = run.versions.last() else {
        return Ok(written);
    };

    for query in &run.queries {
        let Some(result) = run
            .samples(version, &query.id)
            .and_then(|s| Aggregation::Average.aggregate(s))
        else {
            continue;
        };

        let metrics = [
            ("memory", u128::from(result.memory)),
            ("wtime", result.wall.as_nanos()),
            ("stime", result.system.as_nanos()),
            ("utime", result.user.as_nanos()),
            ("rows", u128::from(result.rows)),
        ];
        for (metric, value) in metrics {
            let path = dir.join(format!("plot_{}_{metric}.csv", query.id));
            std::fs::write(&path, format!("{metric}\n{value}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }
    }
    Ok(written)
}
