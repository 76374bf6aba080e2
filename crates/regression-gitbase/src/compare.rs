use std::io::{self, Write};

use regression_core::result::print_line;
use regression_core::{Aggregation, SampleResult, compare_print, percent};

use crate::runner::RunResults;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareOptions {
    pub aggregation: Aggregation,
    /// Maximum tolerated regression, in percent.
    pub allowance: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::Average,
            allowance: 10.0,
        }
    }
}

/// Compare each pair of consecutive versions query by query, writing the
/// report to `out`. Returns `true` when every comparison passed.
///
/// Queries missing from either version of a pair are reported and skipped.
///
/// # Errors
///
/// Returns the error from writing to `out`.
pub fn compare_versions(
    out: &mut dyn Write,
    run: &RunResults,
    options: CompareOptions,
) -> io::Result<bool> {
    let mut ok = true;

    for pair in run.versions.windows(2) {
        let [a, b] = pair else { continue };
        writeln!(out, "{a} - {b} ####")?;

        for query in &run.queries {
            writeln!(out, "## Query {{ID: {}, Name: {}}} ##", query.id, query.name)?;

            let Some(sa) = aggregate(out, run, a, &query.id, options.aggregation)? else {
                continue;
            };
            let Some(sb) = aggregate(out, run, b, &query.id, options.aggregation)? else {
                continue;
            };

            ok &= compare_query(out, &sa, &sb, options.allowance)?;
        }
    }

    Ok(ok)
}

fn aggregate(
    out: &mut dyn Write,
    run: &RunResults,
    version: &str,
    query: &str,
    aggregation: Aggregation,
) -> io::Result<Option<SampleResult>> {
    let result = run
        .samples(version, query)
        .and_then(|s| aggregation.aggregate(s));
    if result.is_none() {
        writeln!(out, "# Skip - Query.ID: {query} not found for version: {version}")?;
    }
    Ok(result)
}

/// Resource comparison plus the row count check.
///
/// Rows only fail the comparison when the change exceeds the allowance, so
/// queries that return no rows in both versions still pass.
///
/// # Errors
///
/// Returns the error from writing to `out`.
pub fn compare_query(
    out: &mut dyn Write,
    a: &SampleResult,
    b: &SampleResult,
    allowance: f64,
) -> io::Result<bool> {
    let mut ok = compare_print(out, a, b, allowance)?;

    let rows = percent(saturate(a.rows), saturate(b.rows));
    if rows > allowance {
        ok = false;
    }
    print_line(out, "Rows", a.rows, b.rows, rows, allowance)?;
    Ok(ok)
}

fn saturate(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
