use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::io::{self, Write};

use crate::server::ResourceUsage;

/// Measurements of one timed execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleResult {
    /// Wall clock time around query execution only.
    pub wall: Duration,
    pub user: Duration,
    pub system: Duration,
    /// Peak resident memory of the server, in bytes.
    pub memory: u64,
    pub rows: u64,
}

impl SampleResult {
    pub fn new(wall: Duration, usage: ResourceUsage, rows: u64) -> Self {
        Self {
            wall,
            user: usage.user,
            system: usage.system,
            memory: usage.max_rss,
            rows,
        }
    }
}

/// How repeated samples are reduced to one representative result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregation {
    /// Per-metric integer mean.
    #[default]
    Average,
    /// The whole sample with the lowest wall time.
    BestOf,
}

impl Aggregation {
    /// `None` for an empty slice.
    pub fn aggregate(self, samples: &[SampleResult]) -> Option<SampleResult> {
        match self {
            Self::Average => average(samples),
            Self::BestOf => samples.iter().min_by_key(|s| s.wall).copied(),
        }
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "average" | "avg" => Ok(Self::Average),
            "best" | "best-of" => Ok(Self::BestOf),
            other => Err(format!("unknown aggregation '{other}', expected average or best")),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Average => "average",
            Self::BestOf => "best",
        })
    }
}

fn average(samples: &[SampleResult]) -> Option<SampleResult> {
    if samples.is_empty() {
        return None;
    }
    let n = u32::try_from(samples.len()).ok()?;
    let sum = |f: fn(&SampleResult) -> u64| samples.iter().map(f).sum::<u64>() / u64::from(n);

    Some(SampleResult {
        wall: samples.iter().map(|s| s.wall).sum::<Duration>() / n,
        user: samples.iter().map(|s| s.user).sum::<Duration>() / n,
        system: samples.iter().map(|s| s.system).sum::<Duration>() / n,
        memory: sum(|s| s.memory),
        rows: sum(|s| s.rows),
    })
}

/// Percentage change from `a` to `b`: `(b - a) / a * 100`.
///
/// Not guarded against `a == 0`; the result is then infinite or NaN, and
/// NaN is never within any allowance.
#[allow(clippy::cast_precision_loss)]
pub fn percent(a: i64, b: i64) -> f64 {
    let diff = b - a;
    (diff as f64 / a as f64) * 100.0
}

fn percent_u64(a: u64, b: u64) -> f64 {
    percent(saturate(a), saturate(b))
}

fn percent_duration(a: Duration, b: Duration) -> f64 {
    percent(saturate(a.as_nanos()), saturate(b.as_nanos()))
}

fn saturate<T: TryInto<i64>>(v: T) -> i64 {
    v.try_into().unwrap_or(i64::MAX)
}

/// `true` iff `delta` is strictly below `allowance`.
pub fn within_allowance(delta: f64, allowance: f64) -> bool {
    allowance > delta
}

/// Percentage deltas between two aggregated results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Comparison {
    pub memory: f64,
    pub wall: f64,
    pub system: f64,
    pub user: f64,
    pub rows: f64,
}

impl Comparison {
    /// Zero memory on both sides means the platform reported no usage; the
    /// delta is then 0 rather than NaN.
    pub fn new(a: &SampleResult, b: &SampleResult) -> Self {
        let memory = if a.memory == 0 && b.memory == 0 {
            0.0
        } else {
            percent_u64(a.memory, b.memory)
        };
        Self {
            memory,
            wall: percent_duration(a.wall, b.wall),
            system: percent_duration(a.system, b.system),
            user: percent_duration(a.user, b.user),
            rows: percent_u64(a.rows, b.rows),
        }
    }

    /// Memory and wall time gate the verdict; CPU times are informational.
    pub fn passes(&self, allowance: f64) -> bool {
        within_allowance(self.memory, allowance) && within_allowance(self.wall, allowance)
    }
}

/// Compare `a` to `b`, write one line per metric to `out`, and return
/// whether the comparison passes.
///
/// Lines read `{Metric}: {a} -> {b} ({delta}), {within}`.
///
/// # Errors
///
/// Returns the error from writing to `out`.
pub fn compare_print(
    out: &mut dyn Write,
    a: &SampleResult,
    b: &SampleResult,
    allowance: f64,
) -> io::Result<bool> {
    let c = Comparison::new(a, b);
    print_line(out, "Memory", a.memory, b.memory, c.memory, allowance)?;
    print_line(out, "Wtime", Fmt(a.wall), Fmt(b.wall), c.wall, allowance)?;
    print_line(out, "Stime", Fmt(a.system), Fmt(b.system), c.system, allowance)?;
    print_line(out, "Utime", Fmt(a.user), Fmt(b.user), c.user, allowance)?;
    Ok(c.passes(allowance))
}

/// Write a single comparison line.
///
/// # Errors
///
/// Returns the error from writing to `out`.
pub fn print_line(
    out: &mut dyn Write,
    metric: &str,
    a: impl fmt::Display,
    b: impl fmt::Display,
    delta: f64,
    allowance: f64,
) -> io::Result<()> {
    writeln!(
        out,
        "{metric}: {a} -> {b} ({delta}), {}",
        within_allowance(delta, allowance)
    )
}

struct Fmt(Duration);

impl fmt::Display for Fmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(wall_ms: u64, memory: u64) -> SampleResult {
        SampleResult {
            wall: Duration::from_millis(wall_ms),
            memory,
            ..SampleResult::default()
        }
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn percent_literals() {
        assert_eq!(percent(100, 110), 10.0);
        assert_eq!(percent(200, 150), -25.0);
        assert_eq!(percent(7, 7), 0.0);
        assert_eq!(percent(-4, -4), 0.0);
    }

    #[test]
    fn percent_from_zero_is_not_finite() {
        assert!(percent(0, 5).is_infinite());
        assert!(percent(0, 0).is_nan());
        assert!(!within_allowance(percent(0, 0), 10.0));
    }

    #[test]
    fn allowance_boundary_is_exclusive() {
        assert!(within_allowance(9.99, 10.0));
        assert!(!within_allowance(10.0, 10.0));
        assert!(within_allowance(-50.0, 10.0));
    }

    #[test]
    fn best_of_keeps_whole_sample() {
        let samples = [sample(5, 10), sample(3, 20)];
        let best = Aggregation::BestOf.aggregate(&samples);
        assert_eq!(best, Some(sample(3, 20)));
    }

    #[test]
    fn average_is_integer_mean() {
        let samples = [
            SampleResult {
                wall: Duration::from_millis(10),
                user: Duration::from_millis(4),
                system: Duration::from_millis(1),
                memory: 100,
                rows: 3,
            },
            SampleResult {
                wall: Duration::from_millis(20),
                user: Duration::from_millis(6),
                system: Duration::from_millis(2),
                memory: 201,
                rows: 4,
            },
        ];
        let avg = Aggregation::Average.aggregate(&samples);
        assert_eq!(
            avg,
            Some(SampleResult {
                wall: Duration::from_millis(15),
                user: Duration::from_millis(5),
                system: Duration::from_micros(1500),
                memory: 150,
                rows: 3,
            })
        );
    }

    #[test]
    fn empty_aggregation() {
        assert!(Aggregation::Average.aggregate(&[]).is_none());
        assert!(Aggregation::BestOf.aggregate(&[]).is_none());
    }

    #[test]
    fn wall_regression_gates_verdict() {
        let a = sample(100, 1000);
        assert!(Comparison::new(&a, &sample(105, 1000)).passes(10.0));
        assert!(!Comparison::new(&a, &sample(115, 1000)).passes(10.0));
    }

    #[test]
    fn memory_regression_gates_verdict() {
        let a = sample(100, 1000);
        assert!(!Comparison::new(&a, &sample(100, 1200)).passes(10.0));
    }

    #[test]
    fn unreported_memory_does_not_fail() {
        let c = Comparison::new(&sample(100, 0), &sample(105, 0));
        assert!(c.memory.abs() < f64::EPSILON);
        assert!(c.passes(10.0));
        assert!(Comparison::new(&sample(100, 0), &sample(100, 10)).memory.is_infinite());
    }

    #[test]
    fn cpu_time_does_not_gate() {
        let a = SampleResult {
            user: Duration::from_millis(10),
            system: Duration::from_millis(10),
            ..sample(100, 1000)
        };
        let b = SampleResult {
            user: Duration::from_millis(50),
            system: Duration::from_millis(50),
            ..sample(100, 1000)
        };
        let c = Comparison::new(&a, &b);
        assert!(c.user > 10.0);
        assert!(c.passes(10.0));
    }

    #[test]
    fn compare_print_lines() -> anyhow::Result<()> {
        let a = SampleResult {
            wall: Duration::from_millis(100),
            user: Duration::from_millis(40),
            system: Duration::from_millis(10),
            memory: 1000,
            rows: 1,
        };
        let b = SampleResult {
            wall: Duration::from_millis(150),
            memory: 1000,
            ..a
        };

        let mut out = Vec::new();
        let ok = compare_print(&mut out, &a, &b, 10.0)?;
        assert!(!ok);

        let text = String::from_utf8(out)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "Memory: 1000 -> 1000 (0), true",
                "Wtime: 100ms -> 150ms (50), false",
                "Stime: 10ms -> 10ms (0), true",
                "Utime: 40ms -> 40ms (0), true",
            ]
        );
        Ok(())
    }

    #[test]
    fn parse_aggregation() {
        assert_eq!("average".parse(), Ok(Aggregation::Average));
        assert_eq!("best".parse(), Ok(Aggregation::BestOf));
        assert!("median".parse::<Aggregation>().is_err());
        assert_eq!(Aggregation::BestOf.to_string(), "best");
    }
}
