//! Pluggable reporters for benchmark output.

use crate::config::IterationParams;
use crate::result::{RunSummary, Statistics, UnitOutcome};
use crate::unit::Mode;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Trait for run reporters.
pub trait Reporter: Send + Sync {
    /// Called once the units to run are known.
    fn run_start(&self, _units: &[&str], _params: &IterationParams) {}

    /// Called when a unit starts.
    fn unit_start(&self, _name: &str, _mode: Mode) {}

    /// Called when a unit finishes, successfully or not.
    fn unit_end(&self, _outcome: &UnitOutcome) {}

    /// Called when the run completes.
    fn run_end(&self, _summary: &RunSummary) {}
}

/// Console reporter that prints progress and a result table to stderr.
pub struct ConsoleReporter {
    show_percentiles: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            show_percentiles: true,
        }
    }

    /// Print sample-mode percentiles under each unit's result.
    pub fn show_percentiles(mut self, show: bool) -> Self {
        self.show_percentiles = show;
        self
    }

    fn format_score(v: f64) -> String {
        if v == 0.0 || (0.001..1e9).contains(&v.abs()) {
            format!("{v:.3}")
        } else {
            format!("{v:.3e}")
        }
    }

    /// Result table in the familiar `Benchmark Mode Cnt Score Error Units` layout.
    pub fn render_table(summary: &RunSummary) -> String {
        let rows: Vec<[String; 6]> = summary
            .outcomes
            .iter()
            .filter_map(UnitOutcome::statistics)
            .map(|s| {
                [
                    s.unit_name.clone(),
                    s.mode.label().to_string(),
                    s.count.to_string(),
                    Self::format_score(s.mean),
                    format!("± {}", Self::format_score(s.std_error)),
                    s.score_unit(),
                ]
            })
            .collect();

        let header = ["Benchmark", "Mode", "Cnt", "Score", "Error", "Units"].map(String::from);
        let mut widths = header.clone().map(|h| h.len());
        for row in &rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        for row in std::iter::once(&header).chain(&rows) {
            let line = format!(
                "{:<w0$}  {:>w1$}  {:>w2$}  {:>w3$}  {:>w4$}  {:<w5$}",
                row[0],
                row[1],
                row[2],
                row[3],
                row[4],
                row[5],
                w0 = widths[0],
                w1 = widths[1],
                w2 = widths[2],
                w3 = widths[3],
                w4 = widths[4],
                w5 = widths[5],
            );
            out.push_str(line.trim_end());
            out.push('\n');
        }
        out
    }

    fn describe(stats: &Statistics) -> String {
        format!(
            "{} ± {} {}  (min {}, max {}, n = {})",
            Self::format_score(stats.mean),
            Self::format_score(stats.std_error),
            stats.score_unit(),
            Self::format_score(stats.min),
            Self::format_score(stats.max),
            stats.count
        )
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn run_start(&self, units: &[&str], params: &IterationParams) {
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("  Benchmarks: {}", units.len());
        eprintln!(
            "  Forks: {}, Warmup: {}, Iterations: {}, Threads: {}",
            params.forks, params.warmup_iterations, params.measurement_iterations, params.threads
        );
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    fn unit_start(&self, name: &str, mode: Mode) {
        eprintln!("  # {name} ({mode})");
    }

    fn unit_end(&self, outcome: &UnitOutcome) {
        let line = match outcome {
            UnitOutcome::Success(stats) => {
                let mut line = format!("    {}", Self::describe(stats));
                if let (true, Some(p)) = (self.show_percentiles, &stats.percentiles) {
                    let unit = stats.time_unit;
                    line.push_str(&format!(
                        "\n    p50 {} {unit}, p90 {} {unit}, p99 {} {unit}, p99.9 {} {unit}, p100 {} {unit}",
                        Self::format_score(p.p50),
                        Self::format_score(p.p90),
                        Self::format_score(p.p99),
                        Self::format_score(p.p999),
                        Self::format_score(p.p100),
                    ));
                }
                line
            }
            UnitOutcome::Failed(f) => format!("    FAILED ({:?}): {}", f.kind, f.reason),
        };
        // single write so worker output cannot split the line
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{line}");
    }

    fn run_end(&self, summary: &RunSummary) {
        let mut out = String::new();
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        out.push_str(&Self::render_table(summary));
        let failures = summary.failures();
        if !failures.is_empty() {
            out.push_str(&format!("\n  {} benchmark(s) failed:\n", failures.len()));
            for f in failures {
                out.push_str(&format!("    {}: {}\n", f.unit_name, f.reason));
            }
        }
        out.push_str(&format!(
            "\n  Completed {} benchmarks in {:.2}s\n",
            summary.outcomes.len(),
            summary.total_duration.as_secs_f64()
        ));
        out.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        let _ = std::io::stderr().lock().write_all(out.as_bytes());
    }
}

/// JSON reporter that writes the run summary to a directory.
///
/// Each run lands in `<started_at>.json`; `latest.json` is overwritten with
/// the most recent run.
pub struct JsonReporter {
    output_dir: PathBuf,
}

impl JsonReporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write `summary` and return the path of the timestamped file.
    pub fn write(&self, summary: &RunSummary) -> std::io::Result<PathBuf> {
        write_json_results(&self.output_dir, summary)
    }
}

impl Reporter for JsonReporter {
    fn run_end(&self, summary: &RunSummary) {
        match self.write(summary) {
            Ok(path) => tracing::info!(path = %path.display(), "results written"),
            Err(e) => eprintln!("Warning: failed to write JSON results: {}", e),
        }
    }
}

fn write_json_results(output_dir: &Path, summary: &RunSummary) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::other)?;

    let path = output_dir.join(format!("{}.json", summary.started_at));
    std::fs::write(&path, &json)?;
    std::fs::write(output_dir.join("latest.json"), &json)?;

    Ok(path)
}

/// Combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        Self { reporters }
    }
}

impl Reporter for MultiReporter {
    fn run_start(&self, units: &[&str], params: &IterationParams) {
        for r in &self.reporters {
            r.run_start(units, params);
        }
    }

    fn unit_start(&self, name: &str, mode: Mode) {
        for r in &self.reporters {
            r.unit_start(name, mode);
        }
    }

    fn unit_end(&self, outcome: &UnitOutcome) {
        for r in &self.reporters {
            r.unit_end(outcome);
        }
    }

    fn run_end(&self, summary: &RunSummary) {
        for r in &self.reporters {
            r.run_end(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::result::{RunRecord, UnitFailure};
    use crate::unit::TimeUnit;
    use crate::RunOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn summary() -> RunSummary {
        RunSummary {
            started_at: "1700000000000".into(),
            total_duration: Duration::from_millis(1500),
            params: RunOptions::new().iteration_params(),
            outcomes: vec![
                UnitOutcome::Success(Statistics {
                    unit_name: "measure_right".into(),
                    mode: Mode::AverageTime,
                    time_unit: TimeUnit::Nanoseconds,
                    count: 5,
                    mean: 21.5,
                    std_dev: 0.5,
                    std_error: 0.2236,
                    min: 21.0,
                    max: 22.0,
                    percentiles: None,
                    scores: vec![21.0, 21.5, 21.5, 21.5, 22.0],
                    runs: vec![RunRecord { pid: 4242, samples: 5 }],
                }),
                UnitOutcome::Failed(UnitFailure {
                    unit_name: "broken".into(),
                    kind: FailureKind::Execution,
                    reason: "boom".into(),
                }),
            ],
        }
    }

    #[test]
    fn should_render_table_with_successful_units() {
        let table = ConsoleReporter::render_table(&summary());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Benchmark"));
        assert!(lines[1].contains("measure_right"));
        assert!(lines[1].contains("avgt"));
        assert!(lines[1].contains("21.500"));
        assert!(lines[1].contains("ns/op"));
    }

    #[test]
    fn should_format_scores_with_fixed_precision() {
        assert_eq!(ConsoleReporter::format_score(0.0), "0.000");
        assert_eq!(ConsoleReporter::format_score(12.34567), "12.346");
        assert!(ConsoleReporter::format_score(1e12).contains('e'));
    }

    #[test]
    fn should_write_timestamped_and_latest_json() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = JsonReporter::new(dir.path());

        let path = reporter.write(&summary()).unwrap();
        assert_eq!(path, dir.path().join("1700000000000.json"));

        let loaded = RunSummary::load(dir.path().join("latest.json")).unwrap();
        assert_eq!(loaded.outcomes.len(), 2);
        assert!(!loaded.success());
        assert_eq!(loaded.statistics()["measure_right"].count, 5);
    }

    struct Counting(Arc<AtomicUsize>);

    impl Reporter for Counting {
        fn unit_end(&self, _outcome: &UnitOutcome) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn should_fan_out_to_every_reporter() {
        let hits = Arc::new(AtomicUsize::new(0));
        let multi = MultiReporter::new(vec![
            Box::new(Counting(Arc::clone(&hits))),
            Box::new(Counting(Arc::clone(&hits))),
        ]);
        for outcome in &summary().outcomes {
            multi.unit_end(outcome);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
