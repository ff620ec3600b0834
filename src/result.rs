//! Samples, statistics and run outcomes.

use crate::config::{duration_serde, IterationParams};
use crate::error::FailureKind;
use crate::unit::{Mode, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One measurement iteration, merged across worker threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Timed nanoseconds, summed over threads.
    pub elapsed_nanos: u64,
    /// Invocations, summed over threads.
    pub operations: u64,
    /// Threads that contributed.
    pub threads: u32,
    /// Individually timed invocations (sample mode only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<u64>,
}

impl Sample {
    /// A single-thread timing sample.
    pub fn new(elapsed: Duration, operations: u64) -> Self {
        Self {
            elapsed_nanos: elapsed.as_nanos() as u64,
            operations,
            threads: 1,
            invocations: Vec::new(),
        }
    }

    /// Score of this sample for `mode`, expressed in `unit`.
    ///
    /// Time modes report time per operation. Throughput reports operations
    /// per unit of wall time, with thread time averaged back to wall time.
    pub fn score(&self, mode: Mode, unit: TimeUnit) -> f64 {
        if self.operations == 0 {
            return 0.0;
        }
        match mode {
            Mode::Throughput => {
                let wall = (self.elapsed_nanos.max(1) as f64) / self.threads.max(1) as f64;
                self.operations as f64 / wall * unit.nanos()
            }
            _ => unit.from_nanos(self.elapsed_nanos as f64 / self.operations as f64),
        }
    }
}

/// Invocation-time percentiles for sample mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub p999: f64,
    pub p100: f64,
}

/// One process's share of a unit's samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Process that measured: a fork, or the caller itself.
    pub pid: u32,
    pub samples: usize,
}

/// Summary of a unit's measurement samples, pooled over its runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub unit_name: String,
    pub mode: Mode,
    pub time_unit: TimeUnit,
    /// Number of samples over all runs.
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1).
    pub std_dev: f64,
    /// `std_dev / sqrt(n)`; zero when `n == 1`.
    pub std_error: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Percentiles>,
    /// Per-sample scores in measurement order.
    pub scores: Vec<f64>,
    /// One entry per fork, or a single one when run in-process.
    #[serde(default)]
    pub runs: Vec<RunRecord>,
}

impl Statistics {
    /// Unit label for the scores, e.g. `ns/op`.
    pub fn score_unit(&self) -> String {
        self.mode.score_unit(self.time_unit)
    }
}

/// Why a unit has no statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit_name: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Outcome of one selected unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Success(Statistics),
    Failed(UnitFailure),
}

impl UnitOutcome {
    pub fn unit_name(&self) -> &str {
        match self {
            UnitOutcome::Success(s) => &s.unit_name,
            UnitOutcome::Failed(f) => &f.unit_name,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success(_))
    }

    pub fn statistics(&self) -> Option<&Statistics> {
        match self {
            UnitOutcome::Success(s) => Some(s),
            UnitOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&UnitFailure> {
        match self {
            UnitOutcome::Failed(f) => Some(f),
            UnitOutcome::Success(_) => None,
        }
    }
}

/// Results of a whole run. Lists every selected unit, in selection order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unix milliseconds when the run started.
    pub started_at: String,
    /// Wall time of the whole run.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Iteration settings the run used.
    pub params: IterationParams,
    pub outcomes: Vec<UnitOutcome>,
}

impl RunSummary {
    /// True only if every selected unit succeeded.
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(UnitOutcome::is_success)
    }

    /// Statistics of the successful units, keyed by unit name.
    pub fn statistics(&self) -> BTreeMap<String, Statistics> {
        self.outcomes
            .iter()
            .filter_map(UnitOutcome::statistics)
            .map(|s| (s.unit_name.clone(), s.clone()))
            .collect()
    }

    /// Failures, in selection order.
    pub fn failures(&self) -> Vec<&UnitFailure> {
        self.outcomes.iter().filter_map(UnitOutcome::failure).collect()
    }

    pub fn get(&self, unit_name: &str) -> Option<&UnitOutcome> {
        self.outcomes.iter().find(|o| o.unit_name() == unit_name)
    }

    /// Load a summary from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str) -> Statistics {
        Statistics {
            unit_name: name.to_string(),
            mode: Mode::AverageTime,
            time_unit: TimeUnit::Nanoseconds,
            count: 1,
            mean: 1.0,
            std_dev: 0.0,
            std_error: 0.0,
            min: 1.0,
            max: 1.0,
            percentiles: None,
            scores: vec![1.0],
            runs: vec![RunRecord { pid: 1, samples: 1 }],
        }
    }

    #[test]
    fn should_score_average_time_per_operation() {
        let sample = Sample::new(Duration::from_nanos(1_000), 10);
        assert_eq!(sample.score(Mode::AverageTime, TimeUnit::Nanoseconds), 100.0);
        assert_eq!(sample.score(Mode::AverageTime, TimeUnit::Microseconds), 0.1);
    }

    #[test]
    fn should_score_throughput_per_wall_time_when_threaded() {
        let sample = Sample {
            elapsed_nanos: 2_000_000_000,
            operations: 4_000,
            threads: 2,
            invocations: Vec::new(),
        };
        // two threads, one second of wall time each
        assert_eq!(sample.score(Mode::Throughput, TimeUnit::Seconds), 4_000.0);
    }

    #[test]
    fn should_score_zero_when_no_operations() {
        let sample = Sample::new(Duration::from_nanos(50), 0);
        assert_eq!(sample.score(Mode::Throughput, TimeUnit::Seconds), 0.0);
    }

    #[test]
    fn should_report_failure_when_any_unit_failed() {
        let summary = RunSummary {
            started_at: "0".into(),
            total_duration: Duration::ZERO,
            params: crate::RunOptions::new().iteration_params(),
            outcomes: vec![
                UnitOutcome::Success(stats("a")),
                UnitOutcome::Failed(UnitFailure {
                    unit_name: "b".into(),
                    kind: FailureKind::Execution,
                    reason: "boom".into(),
                }),
            ],
        };
        assert!(!summary.success());
        assert_eq!(summary.statistics().len(), 1);
        assert_eq!(summary.failures()[0].unit_name, "b");
        assert!(summary.get("a").is_some_and(UnitOutcome::is_success));
    }

    #[test]
    fn should_tag_outcomes_with_status_when_serialized() {
        let json = serde_json::to_value(UnitOutcome::Success(stats("a"))).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["unit_name"], "a");
    }
}
