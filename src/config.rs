//! Run configuration.

use crate::error::{HarnessError, Result};
use crate::unit::{Mode, TimeUnit};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Iteration settings for one unit. Shipped to forked workers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationParams {
    /// Warmup iterations (discarded).
    pub warmup_iterations: usize,
    /// Target duration of one warmup iteration.
    #[serde(with = "duration_serde")]
    pub warmup_time: Duration,
    /// Measurement iterations (one sample each).
    pub measurement_iterations: usize,
    /// Target duration of one measurement iteration.
    #[serde(with = "duration_serde")]
    pub measurement_time: Duration,
    /// Fixed invocation count per iteration; overrides the iteration times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u64>,
    /// Forked processes per unit. `0` runs in the calling process.
    pub forks: usize,
    /// Worker threads per fork.
    pub threads: usize,
    /// Abort a unit that runs longer than this.
    #[serde(default, with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

impl IterationParams {
    /// Processes whose results make up one unit's statistics.
    pub fn runs(&self) -> usize {
        self.forks.max(1)
    }
}

/// Options for one harness run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Select units by name (substring or `*` glob).
    pub include: Option<String>,
    /// Forked processes per unit. `0` runs in-process.
    pub forks: usize,
    /// Warmup iterations (discarded).
    pub warmup_iterations: usize,
    /// Warmup iteration length.
    pub warmup_time: Duration,
    /// Measurement iterations.
    pub measurement_iterations: usize,
    /// Measurement iteration length.
    pub measurement_time: Duration,
    /// Fixed invocations per iteration.
    pub batch_size: Option<u64>,
    /// Worker threads per fork.
    pub threads: usize,
    /// Per-unit time limit.
    pub timeout: Option<Duration>,
    /// Override every unit's declared mode.
    pub mode: Option<Mode>,
    /// Override every unit's declared time unit.
    pub time_unit: Option<TimeUnit>,
    /// Print progress to stderr.
    pub verbose: bool,
    /// Output directory for JSON results.
    pub output_dir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            include: None,
            forks: 1,
            warmup_iterations: 3,
            warmup_time: Duration::from_millis(100),
            measurement_iterations: 5,
            measurement_time: Duration::from_millis(100),
            batch_size: None,
            threads: 1,
            timeout: None,
            mode: None,
            time_unit: None,
            verbose: true,
            output_dir: PathBuf::from("target/microbench"),
        }
    }
}

impl RunOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from environment variables.
    ///
    /// Supported variables:
    /// - `MICROBENCH_INCLUDE`: unit name filter
    /// - `MICROBENCH_FORKS`: forks per unit (default: 1)
    /// - `MICROBENCH_WARMUP`: warmup iterations (default: 3)
    /// - `MICROBENCH_WARMUP_MS`: warmup iteration length in ms
    /// - `MICROBENCH_ITERATIONS`: measurement iterations (default: 5)
    /// - `MICROBENCH_MEASUREMENT_MS`: measurement iteration length in ms
    /// - `MICROBENCH_BATCH_SIZE`: fixed invocations per iteration
    /// - `MICROBENCH_THREADS`: worker threads (default: 1)
    /// - `MICROBENCH_TIMEOUT_SECS`: per-unit timeout in seconds
    /// - `MICROBENCH_OUTPUT_DIR`: JSON output directory
    /// - `MICROBENCH_VERBOSE`: verbose output (default: true)
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = get("MICROBENCH_INCLUDE") {
            cfg.include = Some(v);
        }
        if let Some(n) = get("MICROBENCH_FORKS").and_then(|v| v.parse().ok()) {
            cfg.forks = n;
        }
        if let Some(n) = get("MICROBENCH_WARMUP").and_then(|v| v.parse().ok()) {
            cfg.warmup_iterations = n;
        }
        if let Some(ms) = get("MICROBENCH_WARMUP_MS").and_then(|v| v.parse().ok()) {
            cfg.warmup_time = Duration::from_millis(ms);
        }
        if let Some(n) = get("MICROBENCH_ITERATIONS").and_then(|v| v.parse().ok()) {
            cfg.measurement_iterations = n;
        }
        if let Some(ms) = get("MICROBENCH_MEASUREMENT_MS").and_then(|v| v.parse().ok()) {
            cfg.measurement_time = Duration::from_millis(ms);
        }
        if let Some(n) = get("MICROBENCH_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            cfg.batch_size = Some(n);
        }
        if let Some(n) = get("MICROBENCH_THREADS").and_then(|v| v.parse().ok()) {
            cfg.threads = n;
        }
        if let Some(secs) = get("MICROBENCH_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            cfg.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(v) = get("MICROBENCH_OUTPUT_DIR") {
            cfg.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("MICROBENCH_VERBOSE") {
            cfg.verbose = v != "0" && !v.eq_ignore_ascii_case("false");
        }

        cfg
    }

    /// Reject contradictory settings before anything runs.
    pub fn validate(&self) -> Result<()> {
        if self.measurement_iterations == 0 {
            return Err(HarnessError::Configuration(
                "measurement iterations must be at least 1".into(),
            ));
        }
        if self.threads == 0 {
            return Err(HarnessError::Configuration(
                "thread count must be at least 1".into(),
            ));
        }
        if self.batch_size == Some(0) {
            return Err(HarnessError::Configuration(
                "batch size must be at least 1".into(),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(HarnessError::Configuration(
                "timeout must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Checks that depend on the mode a unit resolves to.
    pub fn validate_mode(&self, mode: Mode) -> Result<()> {
        if self.batch_size.is_none() && mode != Mode::SingleShot && self.measurement_time.is_zero()
        {
            return Err(HarnessError::Configuration(format!(
                "measurement time must be positive in {mode} mode unless a batch size is set"
            )));
        }
        Ok(())
    }

    /// Iteration settings handed to the phase controller.
    pub fn iteration_params(&self) -> IterationParams {
        IterationParams {
            warmup_iterations: self.warmup_iterations,
            warmup_time: self.warmup_time,
            measurement_iterations: self.measurement_iterations,
            measurement_time: self.measurement_time,
            batch_size: self.batch_size,
            forks: self.forks,
            threads: self.threads,
            timeout: self.timeout,
        }
    }

    /// Set the unit name filter.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include = Some(pattern.into());
        self
    }

    /// Clear the unit name filter.
    pub fn no_include(mut self) -> Self {
        self.include = None;
        self
    }

    /// Set forks per unit.
    pub fn forks(mut self, n: usize) -> Self {
        self.forks = n;
        self
    }

    /// Set warmup iterations.
    pub fn warmup(mut self, n: usize) -> Self {
        self.warmup_iterations = n;
        self
    }

    pub fn warmup_time(mut self, d: Duration) -> Self {
        self.warmup_time = d;
        self
    }

    /// Set measurement iterations.
    pub fn iterations(mut self, n: usize) -> Self {
        self.measurement_iterations = n;
        self
    }

    pub fn measurement_time(mut self, d: Duration) -> Self {
        self.measurement_time = d;
        self
    }

    /// Run exactly `n` invocations per iteration instead of filling a time slot.
    pub fn batch_size(mut self, n: u64) -> Self {
        self.batch_size = Some(n);
        self
    }

    pub fn threads(mut self, n: usize) -> Self {
        self.threads = n;
        self
    }

    /// Set the per-unit timeout.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = Some(unit);
        self
    }

    pub fn verbose(mut self, v: bool) -> Self {
        self.verbose = v;
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }
}

pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_nanos() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_nanos(u64::deserialize(d)?))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        d.map(|d| d.as_nanos() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn should_use_defaults_when_env_not_set() {
        let cfg = RunOptions::from_lookup(|_| None);
        assert_eq!(cfg.forks, 1);
        assert_eq!(cfg.warmup_iterations, 3);
        assert_eq!(cfg.measurement_iterations, 5);
        assert_eq!(cfg.threads, 1);
        assert!(cfg.verbose);
    }

    #[test]
    fn should_read_overrides_when_env_set() {
        let env: HashMap<&str, &str> = [
            ("MICROBENCH_FORKS", "2"),
            ("MICROBENCH_WARMUP", "4"),
            ("MICROBENCH_ITERATIONS", "7"),
            ("MICROBENCH_MEASUREMENT_MS", "20"),
            ("MICROBENCH_TIMEOUT_SECS", "3"),
            ("MICROBENCH_INCLUDE", "dead_code"),
            ("MICROBENCH_THREADS", "not-a-number"),
            ("MICROBENCH_VERBOSE", "false"),
        ]
        .into_iter()
        .collect();
        let cfg = RunOptions::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.forks, 2);
        assert_eq!(cfg.warmup_iterations, 4);
        assert_eq!(cfg.measurement_iterations, 7);
        assert_eq!(cfg.measurement_time, Duration::from_millis(20));
        assert_eq!(cfg.timeout, Some(Duration::from_secs(3)));
        assert_eq!(cfg.include.as_deref(), Some("dead_code"));
        assert_eq!(cfg.threads, 1);
        assert!(!cfg.verbose);
    }

    #[test]
    fn should_build_options_with_builder() {
        let cfg = RunOptions::new()
            .forks(0)
            .warmup(2)
            .iterations(5)
            .threads(4)
            .include("measure");

        assert_eq!(cfg.forks, 0);
        assert_eq!(cfg.warmup_iterations, 2);
        assert_eq!(cfg.measurement_iterations, 5);
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.include, Some("measure".to_string()));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn should_reject_zero_measurement_iterations() {
        let err = RunOptions::new().iterations(0).validate().unwrap_err();
        assert!(matches!(err, HarnessError::Configuration(_)));
    }

    #[test]
    fn should_reject_contradictory_options() {
        assert!(RunOptions::new().threads(0).validate().is_err());
        assert!(RunOptions::new().batch_size(0).validate().is_err());
        assert!(RunOptions::new().timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn should_require_measurement_time_only_when_mode_is_timed() {
        let cfg = RunOptions::new().measurement_time(Duration::ZERO);
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_mode(Mode::AverageTime).is_err());
        assert!(cfg.validate_mode(Mode::SampleTime).is_err());
        assert!(cfg.validate_mode(Mode::SingleShot).is_ok());
        assert!(cfg.clone().batch_size(10).validate_mode(Mode::Throughput).is_ok());
    }

    #[test]
    fn should_count_one_run_per_fork() {
        assert_eq!(RunOptions::new().forks(0).iteration_params().runs(), 1);
        assert_eq!(RunOptions::new().forks(3).iteration_params().runs(), 3);
    }

    #[test]
    fn should_serialize_params_for_workers() {
        let params = RunOptions::new().timeout(Duration::from_secs(2)).iteration_params();
        let json = serde_json::to_string(&params).unwrap();
        let back: IterationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
