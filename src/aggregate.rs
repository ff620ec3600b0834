//! Result aggregation.
//!
//! The [`Aggregator`] owns every measurement [`Sample`] once reported. Each
//! process that measures a unit (the caller, or one fork) gets its own
//! [`RunResult`]: opened with [`Aggregator::begin`], appended to while
//! measuring, and closed exactly once by [`Aggregator::finalize`] holding
//! exactly the measurement iteration count. [`Aggregator::statistics`]
//! summarizes the closed results of a unit together.

use crate::error::{HarnessError, Result};
use crate::percentiles;
use crate::result::{RunRecord, Sample, Statistics};
use crate::unit::{Mode, TimeUnit};
use std::collections::HashMap;

/// Samples collected for one unit by one process.
#[derive(Debug, Clone)]
pub struct RunResult {
    mode: Mode,
    time_unit: TimeUnit,
    expected: usize,
    samples: Vec<Sample>,
    pid: Option<u32>,
    finalized: bool,
}

impl RunResult {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Process that produced the samples, once finalized.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn is_complete(&self) -> bool {
        self.finalized && self.samples.len() == self.expected
    }
}

/// Collects samples per unit and computes summary statistics.
#[derive(Debug, Default)]
pub struct Aggregator {
    runs: HashMap<String, Vec<RunResult>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an empty result for the next run of `unit`.
    ///
    /// A result left open by an earlier call is discarded.
    pub fn begin(&mut self, unit: &str, mode: Mode, time_unit: TimeUnit, expected: usize) {
        let runs = self.runs.entry(unit.to_string()).or_default();
        if runs.last().is_some_and(|r| !r.finalized) {
            runs.pop();
        }
        runs.push(RunResult {
            mode,
            time_unit,
            expected,
            samples: Vec::with_capacity(expected),
            pid: None,
            finalized: false,
        });
    }

    /// Append a measurement sample to the open result.
    pub fn record(&mut self, unit: &str, sample: Sample) -> Result<()> {
        let run = self
            .runs
            .get_mut(unit)
            .and_then(|runs| runs.last_mut())
            .ok_or_else(|| HarnessError::execution(unit, "sample recorded for unknown unit"))?;
        if run.finalized {
            return Err(HarnessError::execution(
                unit,
                "sample recorded after results were finalized",
            ));
        }
        tracing::trace!(unit, n = run.samples.len() + 1, "sample recorded");
        run.samples.push(sample);
        Ok(())
    }

    /// Close the open result, produced by process `pid`, and summarize it.
    ///
    /// Fails with [`HarnessError::IncompleteRun`] unless exactly the expected
    /// number of samples was recorded.
    pub fn finalize(&mut self, unit: &str, pid: u32) -> Result<Statistics> {
        let run = self
            .runs
            .get_mut(unit)
            .and_then(|runs| runs.last_mut())
            .ok_or_else(|| HarnessError::execution(unit, "finalize called for unknown unit"))?;
        if run.finalized {
            return Err(HarnessError::execution(unit, "results already finalized"));
        }
        run.finalized = true;
        run.pid = Some(pid);

        if run.samples.len() != run.expected {
            return Err(HarnessError::IncompleteRun {
                unit: unit.to_string(),
                expected: run.expected,
                actual: run.samples.len(),
            });
        }

        Ok(summarize(unit, std::slice::from_ref(run)))
    }

    /// Statistics over every finalized result of `unit`.
    pub fn statistics(&self, unit: &str) -> Result<Statistics> {
        let runs = self
            .runs
            .get(unit)
            .filter(|runs| !runs.is_empty())
            .ok_or_else(|| HarnessError::execution(unit, "no results recorded"))?;
        if let Some(run) = runs.iter().find(|r| !r.is_complete()) {
            return Err(HarnessError::IncompleteRun {
                unit: unit.to_string(),
                expected: run.expected,
                actual: run.samples.len(),
            });
        }
        Ok(summarize(unit, runs))
    }

    /// Latest result of `unit`.
    pub fn get(&self, unit: &str) -> Option<&RunResult> {
        self.runs.get(unit).and_then(|runs| runs.last())
    }

    /// Every result of `unit`, oldest first.
    pub fn runs(&self, unit: &str) -> &[RunResult] {
        self.runs.get(unit).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Pools the samples of `runs`, which share one mode and time unit.
fn summarize(unit: &str, runs: &[RunResult]) -> Statistics {
    let (mode, time_unit) = runs
        .first()
        .map_or((Mode::AverageTime, TimeUnit::Nanoseconds), |r| (r.mode, r.time_unit));
    let scores: Vec<f64> = runs
        .iter()
        .flat_map(|r| &r.samples)
        .map(|s| s.score(mode, time_unit))
        .collect();
    let n = scores.len();

    let mean = if n == 0 {
        0.0
    } else {
        scores.iter().sum::<f64>() / n as f64
    };
    let std_dev = if n < 2 {
        0.0
    } else {
        let variance = scores.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    };
    let std_error = if n < 2 { 0.0 } else { std_dev / (n as f64).sqrt() };
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let percentiles = if mode == Mode::SampleTime {
        let invocations: Vec<u64> = runs
            .iter()
            .flat_map(|r| &r.samples)
            .flat_map(|s| s.invocations.iter().copied())
            .collect();
        percentiles::compute(&invocations, |nanos| time_unit.from_nanos(nanos))
    } else {
        None
    };

    Statistics {
        unit_name: unit.to_string(),
        mode,
        time_unit,
        count: n,
        mean,
        std_dev,
        std_error,
        min: if n == 0 { 0.0 } else { min },
        max: if n == 0 { 0.0 } else { max },
        percentiles,
        scores,
        runs: runs
            .iter()
            .map(|r| RunRecord {
                pid: r.pid.unwrap_or_default(),
                samples: r.samples.len(),
            })
            .collect(),
    }
}
