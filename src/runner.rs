//! The run driver: selection, per-unit execution, aggregation and reporting.

use crate::aggregate::Aggregator;
use crate::config::{IterationParams, RunOptions};
use crate::error::Result;
use crate::fork::{self, ipc::RunRequest};
use crate::phase::{PhaseController, PhaseEvent};
use crate::registry::Registry;
use crate::report::Reporter;
use crate::result::{RunSummary, Statistics, UnitFailure, UnitOutcome};
use crate::unit::{BenchmarkUnit, Mode, TimeUnit};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs registered benchmarks.
///
/// # Example
///
/// ```rust,no_run
/// use cntryl_microbench::{BenchmarkUnit, Registry, RunOptions, Runner};
///
/// let mut registry = Registry::new();
/// registry
///     .register(BenchmarkUnit::builder("ln").run(|| std::f64::consts::PI.ln()))
///     .unwrap();
///
/// let summary = Runner::new(registry)
///     .run(&RunOptions::new().forks(0).warmup(2).iterations(5))
///     .unwrap();
/// assert!(summary.success());
/// ```
pub struct Runner {
    registry: Registry,
    reporters: Vec<Box<dyn Reporter>>,
}

impl Runner {
    /// Create a runner with no reporters attached.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            reporters: Vec::new(),
        }
    }

    /// Replace reporters with a custom set.
    pub fn reporters(&mut self, reporters: Vec<Box<dyn Reporter>>) -> &mut Self {
        self.reporters = reporters;
        self
    }

    /// Add an additional reporter.
    pub fn add_reporter(&mut self, reporter: Box<dyn Reporter>) -> &mut Self {
        self.reporters.push(reporter);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run every unit selected by `options`.
    ///
    /// Selection and configuration problems abort the run. Anything that goes
    /// wrong inside a unit is recorded as that unit's failure and the
    /// remaining units still run.
    ///
    /// In a forked worker process this serves the supervisor and exits.
    pub fn run(&self, options: &RunOptions) -> Result<RunSummary> {
        if fork::is_worker_process() {
            std::process::exit(fork::worker::serve(&self.registry));
        }

        options.validate()?;
        let units = self.registry.discover(options.include.as_deref())?;
        for unit in &units {
            options.validate_mode(options.mode.unwrap_or(unit.mode()))?;
        }
        let params = options.iteration_params();

        let started = Instant::now();
        let started_at = chrono_timestamp();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        info!(units = units.len(), forks = params.forks, "starting run");
        for r in &self.reporters {
            r.run_start(&names, &params);
        }

        let mut aggregator = Aggregator::new();
        let mut outcomes = Vec::with_capacity(units.len());
        for unit in units {
            let mode = options.mode.unwrap_or(unit.mode());
            let time_unit = options.time_unit.unwrap_or(unit.time_unit());
            for r in &self.reporters {
                r.unit_start(unit.name(), mode);
            }
            if !unit.returns_value() {
                debug!(unit = unit.name(), "body returns (); its work is not consumed");
            }

            let outcome = match run_unit(unit, mode, time_unit, &params, &mut aggregator) {
                Ok(stats) => UnitOutcome::Success(stats),
                Err(e) => {
                    warn!(unit = unit.name(), error = %e, "benchmark failed");
                    UnitOutcome::Failed(UnitFailure {
                        unit_name: unit.name().to_string(),
                        kind: e.kind(),
                        reason: e.to_string(),
                    })
                }
            };
            for r in &self.reporters {
                r.unit_end(&outcome);
            }
            outcomes.push(outcome);
        }

        let summary = RunSummary {
            started_at,
            total_duration: started.elapsed(),
            params,
            outcomes,
        };
        for r in &self.reporters {
            r.run_end(&summary);
        }
        Ok(summary)
    }
}

/// Measure one unit in-process or across forks and pool their statistics.
///
/// Every run, in-process or forked, must produce exactly the configured
/// measurement iterations on its own.
fn run_unit(
    unit: &BenchmarkUnit,
    mode: Mode,
    time_unit: TimeUnit,
    params: &IterationParams,
    aggregator: &mut Aggregator,
) -> Result<Statistics> {
    let name = unit.name();
    let runs = params.runs();

    for run in 0..runs {
        aggregator.begin(name, mode, time_unit, params.measurement_iterations);
        let mut record = |event: PhaseEvent| match event {
            PhaseEvent::WarmupComplete { iterations } => {
                debug!(unit = name, iterations, "warmup complete");
                Ok(())
            }
            PhaseEvent::Sample(sample) => aggregator.record(name, sample),
        };

        let pid = if params.forks == 0 {
            PhaseController::new(unit, mode, params).run(&mut record)?;
            std::process::id()
        } else {
            debug!(unit = name, fork = run + 1, of = runs, "starting fork");
            let request = RunRequest {
                unit: name.to_string(),
                mode,
                time_unit,
                params: params.clone(),
            };
            fork::run_fork(&request, &mut record)?
        };

        let stats = aggregator.finalize(name, pid)?;
        debug!(unit = name, pid, mean = stats.mean, "run finalized");
    }

    aggregator.statistics(name)
}

/// Unix milliseconds, used both as a JSON value and a file name.
fn chrono_timestamp() -> String {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_millis())
}
