//! Phase controller: `Idle -> Warmup -> Measuring -> Done`.
//!
//! One controller drives one unit through one fork. Each phase fans out to
//! scoped worker threads, one per configured thread, and ends with a join.
//! Warmup results are dropped on the floor; only measurement iterations are
//! merged into [`Sample`]s and handed to the event sink, in iteration order.

use crate::config::IterationParams;
use crate::error::{panic_message, HarnessError, Result};
use crate::invocation::{
    run_batch, run_each, run_each_n, run_for, thin_timings, StopSignal, MAX_INVOCATIONS_PER_SAMPLE,
};
use crate::result::Sample;
use crate::unit::{BenchmarkUnit, Invoker, Mode};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::debug;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Warmup,
    Measuring,
    Done,
    Failed,
}

impl Phase {
    fn can_enter(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Idle, Phase::Warmup)
                | (Phase::Warmup, Phase::Measuring)
                | (Phase::Measuring, Phase::Done)
                | (Phase::Idle | Phase::Warmup | Phase::Measuring, Phase::Failed)
        )
    }
}

/// Events emitted while a unit runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Warmup finished; its iterations were discarded.
    WarmupComplete { iterations: usize },
    /// One merged measurement iteration.
    Sample(Sample),
}

/// Work one thread did in one iteration.
#[derive(Debug, Default)]
struct ThreadIteration {
    elapsed_nanos: u64,
    operations: u64,
    invocations: Vec<u64>,
}

/// Drives one unit through warmup and measurement in the current process.
pub struct PhaseController<'a> {
    unit: &'a BenchmarkUnit,
    mode: Mode,
    params: &'a IterationParams,
    phase: Phase,
}

impl<'a> PhaseController<'a> {
    pub fn new(unit: &'a BenchmarkUnit, mode: Mode, params: &'a IterationParams) -> Self {
        Self {
            unit,
            mode,
            params,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run warmup then measurement, reporting through `sink`.
    ///
    /// A panicking body fails the unit with [`HarnessError::Execution`]; a
    /// passed deadline fails it with [`HarnessError::IncompleteRun`].
    pub fn run(&mut self, mut sink: impl FnMut(PhaseEvent) -> Result<()>) -> Result<()> {
        match self.run_phases(&mut sink) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.phase.can_enter(Phase::Failed) {
                    self.phase = Phase::Failed;
                }
                Err(e)
            }
        }
    }

    fn run_phases(&mut self, sink: &mut dyn FnMut(PhaseEvent) -> Result<()>) -> Result<()> {
        let threads = self.params.threads.max(1);
        let stop = StopSignal::new(self.params.timeout);
        let workload = self.unit.workload();
        let mut invokers = workload.provision(threads);

        self.transition(Phase::Warmup)?;
        let warmup = self.params.warmup_iterations;
        if warmup > 0 {
            let done =
                self.run_iterations(&mut invokers, warmup, self.params.warmup_time, &stop)?;
            if done.len() < warmup {
                debug!(unit = self.unit.name(), timed_out = stop.timed_out(), "warmup cut short");
                return Err(self.incomplete(self.params.measurement_iterations, 0));
            }
        }
        sink(PhaseEvent::WarmupComplete { iterations: warmup })?;

        if self.unit.reset_between_phases() {
            debug!(unit = self.unit.name(), "re-provisioning state for measurement");
            invokers = workload.provision(threads);
        }

        self.transition(Phase::Measuring)?;
        let expected = self.params.measurement_iterations;
        let samples =
            self.run_iterations(&mut invokers, expected, self.params.measurement_time, &stop)?;
        if samples.len() < expected {
            debug!(unit = self.unit.name(), timed_out = stop.timed_out(), "measurement cut short");
            return Err(self.incomplete(expected, samples.len()));
        }
        for sample in samples {
            sink(PhaseEvent::Sample(sample))?;
        }

        self.transition(Phase::Done)
    }

    fn transition(&mut self, next: Phase) -> Result<()> {
        if !self.phase.can_enter(next) {
            return Err(HarnessError::execution(
                self.unit.name(),
                format!("illegal phase transition {:?} -> {:?}", self.phase, next),
            ));
        }
        debug!(unit = self.unit.name(), from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
        Ok(())
    }

    fn incomplete(&self, expected: usize, actual: usize) -> HarnessError {
        HarnessError::IncompleteRun {
            unit: self.unit.name().to_string(),
            expected,
            actual,
        }
    }

    /// Run `iterations` on every thread and merge them per iteration index.
    ///
    /// Returns fewer samples than requested only when the stop signal fired.
    fn run_iterations(
        &self,
        invokers: &mut [Box<dyn Invoker + 'a>],
        iterations: usize,
        target: Duration,
        stop: &StopSignal,
    ) -> Result<Vec<Sample>> {
        let mode = self.mode;
        let batch = self.params.batch_size;

        let per_thread: Vec<std::result::Result<Vec<ThreadIteration>, String>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = invokers
                    .iter_mut()
                    .map(|invoker| {
                        scope.spawn(move || {
                            catch_unwind(AssertUnwindSafe(|| {
                                let mut out = Vec::with_capacity(iterations);
                                for _ in 0..iterations {
                                    if stop.should_stop() {
                                        break;
                                    }
                                    match iterate(&mut **invoker, mode, batch, target, stop) {
                                        Some(it) => out.push(it),
                                        None => break,
                                    }
                                }
                                out
                            }))
                            .map_err(|payload| {
                                stop.trip();
                                panic_message(payload.as_ref())
                            })
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
                    })
                    .collect()
            });

        let mut threads_out = Vec::with_capacity(per_thread.len());
        for result in per_thread {
            match result {
                Ok(its) => threads_out.push(its),
                Err(message) => return Err(HarnessError::execution(self.unit.name(), message)),
            }
        }

        let completed = threads_out.iter().map(Vec::len).min().unwrap_or(0);
        let thread_count = threads_out.len() as u32;
        let mut samples = Vec::with_capacity(completed);
        for i in 0..completed {
            let mut sample = Sample {
                elapsed_nanos: 0,
                operations: 0,
                threads: thread_count,
                invocations: Vec::new(),
            };
            for its in threads_out.iter_mut() {
                let it = std::mem::take(&mut its[i]);
                sample.elapsed_nanos += it.elapsed_nanos;
                sample.operations += it.operations;
                sample.invocations.extend(it.invocations);
            }
            thin_timings(&mut sample.invocations, MAX_INVOCATIONS_PER_SAMPLE);
            samples.push(sample);
        }
        Ok(samples)
    }
}

/// One iteration on one thread, shaped by the mode.
fn iterate(
    invoker: &mut dyn Invoker,
    mode: Mode,
    batch: Option<u64>,
    target: Duration,
    stop: &StopSignal,
) -> Option<ThreadIteration> {
    match mode {
        Mode::SingleShot => {
            let m = run_batch(invoker, batch.unwrap_or(1));
            Some(ThreadIteration {
                elapsed_nanos: m.elapsed.as_nanos() as u64,
                operations: m.operations,
                invocations: Vec::new(),
            })
        }
        Mode::AverageTime | Mode::Throughput => {
            let m = match batch {
                Some(ops) => run_batch(invoker, ops),
                None => run_for(invoker, target, stop)?,
            };
            Some(ThreadIteration {
                elapsed_nanos: m.elapsed.as_nanos() as u64,
                operations: m.operations,
                invocations: Vec::new(),
            })
        }
        Mode::SampleTime => {
            let timings = match batch {
                Some(ops) => run_each_n(invoker, ops, stop)?,
                None => run_each(invoker, target, stop)?,
            };
            Some(ThreadIteration {
                elapsed_nanos: timings.iter().sum(),
                operations: timings.len() as u64,
                invocations: timings,
            })
        }
    }
}
