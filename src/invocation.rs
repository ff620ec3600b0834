//! The invocation loop.
//!
//! Drives a single worker thread's [`Invoker`] for one iteration. Each
//! returned value is consumed by the invoker's blackhole before the next call
//! begins. A batch of one stops the clock before the blackhole runs; larger
//! batches are timed as a whole and amortized per operation.

use crate::unit::Invoker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Largest chunk a time-filled iteration grows to between clock checks.
const MAX_CHUNK: u64 = 1 << 20;

/// Cap on individually timed invocations in one sample-mode sample: a
/// time-filled thread iteration stops there, and merged samples are thinned
/// to it. Keeps a sample well inside one fork frame.
pub const MAX_INVOCATIONS_PER_SAMPLE: usize = 1 << 16;

/// Timed work performed by one thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Measurement {
    pub elapsed: Duration,
    pub operations: u64,
}

impl std::ops::AddAssign for Measurement {
    fn add_assign(&mut self, rhs: Self) {
        self.elapsed += rhs.elapsed;
        self.operations += rhs.operations;
    }
}

/// Shared cancellation: a deadline plus a trip flag any thread can set.
#[derive(Debug)]
pub struct StopSignal {
    deadline: Option<Instant>,
    tripped: AtomicBool,
}

impl StopSignal {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            tripped: AtomicBool::new(false),
        }
    }

    /// Whether work should stop. Passing the deadline trips the signal.
    pub fn should_stop(&self) -> bool {
        if self.tripped.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => {
                self.trip();
                true
            }
            _ => false,
        }
    }

    pub fn trip(&self) {
        self.tripped.store(true, Ordering::Relaxed);
    }

    /// Whether the deadline (rather than a manual trip) has passed.
    pub fn timed_out(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }
}

/// Run `ops` invocations and time them.
pub(crate) fn run_batch(invoker: &mut dyn Invoker, ops: u64) -> Measurement {
    let elapsed = if ops == 1 {
        invoker.single()
    } else {
        invoker.batch(ops)
    };
    Measurement {
        elapsed,
        operations: ops,
    }
}

/// Run growing batches until `target` of timed work accumulates.
///
/// Returns `None` if the stop signal fires first.
pub(crate) fn run_for(
    invoker: &mut dyn Invoker,
    target: Duration,
    stop: &StopSignal,
) -> Option<Measurement> {
    let mut total = Measurement::default();
    let mut chunk = 1u64;
    while total.elapsed < target {
        if stop.should_stop() {
            return None;
        }
        let m = run_batch(invoker, chunk);
        total += m;
        // Grow while a chunk is short relative to what is left.
        let remaining = target.saturating_sub(total.elapsed);
        if chunk < MAX_CHUNK && m.elapsed * 4 < remaining {
            chunk *= 2;
        }
    }
    Some(total)
}

/// Time invocations one at a time until `target` of timed work accumulates.
///
/// Returns the individual timings in nanoseconds, or `None` if the stop
/// signal fires first.
pub(crate) fn run_each(
    invoker: &mut dyn Invoker,
    target: Duration,
    stop: &StopSignal,
) -> Option<Vec<u64>> {
    let mut timings = Vec::new();
    let mut total = Duration::ZERO;
    while total < target && timings.len() < MAX_INVOCATIONS_PER_SAMPLE {
        if stop.should_stop() {
            return None;
        }
        let d = invoker.single();
        total += d;
        timings.push(d.as_nanos() as u64);
    }
    Some(timings)
}

/// Time exactly `ops` invocations one at a time.
pub(crate) fn run_each_n(
    invoker: &mut dyn Invoker,
    ops: u64,
    stop: &StopSignal,
) -> Option<Vec<u64>> {
    let mut timings = Vec::with_capacity(ops.min(MAX_INVOCATIONS_PER_SAMPLE as u64) as usize);
    for _ in 0..ops {
        if stop.should_stop() {
            return None;
        }
        timings.push(invoker.single().as_nanos() as u64);
    }
    Some(timings)
}

/// Keep at most `cap` timings, taken at an even stride so every thread's
/// share stays represented.
pub(crate) fn thin_timings(timings: &mut Vec<u64>, cap: usize) {
    let len = timings.len();
    if cap == 0 || len <= cap {
        return;
    }
    // source index i * len / cap never falls behind i
    for i in 0..cap {
        timings[i] = timings[i * len / cap];
    }
    timings.truncate(cap);
}
