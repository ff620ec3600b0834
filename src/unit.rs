//! Benchmark units and state provisioning.
//!
//! A [`BenchmarkUnit`] pairs a name and declared mode/time unit with a body.
//! Bodies are plain closures. Whatever they return is routed into a
//! [`Blackhole`] by the generic invokers in this module, so the hot loop is
//! monomorphized per body and no dynamic dispatch happens per invocation.
//!
//! State is provisioned according to [`Scope`]:
//! - `Thread`: one instance per worker thread, drawn from an [`InstancePool`]
//!   indexed by thread index
//! - `Benchmark`: one instance shared by all worker threads of a fork
//! - `Invocation`: a fresh instance for every call, created off the clock

use crate::blackhole::Blackhole;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a unit's score means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Average time per operation.
    #[value(name = "avgt", alias = "average-time")]
    AverageTime,
    /// Operations per time unit.
    #[value(name = "thrpt", alias = "throughput")]
    Throughput,
    /// Individually timed invocations, reported with percentiles.
    #[value(name = "sample", alias = "sample-time")]
    SampleTime,
    /// One cold invocation per iteration.
    #[value(name = "ss", alias = "single-shot")]
    SingleShot,
}

impl Mode {
    /// Short label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            Mode::AverageTime => "avgt",
            Mode::Throughput => "thrpt",
            Mode::SampleTime => "sample",
            Mode::SingleShot => "ss",
        }
    }

    /// Unit string for a score in this mode, e.g. `ns/op` or `ops/s`.
    pub fn score_unit(self, unit: TimeUnit) -> String {
        match self {
            Mode::Throughput => format!("ops/{}", unit.label()),
            _ => format!("{}/op", unit.label()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avgt" | "average-time" | "average_time" => Ok(Mode::AverageTime),
            "thrpt" | "throughput" => Ok(Mode::Throughput),
            "sample" | "sample-time" | "sample_time" => Ok(Mode::SampleTime),
            "ss" | "single-shot" | "single_shot" => Ok(Mode::SingleShot),
            other => Err(format!("unknown benchmark mode '{other}'")),
        }
    }
}

/// Time unit scores are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[value(name = "ns")]
    Nanoseconds,
    #[value(name = "us")]
    Microseconds,
    #[value(name = "ms")]
    Milliseconds,
    #[value(name = "s")]
    Seconds,
}

impl TimeUnit {
    pub fn label(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
        }
    }

    /// Nanoseconds in one of this unit.
    pub fn nanos(self) -> f64 {
        match self {
            TimeUnit::Nanoseconds => 1.0,
            TimeUnit::Microseconds => 1_000.0,
            TimeUnit::Milliseconds => 1_000_000.0,
            TimeUnit::Seconds => 1_000_000_000.0,
        }
    }

    /// Convert a nanosecond quantity into this unit.
    pub fn from_nanos(self, nanos: f64) -> f64 {
        nanos / self.nanos()
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ns" | "nanoseconds" => Ok(TimeUnit::Nanoseconds),
            "us" | "µs" | "microseconds" => Ok(TimeUnit::Microseconds),
            "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            "s" | "seconds" => Ok(TimeUnit::Seconds),
            other => Err(format!("unknown time unit '{other}'")),
        }
    }
}

/// Sharing policy for benchmark state across worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One instance per worker thread.
    Thread,
    /// One instance shared by every worker thread.
    Benchmark,
    /// A fresh instance for every invocation.
    Invocation,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Thread => "thread",
            Scope::Benchmark => "benchmark",
            Scope::Invocation => "invocation",
        })
    }
}

// ============================================================================
// Invokers
// ============================================================================

/// One worker thread's handle on a unit body and its state.
pub(crate) trait Invoker: Send {
    /// Run `ops` invocations back to back under a single timer.
    ///
    /// Each result is consumed before the next invocation starts.
    fn batch(&mut self, ops: u64) -> Duration;

    /// Run one invocation. The clock stops before the result is consumed.
    fn single(&mut self) -> Duration;
}

/// Type-erased body plus state factory.
pub(crate) trait Workload: Send + Sync {
    /// Provision one invoker per worker thread.
    fn provision(&self, threads: usize) -> Vec<Box<dyn Invoker + '_>>;
}

/// Explicit state instances for a fork, one slot per worker thread index.
///
/// A shared pool holds clones of a single `Arc`, so every slot points at the
/// same instance.
pub(crate) struct InstancePool<T> {
    slots: Vec<T>,
}

impl<T> InstancePool<T> {
    pub(crate) fn per_thread(init: &dyn Fn() -> T, threads: usize) -> Self {
        Self {
            slots: (0..threads).map(|_| init()).collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn into_slots(self) -> Vec<T> {
        self.slots
    }
}

impl<S> InstancePool<Arc<S>> {
    pub(crate) fn shared(init: &dyn Fn() -> S, threads: usize) -> Self {
        let instance = Arc::new(init());
        Self {
            slots: (0..threads).map(|_| Arc::clone(&instance)).collect(),
        }
    }
}

struct OwnedInvoker<'a, S, F, R> {
    state: S,
    body: &'a F,
    blackhole: Blackhole,
    _ret: PhantomData<fn() -> R>,
}

impl<S, F, R> Invoker for OwnedInvoker<'_, S, F, R>
where
    S: Send,
    F: Fn(&mut S) -> R + Sync,
{
    #[inline(never)]
    fn batch(&mut self, ops: u64) -> Duration {
        let start = Instant::now();
        for _ in 0..ops {
            let value = (self.body)(&mut self.state);
            self.blackhole.consume(value);
        }
        start.elapsed()
    }

    #[inline(never)]
    fn single(&mut self) -> Duration {
        let start = Instant::now();
        let value = (self.body)(&mut self.state);
        let elapsed = start.elapsed();
        self.blackhole.consume(value);
        elapsed
    }
}

struct SharedInvoker<'a, S, F, R> {
    state: Arc<S>,
    body: &'a F,
    blackhole: Blackhole,
    _ret: PhantomData<fn() -> R>,
}

impl<S, F, R> Invoker for SharedInvoker<'_, S, F, R>
where
    S: Send + Sync,
    F: Fn(&S) -> R + Sync,
{
    #[inline(never)]
    fn batch(&mut self, ops: u64) -> Duration {
        let state = &*self.state;
        let start = Instant::now();
        for _ in 0..ops {
            let value = (self.body)(state);
            self.blackhole.consume(value);
        }
        start.elapsed()
    }

    #[inline(never)]
    fn single(&mut self) -> Duration {
        let start = Instant::now();
        let value = (self.body)(&*self.state);
        let elapsed = start.elapsed();
        self.blackhole.consume(value);
        elapsed
    }
}

struct PerCallInvoker<'a, S, I, F, R> {
    init: &'a I,
    body: &'a F,
    blackhole: Blackhole,
    _ret: PhantomData<fn() -> (S, R)>,
}

impl<S, I, F, R> Invoker for PerCallInvoker<'_, S, I, F, R>
where
    I: Fn() -> S + Sync,
    F: Fn(&mut S) -> R + Sync,
{
    // Each call is timed on its own so state construction stays off the clock.
    fn batch(&mut self, ops: u64) -> Duration {
        (0..ops).map(|_| self.single()).sum()
    }

    #[inline(never)]
    fn single(&mut self) -> Duration {
        let mut state = (self.init)();
        let start = Instant::now();
        let value = (self.body)(&mut state);
        let elapsed = start.elapsed();
        self.blackhole.consume(value);
        drop(state);
        elapsed
    }
}

struct ThreadWorkload<S, I, F, R> {
    init: I,
    body: F,
    _ret: PhantomData<fn() -> (S, R)>,
}

impl<S, I, F, R> Workload for ThreadWorkload<S, I, F, R>
where
    S: Send + 'static,
    R: 'static,
    I: Fn() -> S + Send + Sync,
    F: Fn(&mut S) -> R + Send + Sync,
{
    fn provision(&self, threads: usize) -> Vec<Box<dyn Invoker + '_>> {
        InstancePool::per_thread(&self.init, threads)
            .into_slots()
            .into_iter()
            .map(|state| {
                Box::new(OwnedInvoker {
                    state,
                    body: &self.body,
                    blackhole: Blackhole::new(),
                    _ret: PhantomData,
                }) as Box<dyn Invoker + '_>
            })
            .collect()
    }
}

struct SharedWorkload<S, I, F, R> {
    init: I,
    body: F,
    _ret: PhantomData<fn() -> (S, R)>,
}

impl<S, I, F, R> Workload for SharedWorkload<S, I, F, R>
where
    S: Send + Sync + 'static,
    R: 'static,
    I: Fn() -> S + Send + Sync,
    F: Fn(&S) -> R + Send + Sync,
{
    fn provision(&self, threads: usize) -> Vec<Box<dyn Invoker + '_>> {
        InstancePool::shared(&self.init, threads)
            .into_slots()
            .into_iter()
            .map(|state| {
                Box::new(SharedInvoker {
                    state,
                    body: &self.body,
                    blackhole: Blackhole::new(),
                    _ret: PhantomData,
                }) as Box<dyn Invoker + '_>
            })
            .collect()
    }
}

struct InvocationWorkload<S, I, F, R> {
    init: I,
    body: F,
    _ret: PhantomData<fn() -> (S, R)>,
}

impl<S, I, F, R> Workload for InvocationWorkload<S, I, F, R>
where
    S: 'static,
    R: 'static,
    I: Fn() -> S + Send + Sync,
    F: Fn(&mut S) -> R + Send + Sync,
{
    fn provision(&self, threads: usize) -> Vec<Box<dyn Invoker + '_>> {
        (0..threads)
            .map(|_| {
                Box::new(PerCallInvoker {
                    init: &self.init,
                    body: &self.body,
                    blackhole: Blackhole::new(),
                    _ret: PhantomData,
                }) as Box<dyn Invoker + '_>
            })
            .collect()
    }
}

// ============================================================================
// Units and builders
// ============================================================================

/// A registered benchmark: identity, declared measurement settings and body.
///
/// Immutable once built; cloning shares the body.
#[derive(Clone)]
pub struct BenchmarkUnit {
    name: String,
    mode: Mode,
    time_unit: TimeUnit,
    scope: Scope,
    reset_between_phases: bool,
    returns_value: bool,
    workload: Arc<dyn Workload>,
}

impl BenchmarkUnit {
    /// Start building a unit. Defaults: average time, nanoseconds.
    pub fn builder(name: impl Into<String>) -> UnitBuilder {
        UnitBuilder {
            name: name.into(),
            mode: Mode::AverageTime,
            time_unit: TimeUnit::Nanoseconds,
            reset_between_phases: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Whether state is re-provisioned between warmup and measurement.
    pub fn reset_between_phases(&self) -> bool {
        self.reset_between_phases
    }

    /// Whether the body produces a value that reaches the blackhole.
    ///
    /// Bodies returning `()` are not protected against dead-code elimination.
    pub fn returns_value(&self) -> bool {
        self.returns_value
    }

    pub(crate) fn workload(&self) -> &dyn Workload {
        self.workload.as_ref()
    }
}

impl fmt::Debug for BenchmarkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkUnit")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("time_unit", &self.time_unit)
            .field("scope", &self.scope)
            .field("reset_between_phases", &self.reset_between_phases)
            .field("returns_value", &self.returns_value)
            .finish_non_exhaustive()
    }
}

fn returns_value<R: 'static>() -> bool {
    TypeId::of::<R>() != TypeId::of::<()>()
}

/// Builder for [`BenchmarkUnit`].
///
/// # Example
///
/// ```rust
/// use cntryl_microbench::{BenchmarkUnit, Mode, TimeUnit};
///
/// struct Input { x: f64 }
///
/// let unit = BenchmarkUnit::builder("log")
///     .mode(Mode::AverageTime)
///     .time_unit(TimeUnit::Nanoseconds)
///     .thread_state(|| Input { x: std::f64::consts::PI })
///     .run(|s: &mut Input| s.x.ln());
///
/// assert!(unit.returns_value());
/// ```
#[derive(Debug, Clone)]
pub struct UnitBuilder {
    name: String,
    mode: Mode,
    time_unit: TimeUnit,
    reset_between_phases: bool,
}

impl UnitBuilder {
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    /// Re-create state after warmup so measurement starts from fresh instances.
    pub fn reset_between_phases(mut self, reset: bool) -> Self {
        self.reset_between_phases = reset;
        self
    }

    /// Attach per-thread state.
    pub fn thread_state<S, I>(self, init: I) -> StateBuilder<S, I>
    where
        S: Send + 'static,
        I: Fn() -> S + Send + Sync + 'static,
    {
        StateBuilder {
            base: self,
            scope: Scope::Thread,
            init,
            _state: PhantomData,
        }
    }

    /// Attach state that is rebuilt for every invocation.
    pub fn invocation_state<S, I>(self, init: I) -> StateBuilder<S, I>
    where
        S: Send + 'static,
        I: Fn() -> S + Send + Sync + 'static,
    {
        StateBuilder {
            base: self,
            scope: Scope::Invocation,
            init,
            _state: PhantomData,
        }
    }

    /// Attach one state instance shared by every worker thread.
    ///
    /// The harness does no locking; `S` handles its own synchronization.
    pub fn shared_state<S, I>(self, init: I) -> SharedStateBuilder<S, I>
    where
        S: Send + Sync + 'static,
        I: Fn() -> S + Send + Sync + 'static,
    {
        SharedStateBuilder {
            base: self,
            init,
            _state: PhantomData,
        }
    }

    /// Finish with a stateless body.
    pub fn run<F, R>(self, body: F) -> BenchmarkUnit
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: 'static,
    {
        self.thread_state(|| ()).run(move |_: &mut ()| body())
    }

    fn finish<R: 'static>(self, scope: Scope, workload: Arc<dyn Workload>) -> BenchmarkUnit {
        BenchmarkUnit {
            name: self.name,
            mode: self.mode,
            time_unit: self.time_unit,
            scope,
            reset_between_phases: self.reset_between_phases,
            returns_value: returns_value::<R>(),
            workload,
        }
    }
}

/// Builder stage for thread- or invocation-scoped state.
pub struct StateBuilder<S, I> {
    base: UnitBuilder,
    scope: Scope,
    init: I,
    _state: PhantomData<fn() -> S>,
}

impl<S, I> StateBuilder<S, I>
where
    S: Send + 'static,
    I: Fn() -> S + Send + Sync + 'static,
{
    /// Finish with a body taking the state mutably.
    pub fn run<F, R>(self, body: F) -> BenchmarkUnit
    where
        F: Fn(&mut S) -> R + Send + Sync + 'static,
        R: 'static,
    {
        let workload: Arc<dyn Workload> = match self.scope {
            Scope::Invocation => Arc::new(InvocationWorkload {
                init: self.init,
                body,
                _ret: PhantomData::<fn() -> (S, R)>,
            }),
            _ => Arc::new(ThreadWorkload {
                init: self.init,
                body,
                _ret: PhantomData::<fn() -> (S, R)>,
            }),
        };
        self.base.finish::<R>(self.scope, workload)
    }
}

/// Builder stage for benchmark-scoped (shared) state.
pub struct SharedStateBuilder<S, I> {
    base: UnitBuilder,
    init: I,
    _state: PhantomData<fn() -> S>,
}

impl<S, I> SharedStateBuilder<S, I>
where
    S: Send + Sync + 'static,
    I: Fn() -> S + Send + Sync + 'static,
{
    /// Finish with a body taking the shared state by reference.
    pub fn run<F, R>(self, body: F) -> BenchmarkUnit
    where
        F: Fn(&S) -> R + Send + Sync + 'static,
        R: 'static,
    {
        let workload = Arc::new(SharedWorkload {
            init: self.init,
            body,
            _ret: PhantomData::<fn() -> (S, R)>,
        });
        self.base.finish::<R>(Scope::Benchmark, workload)
    }
}
