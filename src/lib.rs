//! # cntryl-microbench
//!
//! A microbenchmark harness that keeps the optimizer honest.
//!
//! Benchmark bodies are plain closures. Whatever a body returns is consumed by
//! a [`Blackhole`], so work whose result flows out of the body cannot be
//! eliminated as dead code. Work whose result the body throws away is not
//! protected, and measuring it shows exactly that.
//!
//! Each unit runs warmup iterations (discarded) and then measurement
//! iterations (one [`Sample`] each), in one or more forked processes so
//! runtime adaptation from one benchmark cannot bias another.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cntryl_microbench::{bench_main, BenchmarkUnit, Registry};
//!
//! struct Input {
//!     x: f64,
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut registry = Registry::new();
//!
//!     // The result is returned, so the blackhole keeps it alive.
//!     registry.register(
//!         BenchmarkUnit::builder("measure_right")
//!             .thread_state(|| Input { x: std::f64::consts::PI })
//!             .run(|s: &mut Input| s.x.ln()),
//!     )?;
//!
//!     bench_main(registry)
//! }
//! ```
//!
//! ## Features
//!
//! - **`hdr`**: Use an HDR histogram for sample-mode percentiles

mod aggregate;
mod blackhole;
mod config;
mod error;
mod harness;
mod invocation;
mod percentiles;
mod phase;
mod registry;
mod report;
mod result;
mod runner;
mod unit;

pub mod fork;

pub use aggregate::{Aggregator, RunResult};
pub use blackhole::Blackhole;
pub use config::{IterationParams, RunOptions};
pub use error::{FailureKind, HarnessError, Result};
pub use harness::{bench_main, run_with_args, BenchArgs, OutputFormat};
pub use phase::{Phase, PhaseController, PhaseEvent};
pub use registry::Registry;
pub use report::{ConsoleReporter, JsonReporter, MultiReporter, Reporter};
pub use result::{Percentiles, RunRecord, RunSummary, Sample, Statistics, UnitFailure, UnitOutcome};
pub use runner::Runner;
pub use unit::{BenchmarkUnit, Mode, Scope, SharedStateBuilder, StateBuilder, TimeUnit, UnitBuilder};
