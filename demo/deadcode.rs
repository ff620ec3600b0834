//! Dead-code elimination pitfalls.
//!
//! `measure_wrong` computes `ln(x)` and throws the result away, so the
//! compiler may delete the computation and the score collapses to the empty
//! `baseline`. `measure_right` returns the result, the harness consumes it,
//! and the work is actually measured.
//!
//! ```text
//! cargo run --release --bin deadcode -- -f 1 --wi 5 -i 5
//! ```

use cntryl_microbench::{bench_main, BenchmarkUnit, Mode, Registry, TimeUnit};
use std::f64::consts::PI;

struct Input {
    x: f64,
}

fn input() -> Input {
    Input { x: PI }
}

fn main() -> anyhow::Result<()> {
    let mut registry = Registry::new();

    registry.register(
        BenchmarkUnit::builder("baseline")
            .mode(Mode::AverageTime)
            .time_unit(TimeUnit::Nanoseconds)
            .run(|| {}),
    )?;

    registry.register(
        BenchmarkUnit::builder("measure_wrong")
            .mode(Mode::AverageTime)
            .time_unit(TimeUnit::Nanoseconds)
            .thread_state(input)
            .run(|s: &mut Input| {
                let _ = s.x.ln();
            }),
    )?;

    registry.register(
        BenchmarkUnit::builder("measure_right")
            .mode(Mode::AverageTime)
            .time_unit(TimeUnit::Nanoseconds)
            .thread_state(input)
            .run(|s: &mut Input| s.x.ln()),
    )?;

    bench_main(registry)
}
