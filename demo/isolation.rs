//! What fork isolation protects against.
//!
//! Every fork is a fresh process: `whoami` reports a different pid per fork.
//! A body that writes to stdout shares it with the fork protocol without
//! corrupting results, a body that never returns is killed once its timeout
//! passes, and a body that takes its process down fails only its own unit.
//!
//! ```text
//! cargo run --release --bin isolation -- -f 2 --timeout-secs 2
//! ```

use cntryl_microbench::{bench_main, BenchmarkUnit, Registry};
use std::io::Write;
use std::time::Duration;

struct Process {
    pid: u32,
}

fn main() -> anyhow::Result<()> {
    let mut registry = Registry::new();

    registry.register(
        BenchmarkUnit::builder("chatty").run(|| {
            print!(".");
            1u8
        }),
    )?;

    registry.register(
        BenchmarkUnit::builder("whoami")
            .thread_state(|| Process {
                pid: std::process::id(),
            })
            .run(|p: &mut Process| p.pid),
    )?;

    registry.register(BenchmarkUnit::builder("hangs").run(|| {
        std::thread::sleep(Duration::from_secs(600));
    }))?;

    registry.register(BenchmarkUnit::builder("exits").run(|| {
        let _ = std::io::stdout().flush();
        std::process::exit(3);
    }))?;

    bench_main(registry)
}
