//! Value sink that defeats dead-code elimination.
//!
//! Every value a benchmark body returns is handed to [`Blackhole::consume`]
//! before the next invocation starts. The value passes through
//! [`std::hint::black_box`], so the optimizer has to assume it is observed.
//!
//! Only returned values are protected. A body that computes something and
//! throws the result away itself (returns `()`) gets no help here, and the
//! compiler is free to delete that work.

use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide count of consumed values, flushed when a blackhole drops.
static CONSUMED: AtomicU64 = AtomicU64::new(0);

/// A per-thread sink for benchmark results.
#[derive(Debug, Default)]
pub struct Blackhole {
    tokens: u64,
    sink: u64,
}

impl Blackhole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a value so the computation that produced it cannot be elided.
    #[inline]
    pub fn consume<T>(&mut self, value: T) {
        let value = black_box(value);
        self.tokens = black_box(self.tokens.wrapping_add(1));
        drop(value);
    }

    /// Burn CPU for roughly `tokens` units of work.
    ///
    /// The amount of work is linear in `tokens` and cannot be removed by the
    /// optimizer. Useful as a calibrated body or to pad a benchmark.
    #[inline(never)]
    pub fn consume_cpu(&mut self, tokens: u64) {
        let mut t = black_box(tokens);
        let mut acc = black_box(self.sink);
        while t > 0 {
            acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(t);
            t -= 1;
        }
        self.sink = black_box(acc);
    }

    /// Number of values consumed by this instance.
    pub fn consumed(&self) -> u64 {
        self.tokens
    }

    /// Total values consumed by every dropped blackhole in this process.
    pub fn total_consumed() -> u64 {
        CONSUMED.load(Ordering::Relaxed)
    }
}

impl Drop for Blackhole {
    fn drop(&mut self) {
        CONSUMED.fetch_add(self.tokens, Ordering::Relaxed);
    }
}
