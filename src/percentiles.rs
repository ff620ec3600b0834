//! Percentiles over individually timed invocations.
//!
//! With the `hdr` feature the values go through an HDR histogram
//! (3 significant digits); otherwise they are sorted and interpolated.

use crate::result::Percentiles;

/// Percentiles of raw nanosecond timings, converted by `scale`.
pub(crate) fn compute(nanos: &[u64], scale: impl Fn(f64) -> f64) -> Option<Percentiles> {
    if nanos.is_empty() {
        return None;
    }
    let raw = raw_percentiles(nanos)?;
    Some(Percentiles {
        p50: scale(raw[0]),
        p90: scale(raw[1]),
        p99: scale(raw[2]),
        p999: scale(raw[3]),
        p100: scale(raw[4]),
    })
}

const QUANTILES: [f64; 5] = [50.0, 90.0, 99.0, 99.9, 100.0];

#[cfg(not(feature = "hdr"))]
fn raw_percentiles(nanos: &[u64]) -> Option<[f64; 5]> {
    let mut sorted: Vec<f64> = nanos.iter().map(|&n| n as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(QUANTILES.map(|q| percentile_sorted(&sorted, q)))
}

#[cfg(feature = "hdr")]
fn raw_percentiles(nanos: &[u64]) -> Option<[f64; 5]> {
    let mut hist = hdrhistogram::Histogram::<u64>::new(3).ok()?;
    for &n in nanos {
        hist.saturating_record(n.max(1));
    }
    Some(QUANTILES.map(|q| hist.value_at_quantile(q / 100.0) as f64))
}

/// Linear interpolation between nearest ranks of an ascending slice.
#[cfg_attr(feature = "hdr", allow(dead_code))]
fn percentile_sorted(sorted: &[f64], percentile: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = percentile / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (lower + 1).min(n - 1);
            let fraction = rank - lower as f64;
            sorted[lower] + fraction * (sorted[upper] - sorted[lower])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_none_when_no_invocations() {
        assert!(compute(&[], |v| v).is_none());
    }

    #[test]
    fn should_order_percentiles_ascending() {
        let nanos: Vec<u64> = (1..=1000).collect();
        let p = compute(&nanos, |v| v).unwrap();
        assert!(p.p50 <= p.p90);
        assert!(p.p90 <= p.p99);
        assert!(p.p99 <= p.p999);
        assert!(p.p999 <= p.p100);
        assert!((p.p100 - 1000.0).abs() < 1.0);
    }

    #[test]
    fn should_apply_scale_to_every_percentile() {
        let p = compute(&[2_000, 2_000, 2_000], |v| v / 1_000.0).unwrap();
        assert!((p.p50 - 2.0).abs() < 0.01);
        assert!((p.p100 - 2.0).abs() < 0.01);
    }

    #[test]
    fn should_interpolate_between_ranks() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_sorted(&sorted, 50.0), 3.0);
        assert_eq!(percentile_sorted(&sorted, 100.0), 5.0);
        assert_eq!(percentile_sorted(&sorted, 25.0), 2.0);
    }
}
