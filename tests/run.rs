//! In-process runs through the public API.

use cntryl_microbench::{
    BenchmarkUnit, FailureKind, HarnessError, Mode, Registry, RunOptions, Runner, TimeUnit,
    UnitOutcome,
};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Input {
    x: f64,
}

fn deadcode_registry() -> Registry {
    let mut r = Registry::new();
    r.register(BenchmarkUnit::builder("baseline").run(|| {}))
        .unwrap();
    r.register(
        BenchmarkUnit::builder("measure_wrong")
            .thread_state(|| Input { x: PI })
            .run(|s: &mut Input| {
                let _ = s.x.ln();
            }),
    )
    .unwrap();
    r.register(
        BenchmarkUnit::builder("measure_right")
            .thread_state(|| Input { x: PI })
            .run(|s: &mut Input| s.x.ln()),
    )
    .unwrap();
    r
}

fn quick() -> RunOptions {
    RunOptions::new()
        .forks(0)
        .warmup(2)
        .iterations(5)
        .warmup_time(Duration::from_millis(2))
        .measurement_time(Duration::from_millis(2))
        .verbose(false)
}

#[test]
fn should_report_three_statistics_for_deadcode_units() {
    let summary = Runner::new(deadcode_registry()).run(&quick()).unwrap();

    assert!(summary.success());
    let stats = summary.statistics();
    assert_eq!(stats.len(), 3);
    for name in ["baseline", "measure_wrong", "measure_right"] {
        let s = &stats[name];
        assert_eq!(s.count, 5);
        assert_eq!(s.scores.len(), 5);
        assert!(s.mean >= 0.0);
        assert!(s.min <= s.mean && s.mean <= s.max);
        assert_eq!(s.score_unit(), "ns/op");
    }
    // outcomes keep selection order
    let order: Vec<&str> = summary.outcomes.iter().map(UnitOutcome::unit_name).collect();
    assert_eq!(order, ["baseline", "measure_wrong", "measure_right"]);
}

#[test]
fn should_abort_with_selection_error_when_filter_matches_nothing() {
    let err = Runner::new(deadcode_registry())
        .run(&quick().include("nonexistent"))
        .unwrap_err();
    assert!(matches!(err, HarnessError::Selection { .. }));
    assert!(err.is_fatal());
}

#[test]
fn should_run_only_selected_units() {
    let summary = Runner::new(deadcode_registry())
        .run(&quick().include("measure_*"))
        .unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert!(summary.get("baseline").is_none());
}

#[test]
fn should_keep_running_other_units_when_one_panics() {
    let mut registry = deadcode_registry();
    registry
        .register(BenchmarkUnit::builder("explodes").run(|| -> f64 { panic!("body failure") }))
        .unwrap();

    let summary = Runner::new(registry).run(&quick()).unwrap();

    assert!(!summary.success());
    assert_eq!(summary.outcomes.len(), 4);
    assert_eq!(summary.statistics().len(), 3);
    let failure = summary.failures()[0];
    assert_eq!(failure.unit_name, "explodes");
    assert_eq!(failure.kind, FailureKind::Execution);
    assert!(failure.reason.contains("body failure"));
}

#[test]
fn should_fail_unit_as_incomplete_when_timeout_expires() {
    let mut registry = Registry::new();
    registry
        .register(BenchmarkUnit::builder("slow").run(|| std::thread::sleep(Duration::from_millis(20))))
        .unwrap();
    registry
        .register(BenchmarkUnit::builder("fast").run(|| 1u32))
        .unwrap();

    let opts = quick()
        .batch_size(1)
        .iterations(50)
        .timeout(Duration::from_secs(1));
    let summary = Runner::new(registry).run(&opts).unwrap();

    let slow = summary.get("slow").and_then(UnitOutcome::failure).unwrap();
    assert_eq!(slow.kind, FailureKind::Incomplete);
    assert!(summary.get("fast").is_some_and(UnitOutcome::is_success));
}

#[test]
fn should_reject_zero_measurement_iterations_before_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let mut registry = Registry::new();
    registry
        .register(BenchmarkUnit::builder("counted").run(move || c.fetch_add(1, Ordering::SeqCst)))
        .unwrap();

    let err = Runner::new(registry).run(&quick().iterations(0)).unwrap_err();
    assert!(matches!(err, HarnessError::Configuration(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn should_report_zero_error_when_single_iteration() {
    let summary = Runner::new(deadcode_registry())
        .run(&quick().iterations(1).include("measure_right"))
        .unwrap();
    let stats = &summary.statistics()["measure_right"];
    assert_eq!(stats.count, 1);
    assert_eq!(stats.std_error, 0.0);
}

#[test]
fn should_give_each_thread_its_own_state_when_thread_scoped() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let next = Arc::new(AtomicUsize::new(0));
    let (s, n) = (Arc::clone(&seen), Arc::clone(&next));
    let mut registry = Registry::new();
    registry
        .register(
            BenchmarkUnit::builder("per_thread")
                .thread_state(move || (n.fetch_add(1, Ordering::SeqCst), Arc::clone(&s)))
                .run(|(id, seen): &mut (usize, Arc<Mutex<Vec<usize>>>)| {
                    if let Ok(mut v) = seen.lock() {
                        if !v.contains(id) {
                            v.push(*id);
                        }
                    }
                    *id
                }),
        )
        .unwrap();

    let summary = Runner::new(registry)
        .run(&quick().threads(4).warmup(0).iterations(2).batch_size(10))
        .unwrap();

    assert!(summary.success());
    assert_eq!(next.load(Ordering::SeqCst), 4);
    let mut ids = seen.lock().unwrap().clone();
    ids.sort_unstable();
    assert_eq!(ids, [0, 1, 2, 3]);
}

#[test]
fn should_share_one_state_when_benchmark_scoped() {
    let inits = Arc::new(AtomicUsize::new(0));
    let i = Arc::clone(&inits);
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let mut registry = Registry::new();
    registry
        .register(
            BenchmarkUnit::builder("shared")
                .shared_state(move || {
                    i.fetch_add(1, Ordering::SeqCst);
                    Arc::clone(&h)
                })
                .run(|hits: &Arc<AtomicUsize>| hits.fetch_add(1, Ordering::Relaxed)),
        )
        .unwrap();

    let summary = Runner::new(registry)
        .run(&quick().threads(3).warmup(1).iterations(2).batch_size(100))
        .unwrap();

    assert!(summary.success());
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    // 3 threads x (1 warmup + 2 measured) x 100 invocations, all on one instance
    assert_eq!(hits.load(Ordering::Relaxed), 900);
    assert_eq!(summary.statistics()["shared"].count, 2);
}

#[test]
fn should_report_operations_per_unit_when_throughput() {
    let mut registry = Registry::new();
    registry
        .register(
            BenchmarkUnit::builder("thrpt")
                .mode(Mode::Throughput)
                .time_unit(TimeUnit::Seconds)
                .run(|| std::thread::sleep(Duration::from_millis(1))),
        )
        .unwrap();

    let summary = Runner::new(registry)
        .run(&quick().iterations(3).batch_size(5))
        .unwrap();
    let stats = &summary.statistics()["thrpt"];
    assert_eq!(stats.score_unit(), "ops/s");
    // a 1ms sleep caps throughput near 1000 ops/s
    assert!(stats.mean > 0.0 && stats.mean < 1_000.0);
}

#[test]
fn should_report_percentiles_when_sample_mode() {
    let mut registry = Registry::new();
    registry
        .register(
            BenchmarkUnit::builder("sampled")
                .mode(Mode::SampleTime)
                .time_unit(TimeUnit::Microseconds)
                .run(|| PI.sqrt()),
        )
        .unwrap();

    let summary = Runner::new(registry)
        .run(&quick().iterations(3).batch_size(200))
        .unwrap();
    let stats = &summary.statistics()["sampled"];
    assert_eq!(stats.count, 3);
    let p = stats.percentiles.as_ref().unwrap();
    assert!(p.p50 <= p.p90 && p.p90 <= p.p99 && p.p99 <= p.p100);
    assert_eq!(stats.score_unit(), "us/op");
}

#[test]
fn should_run_single_shot_once_per_iteration() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let mut registry = Registry::new();
    registry
        .register(
            BenchmarkUnit::builder("cold")
                .mode(Mode::SingleShot)
                .run(move || c.fetch_add(1, Ordering::SeqCst)),
        )
        .unwrap();

    let summary = Runner::new(registry).run(&quick()).unwrap();
    assert!(summary.success());
    // 2 warmup + 5 measured
    assert_eq!(calls.load(Ordering::SeqCst), 7);
}
