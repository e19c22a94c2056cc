//! Performance benchmarks for reconciliation and throttling.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parking_lot::Mutex;
use rowsync::reconcile::{diff, reconcile_once, BudgetedPatcher};
use rowsync::snapshot::assemble_rows;
use rowsync::{Match, Odds, PerKeyThrottle, Row, RowId};
use std::time::{Duration, Instant};

fn make_rows(ids: impl Iterator<Item = i64>, salt: i64) -> Vec<Row> {
    ids.map(|id| Row {
        id: RowId(id),
        team_a: format!("Team {id}"),
        team_b: "Rivals".into(),
        time: format!("2025-07-{:02}T12:00:00Z", id % 28 + 1),
        odds_a: format!("{}.00", (id + salt) % 5 + 1),
        odds_b: "2.00".into(),
    })
    .collect()
}

/// Diff cost when a handful of rows churn in a large list
fn bench_diff_small_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_small_delta");

    for size in [100, 1_000, 10_000] {
        let old = make_rows(0..size, 0);
        // drop the first five, append five new ones
        let new = make_rows(5..size + 5, 0);

        group.bench_with_input(BenchmarkId::new("rows", size), &size, |b, _| {
            b.iter(|| black_box(diff(&old, &new)));
        });
    }

    group.finish();
}

/// Worst case: complete reversal
fn bench_diff_reversed(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_reversed");

    for size in [100, 1_000, 10_000] {
        let old = make_rows(0..size, 0);
        let new = make_rows((0..size).rev(), 0);

        group.bench_with_input(BenchmarkId::new("rows", size), &size, |b, _| {
            b.iter(|| black_box(diff(&old, &new)));
        });
    }

    group.finish();
}

/// Full cycle: diff, budgeted apply, fallback when over budget
fn bench_reconcile_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_cycle");
    let patcher = BudgetedPatcher::new(100);

    for (label, salt) in [("within_budget", 0), ("content_churn", 1)] {
        let old = make_rows(0..1_000, 0);
        let target = make_rows(10..1_010, salt);

        group.bench_function(label, |b| {
            b.iter(|| {
                let held = Mutex::new(old.clone());
                black_box(reconcile_once(&held, &target, &patcher));
            });
        });
    }

    group.finish();
}

fn bench_assemble_rows(c: &mut Criterion) {
    let matches: Vec<Match> = (0..2_000)
        .map(|id| Match {
            id,
            team_a: format!("Home {id}"),
            team_b: format!("Away {id}"),
            start_time: format!("2025-07-{:02}T12:00:00Z", id % 28 + 1),
        })
        .collect();
    let odds: Vec<Odds> = (0..2_000)
        .step_by(2)
        .map(|id| Odds {
            match_id: id,
            team_a_odds: 1.5,
            team_b_odds: 2.5,
        })
        .collect();

    c.bench_function("assemble_rows_2000", |b| {
        b.iter(|| black_box(assemble_rows(&matches, &odds)));
    });
}

fn bench_throttle_submit(c: &mut Criterion) {
    c.bench_function("throttle_submit_and_drain", |b| {
        b.iter(|| {
            let mut throttle = PerKeyThrottle::new(Duration::from_millis(100));
            let now = Instant::now();
            for i in 0..1_000u64 {
                throttle.submit(i % 50, i, now);
            }
            black_box(throttle.take_due(now + Duration::from_millis(100)));
        });
    });
}

criterion_group!(
    benches,
    bench_diff_small_delta,
    bench_diff_reversed,
    bench_reconcile_cycle,
    bench_assemble_rows,
    bench_throttle_submit,
);

criterion_main!(benches);
