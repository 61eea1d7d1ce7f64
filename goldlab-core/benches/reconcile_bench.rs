//! Criterion benchmarks for GoldLab hot paths.
//!
//! Benchmarks:
//! 1. Reconciler merge (year of history + healing-window batch)
//! 2. Trend series extraction with location resolution
//! 3. Moving average and volatility over a year-long series

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use goldlab_core::analytics::{moving_average, trend, volatility, TrendQuery};
use goldlab_core::data::{DateRange, Normalizer, SyntheticProvider};
use goldlab_core::domain::{Company, PriceRecord};
use goldlab_core::Reconciler;

// ── Helpers ──────────────────────────────────────────────────────────

fn history(days: i64) -> Vec<PriceRecord> {
    let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    let range = DateRange::ending_at(end, days);
    let fetched_at = end.and_hms_opt(12, 0, 0).unwrap();
    let normalizer = Normalizer::default();
    Company::ALL
        .into_iter()
        .flat_map(|c| normalizer.batch_records(c, &SyntheticProvider::quotes(c, range), fetched_at))
        .collect()
}

// ── 1. Merge ─────────────────────────────────────────────────────────

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let reconciler = Reconciler::default();
    for days in [30i64, 365] {
        let existing = history(days);
        let batch: Vec<PriceRecord> = history(30)
            .into_iter()
            .map(|mut r| {
                r.buy_price = r.buy_price.map(|p| p + 1.0);
                r
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("healing_batch", days), &days, |b, _| {
            b.iter(|| reconciler.merge(black_box(&existing), black_box(&batch)))
        });
    }
    group.finish();
}

// ── 2. Trend ─────────────────────────────────────────────────────────

fn bench_trend(c: &mut Criterion) {
    let records = history(365);
    let today = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
    let query = TrendQuery::new("DOJI").days_back(90);
    c.bench_function("trend/doji_default_location", |b| {
        b.iter(|| trend(black_box(&records), black_box(&query), today))
    });
}

// ── 3. Series metrics ────────────────────────────────────────────────

fn bench_series_metrics(c: &mut Criterion) {
    let records = history(365);
    let today = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap() + Duration::days(1);
    let series = trend(&records, &TrendQuery::new("SJC").instrument("SJC 1L"), today);
    c.bench_function("metrics/moving_average_7", |b| {
        b.iter(|| moving_average(black_box(&series), 7))
    });
    c.bench_function("metrics/volatility", |b| {
        b.iter(|| volatility(black_box(&series)))
    });
}

criterion_group!(benches, bench_merge, bench_trend, bench_series_metrics);
criterion_main!(benches);
