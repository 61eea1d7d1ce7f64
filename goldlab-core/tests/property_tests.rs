//! Property tests for store invariants.
//!
//! Uses proptest to verify:
//! 1. Uniqueness: no two merged records share an identity key
//! 2. Idempotence: merging the same batch twice equals merging it once
//! 3. Batch order: the last retained record for a key in the batch wins
//! 4. Newest timestamp: the alternative policy keeps the latest timestamp
//! 5. Healing window: `d > 0` fetches `max(30, d + 5)` days, otherwise nothing
//! 6. Analytics shapes: trend dedup, moving-average length, extremes bounds

use chrono::NaiveDate;
use goldlab_core::analytics::{extremes, moving_average, trend, TrendQuery, TrendSeries};
use goldlab_core::domain::{PriceRecord, RecordKey};
use goldlab_core::{healing_window, HealConfig, MergePolicy, Reconciler, RetentionPolicy};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_record() -> impl Strategy<Value = PriceRecord> {
    (
        1u32..=20,
        0u32..24,
        0usize..3,
        0usize..2,
        1u32..1000,
        proptest::option::of(1u32..1000),
    )
        .prop_map(|(day, hour, inst, loc, buy, sell)| {
            let instrument = ["SJC 1L", "SJC Ring 1C", "Gold Bar"][inst];
            let location = ["National", "Hanoi"][loc];
            PriceRecord::new(
                format!("2024-03-{day:02} {hour:02}:00:00"),
                "SJC",
                instrument,
                location,
                Some(f64::from(buy)),
                sell.map(f64::from),
            )
        })
}

fn arb_batch() -> impl Strategy<Value = Vec<PriceRecord>> {
    proptest::collection::vec(arb_record(), 0..60)
}

fn keys(records: &[PriceRecord]) -> Vec<RecordKey> {
    records.iter().map(PriceRecord::key).collect()
}

// ── 1. Uniqueness ────────────────────────────────────────────────────

proptest! {
    #[test]
    fn merged_keys_are_unique(existing in arb_batch(), incoming in arb_batch()) {
        let result = Reconciler::default().merge(&existing, &incoming);
        let all = keys(&result.records);
        let unique: HashSet<_> = all.iter().cloned().collect();
        prop_assert_eq!(all.len(), unique.len());
    }

    #[test]
    fn merged_records_are_sorted_by_timestamp(existing in arb_batch(), incoming in arb_batch()) {
        let result = Reconciler::default().merge(&existing, &incoming);
        prop_assert!(result.records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

// ── 2. Idempotence ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn merge_is_idempotent(existing in arb_batch(), incoming in arb_batch()) {
        let r = Reconciler::default();
        let once = r.merge(&existing, &incoming);
        let twice = r.merge(&once.records, &incoming);
        prop_assert_eq!(&once.records, &twice.records);
        prop_assert!(twice.outcome.is_unchanged());
    }

    #[test]
    fn newest_policy_is_idempotent(existing in arb_batch(), incoming in arb_batch()) {
        let r = Reconciler::new(MergePolicy::NewestTimestamp, RetentionPolicy::default());
        let once = r.merge(&existing, &incoming);
        let twice = r.merge(&once.records, &incoming);
        prop_assert_eq!(&once.records, &twice.records);
        prop_assert!(twice.outcome.is_unchanged());
    }
}

// ── 3. Batch order wins ──────────────────────────────────────────────

proptest! {
    #[test]
    fn last_in_batch_wins(existing in arb_batch(), incoming in arb_batch()) {
        let result = Reconciler::default().merge(&existing, &incoming);
        let mut last: HashMap<RecordKey, &PriceRecord> = HashMap::new();
        for record in &incoming {
            last.insert(record.key(), record);
        }
        for record in &result.records {
            if let Some(expected) = last.get(&record.key()) {
                prop_assert_eq!(record, *expected);
            }
        }
        // every incoming key is present
        let stored: HashSet<_> = keys(&result.records).into_iter().collect();
        prop_assert!(last.keys().all(|k| stored.contains(k)));
    }

    #[test]
    fn counts_match_key_sets(existing in arb_batch(), incoming in arb_batch()) {
        let r = Reconciler::default();
        let base = r.merge(&existing, &[]);
        let result = r.merge(&base.records, &incoming);
        let before: HashSet<_> = keys(&base.records).into_iter().collect();
        let after: HashSet<_> = keys(&result.records).into_iter().collect();
        prop_assert_eq!(result.outcome.additions, after.difference(&before).count());
        prop_assert_eq!(result.records.len(), base.records.len() + result.outcome.additions);
    }
}

// ── 4. Newest timestamp policy ───────────────────────────────────────

proptest! {
    #[test]
    fn newest_policy_keeps_latest_timestamp(existing in arb_batch(), incoming in arb_batch()) {
        let r = Reconciler::new(MergePolicy::NewestTimestamp, RetentionPolicy::default());
        let result = r.merge(&existing, &incoming);
        let mut latest: HashMap<RecordKey, &str> = HashMap::new();
        for record in existing.iter().chain(&incoming) {
            let entry = latest.entry(record.key()).or_insert(record.timestamp.as_str());
            if record.timestamp.as_str() > *entry {
                *entry = record.timestamp.as_str();
            }
        }
        for record in &result.records {
            prop_assert_eq!(record.timestamp.as_str(), latest[&record.key()]);
        }
    }
}

// ── 5. Healing window ────────────────────────────────────────────────

proptest! {
    #[test]
    fn healing_window_rule(d in -400i64..400) {
        let cfg = HealConfig::default();
        match healing_window(d, &cfg) {
            None => prop_assert!(d <= 0),
            Some(w) => {
                prop_assert!(d > 0);
                prop_assert_eq!(w, 30.max(d + 5));
                prop_assert!(w > d);
            }
        }
    }
}

// ── 6. Analytics shapes ──────────────────────────────────────────────

proptest! {
    #[test]
    fn trend_has_one_ascending_point_per_date(records in arb_batch()) {
        let today = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let query = TrendQuery::new("sjc").instrument("SJC 1L").location("National");
        let series = trend(&records, &query, today);
        let dates: Vec<&str> = series.dates.iter().map(|t| t.date_part()).collect();
        prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(series.buy_prices.len(), series.len());
        prop_assert_eq!(series.sell_prices.len(), series.len());
    }

    #[test]
    fn moving_average_length(n in 0usize..40, w in 1usize..15) {
        let dates: Vec<String> = (0..n).map(|i| format!("2024-01-{:02}", i % 28 + 1)).collect();
        let points: Vec<(&str, f64, f64)> = dates.iter().enumerate()
            .map(|(i, d)| (d.as_str(), i as f64, i as f64 * 2.0))
            .collect();
        let ma = moving_average(&TrendSeries::from_points(&points), w);
        let expected = if n >= w { n - w + 1 } else { 0 };
        prop_assert_eq!(ma.buy_ma.len(), expected);
        prop_assert_eq!(ma.dates.len(), expected);
    }

    #[test]
    fn extremes_bound_every_point(values in proptest::collection::vec(1.0..1000.0f64, 1..30)) {
        let dates: Vec<String> = (0..values.len())
            .map(|i| format!("2024-02-{:02}", i + 1))
            .collect();
        let points: Vec<(&str, f64, f64)> = dates
            .iter()
            .zip(&values)
            .map(|(d, &v)| (d.as_str(), v, v))
            .collect();
        let e = extremes(&TrendSeries::from_points(&points));
        prop_assert!(values.iter().all(|&v| e.buy.min <= v && v <= e.buy.max));
        let first_min = values.iter().position(|&v| v == e.buy.min).unwrap();
        prop_assert_eq!(e.buy.min_date.as_ref().unwrap().as_str(), dates[first_min].as_str());
    }
}
