//! Gap detection and healing.
//!
//! The healer looks at the newest stored date and decides what to re-fetch:
//!
//! | store state            | action                                   | status                |
//! |------------------------|------------------------------------------|-----------------------|
//! | empty / no valid dates | fetch `lookback_days` into empty store   | `full_collection`     |
//! | `missing_days <= 0`    | nothing                                  | `up_to_date`          |
//! | `missing_days = d > 0` | fetch `max(min_window, d + buffer)` days | `updated` / `no_data` |
//!
//! The healing window is wider than the literal gap so mid-range holes left
//! by earlier partial fetches are refilled too.

use crate::data::{DateRange, Normalizer, QuoteProvider};
use crate::domain::{Company, PriceRecord};
use crate::reconcile::{MergeOutcome, Reconciler};
use crate::store::{RecordStore, StoreError};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealConfig {
    pub lookback_days: i64,
    pub min_window_days: i64,
    pub buffer_days: i64,
    pub companies: Vec<Company>,
    /// Local hour after which the day's quotes are normally published.
    pub publish_hour: u32,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            lookback_days: 365,
            min_window_days: 30,
            buffer_days: 5,
            companies: vec![Company::Sjc],
            publish_hour: 11,
        }
    }
}

/// Days to re-fetch for a gap of `missing_days`, or `None` when there is no gap.
pub fn healing_window(missing_days: i64, cfg: &HealConfig) -> Option<i64> {
    (missing_days > 0).then(|| cfg.min_window_days.max(missing_days + cfg.buffer_days))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealStatus {
    FullCollection,
    UpToDate,
    Updated,
    NoData,
}

impl fmt::Display for HealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealStatus::FullCollection => "full_collection",
            HealStatus::UpToDate => "up_to_date",
            HealStatus::Updated => "updated",
            HealStatus::NoData => "no_data",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealReport {
    pub status: HealStatus,
    pub message: String,
    pub last_date: Option<NaiveDate>,
    pub missing_days: Option<i64>,
    pub window: Option<DateRange>,
    /// Normalized records returned by the fetch.
    pub fetched: usize,
    pub outcome: MergeOutcome,
}

/// Why an empty fetch is expected, if it is.
fn no_data_hint(now: NaiveDateTime, missing_days: i64, publish_hour: u32) -> Option<String> {
    if now.weekday() == Weekday::Sun {
        Some("the gold market is typically closed on Sundays".into())
    } else if missing_days == 1 && now.hour() < publish_hour {
        Some(format!(
            "today's quotes may not be published yet (usually after {publish_hour}:00)"
        ))
    } else {
        None
    }
}

/// Heal `store` using `fetch` as the data source.
///
/// `fetch` maps a date range to normalized records; an empty result (or a
/// failed fetch reported as empty) leaves the store untouched.
pub fn heal_with<S, F>(
    store: &S,
    reconciler: &Reconciler,
    cfg: &HealConfig,
    now: NaiveDateTime,
    mut fetch: F,
) -> Result<HealReport, StoreError>
where
    S: RecordStore + ?Sized,
    F: FnMut(DateRange) -> Vec<PriceRecord>,
{
    let today = now.date();
    let existing = store.load()?;
    let last_date = crate::store::last_date(&existing);

    let Some(last) = last_date else {
        let window = DateRange::ending_at(today, cfg.lookback_days);
        tracing::info!(
            from = %window.from,
            to = %window.to,
            "store empty, collecting full history"
        );
        let batch = fetch(window);
        let result = reconciler.merge(&[], &batch);
        if !result.records.is_empty() {
            store.rewrite(&result.records)?;
        }
        return Ok(HealReport {
            status: HealStatus::FullCollection,
            message: format!(
                "collected full history ({} days): {} records",
                cfg.lookback_days,
                result.records.len()
            ),
            last_date: None,
            missing_days: None,
            window: Some(window),
            fetched: batch.len(),
            outcome: result.outcome,
        });
    };

    let missing_days = (today - last).num_days();
    let Some(days) = healing_window(missing_days, cfg) else {
        tracing::debug!(%last, "store is up to date");
        return Ok(HealReport {
            status: HealStatus::UpToDate,
            message: "no missing data".into(),
            last_date,
            missing_days: Some(missing_days),
            window: None,
            fetched: 0,
            outcome: MergeOutcome::default(),
        });
    };

    let window = DateRange::ending_at(today, days);
    tracing::info!(
        %last,
        missing_days,
        from = %window.from,
        to = %window.to,
        "healing gap"
    );
    let batch = fetch(window);
    let result = reconciler.merge(&existing, &batch);
    let retained = batch.len() - result.outcome.skipped;

    if retained == 0 {
        let mut message = String::from("no data available from provider");
        if let Some(hint) = no_data_hint(now, missing_days, cfg.publish_hour) {
            message.push_str(&format!(" ({hint})"));
        }
        tracing::info!(missing_days, "{message}");
        return Ok(HealReport {
            status: HealStatus::NoData,
            message,
            last_date,
            missing_days: Some(missing_days),
            window: Some(window),
            fetched: batch.len(),
            outcome: result.outcome,
        });
    }

    if !result.outcome.is_unchanged() {
        store.rewrite(&result.records)?;
    }
    Ok(HealReport {
        status: HealStatus::Updated,
        message: format!(
            "fetched {} records, added {}, replaced {}",
            batch.len(),
            result.outcome.additions,
            result.outcome.replacements
        ),
        last_date,
        missing_days: Some(missing_days),
        window: Some(window),
        fetched: batch.len(),
        outcome: result.outcome,
    })
}

/// Healer bound to a quote provider.
pub struct Healer<'a> {
    provider: &'a dyn QuoteProvider,
    normalizer: Normalizer,
    reconciler: Reconciler,
    config: HealConfig,
    request_delay: Duration,
}

impl<'a> Healer<'a> {
    pub fn new(provider: &'a dyn QuoteProvider, config: HealConfig) -> Self {
        Self {
            provider,
            normalizer: Normalizer::default(),
            reconciler: Reconciler::default(),
            config,
            request_delay: Duration::ZERO,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Pause between per-company requests.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn config(&self) -> &HealConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    fn pause(&self, index: usize) {
        if index + 1 < self.config.companies.len() && !self.request_delay.is_zero() {
            std::thread::sleep(self.request_delay);
        }
    }

    /// Normalized records for every tracked company over `range`. Failed
    /// fetches contribute nothing.
    pub fn fetch_range(&self, range: DateRange, now: NaiveDateTime) -> Vec<PriceRecord> {
        let mut records = Vec::new();
        for (i, &company) in self.config.companies.iter().enumerate() {
            match self.provider.fetch(company, range) {
                Ok(result) => {
                    tracing::debug!(
                        %company,
                        quotes = result.quotes.len(),
                        source = ?result.source,
                        "fetched"
                    );
                    records.extend(self.normalizer.batch_records(company, &result.quotes, now));
                }
                Err(e) => {
                    tracing::warn!(
                        %company,
                        provider = self.provider.name(),
                        error = %e,
                        "fetch failed, treating as no data"
                    );
                }
            }
            self.pause(i);
        }
        records
    }

    /// Normalized current quotes for every tracked company.
    pub fn fetch_current(&self, now: NaiveDateTime) -> Vec<PriceRecord> {
        let mut records = Vec::new();
        for (i, &company) in self.config.companies.iter().enumerate() {
            match self.provider.fetch_current(company) {
                Ok(result) => {
                    records.extend(self.normalizer.batch_records(company, &result.quotes, now));
                }
                Err(e) => {
                    tracing::warn!(
                        %company,
                        provider = self.provider.name(),
                        error = %e,
                        "current fetch failed"
                    );
                }
            }
            self.pause(i);
        }
        records
    }

    /// Close any gap between the store's newest date and `now`.
    pub fn heal<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        now: NaiveDateTime,
    ) -> Result<HealReport, StoreError> {
        heal_with(store, &self.reconciler, &self.config, now, |range| {
            self.fetch_range(range, now)
        })
    }

    /// Unconditional full-lookback collection merged into an empty store.
    /// Existing content is replaced when the fetch produced anything.
    pub fn collect<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        now: NaiveDateTime,
    ) -> Result<MergeOutcome, StoreError> {
        let window = DateRange::ending_at(now.date(), self.config.lookback_days);
        let batch = self.fetch_range(window, now);
        let result = self.reconciler.merge(&[], &batch);
        if result.records.is_empty() {
            tracing::warn!("full collection returned no data; store left untouched");
        } else {
            store.rewrite(&result.records)?;
            tracing::info!(records = result.records.len(), "full collection written");
        }
        Ok(result.outcome)
    }

    /// Fetch current quotes and reconcile them into the store.
    pub fn merge_current<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        now: NaiveDateTime,
    ) -> Result<MergeOutcome, StoreError> {
        let batch = self.fetch_current(now);
        self.reconciler.reconcile_into(store, &batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn rec(ts: &str, buy: f64) -> PriceRecord {
        PriceRecord::new(ts, "SJC", "SJC 1L", "National", Some(buy), Some(buy + 2.0))
    }

    fn heal_default<F>(store: &MemoryStore, now: NaiveDateTime, fetch: F) -> HealReport
    where
        F: FnMut(DateRange) -> Vec<PriceRecord>,
    {
        heal_with(store, &Reconciler::default(), &HealConfig::default(), now, fetch).unwrap()
    }

    #[test]
    fn window_rule() {
        let cfg = HealConfig::default();
        assert_eq!(healing_window(0, &cfg), None);
        assert_eq!(healing_window(-3, &cfg), None);
        assert_eq!(healing_window(1, &cfg), Some(30));
        assert_eq!(healing_window(25, &cfg), Some(30));
        assert_eq!(healing_window(26, &cfg), Some(31));
        assert_eq!(healing_window(100, &cfg), Some(105));
    }

    #[test]
    fn empty_store_collects_full_history() {
        let store = MemoryStore::default();
        let mut requested = None;
        let report = heal_default(&store, at(2024, 6, 10, 12), |range| {
            requested = Some(range);
            vec![rec("2024-06-07 09:00:00", 100.0)]
        });
        assert_eq!(report.status, HealStatus::FullCollection);
        assert_eq!(requested.unwrap().days(), 365);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn up_to_date_does_not_fetch() {
        let store = MemoryStore::new(vec![rec("2024-06-10 09:00:00", 100.0)]);
        let report = heal_default(&store, at(2024, 6, 10, 12), |_| panic!("must not fetch"));
        assert_eq!(report.status, HealStatus::UpToDate);
        assert_eq!(report.missing_days, Some(0));
    }

    #[test]
    fn gap_is_healed_with_wide_window() {
        let store = MemoryStore::new(vec![rec("2024-06-01 09:00:00", 100.0)]);
        let mut requested = None;
        let report = heal_default(&store, at(2024, 6, 10, 12), |range| {
            requested = Some(range);
            vec![rec("2024-05-20 09:00:00", 98.0), rec("2024-06-10 09:00:00", 103.0)]
        });
        assert_eq!(report.status, HealStatus::Updated);
        assert_eq!(report.missing_days, Some(9));
        assert_eq!(requested.unwrap().days(), 30);
        assert_eq!(report.outcome.additions, 2);
        assert_eq!(store.snapshot().len(), 3);
    }

    #[test]
    fn empty_fetch_on_sunday_is_no_data_with_hint() {
        let store = MemoryStore::new(vec![rec("2024-06-08 09:00:00", 100.0)]);
        // 2024-06-09 is a Sunday.
        let report = heal_default(&store, at(2024, 6, 9, 15), |_| Vec::new());
        assert_eq!(report.status, HealStatus::NoData);
        assert!(report.message.contains("Sundays"));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn early_morning_hint() {
        let store = MemoryStore::new(vec![rec("2024-06-10 09:00:00", 100.0)]);
        let report = heal_default(&store, at(2024, 6, 11, 8), |_| Vec::new());
        assert_eq!(report.status, HealStatus::NoData);
        assert!(report.message.contains("not be published yet"));
    }

    #[test]
    fn malformed_only_store_counts_as_empty() {
        let store = MemoryStore::new(vec![rec("yesterday", 100.0)]);
        let report = heal_default(&store, at(2024, 6, 11, 12), |_| Vec::new());
        assert_eq!(report.status, HealStatus::FullCollection);
        assert_eq!(store.write_count(), 0);
    }
}
