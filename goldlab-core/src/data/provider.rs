//! Quote provider trait and structured error types.
//!
//! The QuoteProvider trait abstracts over quote sources (the remote HTTP API,
//! the synthetic generator, test doubles) so the healer and poller never know
//! where a batch came from.

use crate::domain::Company;
use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// One raw object from the provider: an epoch timestamp plus named prices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawQuote {
    pub datetime: Option<i64>,
    pub fields: BTreeMap<String, f64>,
}

impl RawQuote {
    /// Build from a JSON object. Numbers and numeric strings are both accepted;
    /// anything else is dropped.
    pub fn from_json(object: &Map<String, Value>) -> Self {
        let mut quote = RawQuote::default();
        for (name, value) in object {
            if name == "datetime" {
                quote.datetime = match value {
                    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                };
                continue;
            }
            let number = match value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let Some(n) = number {
                quote.fields.insert(name.clone(), n);
            }
        }
        quote
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }
}

/// Inclusive calendar-date range requested from a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    /// The `days`-wide window ending at `to`. Negative widths collapse to
    /// the single day `to`; widths past the calendar start at `NaiveDate::MIN`.
    pub fn ending_at(to: NaiveDate, days: i64) -> Self {
        let from = TimeDelta::try_days(days.max(0))
            .and_then(|span| to.checked_sub_signed(span))
            .unwrap_or(NaiveDate::MIN);
        Self { from, to }
    }

    pub fn days(&self) -> i64 {
        (self.to - self.from).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

/// Structured error types for provider operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("http client setup failed: {0}")]
    ClientSetup(String),

    #[error("provider error: {0}")]
    Other(String),
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    VnAppMob,
    Synthetic,
    Fixture,
}

/// Result of a successful fetch for one company.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub company: Company,
    pub quotes: Vec<RawQuote>,
    pub source: DataSource,
}

/// Trait for quote providers.
///
/// Providers only fetch. Normalization into records and merging into the
/// store happen above this trait.
pub trait QuoteProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Quotes for a company over an inclusive date range.
    fn fetch(&self, company: Company, range: DateRange) -> Result<FetchResult, DataError>;

    /// The provider's current quotes for a company.
    fn fetch_current(&self, company: Company) -> Result<FetchResult, DataError>;

    /// Whether requests are currently allowed (not rate limited or blocked).
    fn is_available(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_quote_accepts_numbers_and_numeric_strings() {
        let obj = json!({
            "datetime": "1714528800",
            "buy_1l": 84_500_000.0,
            "sell_1l": "86500000",
            "note": "closed",
            "buy_nhan1c": null
        });
        let quote = RawQuote::from_json(obj.as_object().unwrap());
        assert_eq!(quote.datetime, Some(1_714_528_800));
        assert_eq!(quote.field("buy_1l"), Some(84_500_000.0));
        assert_eq!(quote.field("sell_1l"), Some(86_500_000.0));
        assert_eq!(quote.field("note"), None);
        assert_eq!(quote.field("buy_nhan1c"), None);
    }

    #[test]
    fn raw_quote_numeric_datetime() {
        let obj = json!({ "datetime": 1714528800 });
        let quote = RawQuote::from_json(obj.as_object().unwrap());
        assert_eq!(quote.datetime, Some(1_714_528_800));
    }

    #[test]
    fn date_range_window() {
        let to = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let range = DateRange::ending_at(to, 30);
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
        assert_eq!(range.days(), 30);
        assert!(range.contains(to));
        assert!(!range.contains(to + TimeDelta::days(1)));
    }

    #[test]
    fn date_range_clamps_extreme_widths() {
        let to = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert_eq!(DateRange::ending_at(to, -3).from, to);
        assert_eq!(DateRange::ending_at(to, 200_000_000).from, NaiveDate::MIN);
        assert_eq!(DateRange::ending_at(to, i64::MAX).from, NaiveDate::MIN);
    }
}
