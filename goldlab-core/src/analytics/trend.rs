//! Trend series: the filtered, day-deduplicated view of one company's prices.

use crate::domain::{Company, PriceRecord, Timestamp, DEFAULT_LOCATION};
use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Named lookback periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown period '{0}' (expected weekly, monthly, quarterly or yearly)")]
pub struct UnknownPeriod(pub String);

impl Period {
    pub const ALL: [Period; 4] = [
        Period::Weekly,
        Period::Monthly,
        Period::Quarterly,
        Period::Yearly,
    ];

    pub fn days(self) -> i64 {
        match self {
            Period::Weekly => 7,
            Period::Monthly => 30,
            Period::Quarterly => 90,
            Period::Yearly => 365,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Period::Weekly => "weekly",
            Period::Monthly => "monthly",
            Period::Quarterly => "quarterly",
            Period::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Period {
    type Err = UnknownPeriod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPeriod(s.to_string()))
    }
}

/// Selection for a trend series.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendQuery {
    pub company: String,
    pub instrument: Option<String>,
    /// `None` resolves through [`resolve_location`].
    pub location: Option<String>,
    pub days_back: Option<i64>,
}

impl TrendQuery {
    pub fn new(company: impl Into<String>) -> Self {
        Self {
            company: company.into(),
            ..Default::default()
        }
    }

    pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn days_back(mut self, days: i64) -> Self {
        self.days_back = Some(days);
        self
    }

    pub fn period(self, period: Period) -> Self {
        self.days_back(period.days())
    }
}

/// One point per calendar date, ascending. Absent prices read as `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub location: Option<String>,
    pub dates: Vec<Timestamp>,
    pub buy_prices: Vec<f64>,
    pub sell_prices: Vec<f64>,
}

impl TrendSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Build from points already in date order.
    pub fn from_points(points: &[(&str, f64, f64)]) -> Self {
        Self {
            location: None,
            dates: points.iter().map(|(d, _, _)| Timestamp::from(*d)).collect(),
            buy_prices: points.iter().map(|p| p.1).collect(),
            sell_prices: points.iter().map(|p| p.2).collect(),
        }
    }
}

/// Default location for a company when the caller names none.
///
/// Known companies: the first location in field-table order (restricted to
/// `instrument` when given) that has at least one candidate. Anything else
/// falls back to the location of the earliest candidate by
/// `(timestamp, location)`.
pub fn resolve_location(
    company: &str,
    instrument: Option<&str>,
    candidates: &[&PriceRecord],
) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    if let Some(known) = Company::from_code(company) {
        for loc in known.locations(instrument) {
            if candidates.iter().any(|r| r.location == loc) {
                return Some(loc.to_string());
            }
        }
    }
    candidates
        .iter()
        .min_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.location.cmp(&b.location))
        })
        .map(|r| r.location.clone())
}

/// First date inside a `days_back` window ending at `today`. Negative
/// windows count as zero; windows reaching past the calendar have no cutoff.
pub fn cutoff_date(today: NaiveDate, days_back: i64) -> NaiveDate {
    TimeDelta::try_days(days_back.max(0))
        .and_then(|span| today.checked_sub_signed(span))
        .unwrap_or(NaiveDate::MIN)
}

/// Later timestamps win a calendar day; on a tie the earlier field-table
/// entry wins.
fn supersedes(candidate: &PriceRecord, kept: &PriceRecord) -> bool {
    match candidate.timestamp.cmp(&kept.timestamp) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Equal => candidate.table_rank() < kept.table_rank(),
        std::cmp::Ordering::Less => false,
    }
}

/// Trend series for `query` as of `today`.
pub fn trend(records: &[PriceRecord], query: &TrendQuery, today: NaiveDate) -> TrendSeries {
    let candidates: Vec<&PriceRecord> = records
        .iter()
        .filter(|r| r.is_company(&query.company))
        .filter(|r| {
            query
                .instrument
                .as_deref()
                .map_or(true, |i| r.instrument == i)
        })
        .collect();

    let location = match &query.location {
        Some(loc) if loc.trim().is_empty() => Some(DEFAULT_LOCATION.to_string()),
        Some(loc) => Some(loc.clone()),
        None => resolve_location(&query.company, query.instrument.as_deref(), &candidates),
    };
    let Some(location) = location else {
        return TrendSeries::default();
    };

    let cutoff = query.days_back.map(|d| cutoff_date(today, d));

    let mut by_date: BTreeMap<&str, &PriceRecord> = BTreeMap::new();
    for record in candidates {
        if record.location != location {
            continue;
        }
        if let Some(cutoff) = cutoff {
            if record.timestamp.date_or_min() < cutoff {
                continue;
            }
        }
        match by_date.get(record.calendar_date()) {
            Some(kept) if !supersedes(record, kept) => {}
            _ => {
                by_date.insert(record.calendar_date(), record);
            }
        }
    }

    let mut series = TrendSeries {
        location: Some(location),
        ..Default::default()
    };
    for record in by_date.into_values() {
        series.dates.push(record.timestamp.clone());
        series.buy_prices.push(record.buy_price.unwrap_or(0.0));
        series.sell_prices.push(record.sell_price.unwrap_or(0.0));
    }
    series
}
