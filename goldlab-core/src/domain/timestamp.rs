//! String-sortable quote timestamps.
//!
//! Stored timestamps use `YYYY-MM-DD HH:MM:SS` (or a bare `YYYY-MM-DD`), so
//! lexicographic order is chronological order. The raw string is kept as-is:
//! rows with a malformed timestamp survive a load/rewrite cycle untouched and
//! are simply invisible to date-based filters.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format used for every timestamp the system writes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format of the calendar-date portion.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        Self(dt.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The calendar-date portion (everything before the first space).
    ///
    /// This is the deduplication unit and is taken textually, so it is defined
    /// even when the timestamp does not parse.
    pub fn date_part(&self) -> &str {
        self.0.split_once(' ').map_or(self.0.as_str(), |(date, _)| date)
    }

    /// Parse with second resolution. `None` for malformed input.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        if self.0.contains(' ') {
            NaiveDateTime::parse_from_str(&self.0, TIMESTAMP_FORMAT).ok()
        } else {
            NaiveDate::parse_from_str(&self.0, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
    }

    /// Parse with day resolution. `None` for malformed input.
    pub fn to_date(&self) -> Option<NaiveDate> {
        self.to_datetime().map(|dt| dt.date())
    }

    /// Day-resolution date where malformed input sorts before every real date.
    pub fn date_or_min(&self) -> NaiveDate {
        self.to_date().unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Timestamp {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Timestamp {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_part_splits_on_space() {
        assert_eq!(Timestamp::new("2024-03-05 09:30:00").date_part(), "2024-03-05");
        assert_eq!(Timestamp::new("2024-03-05").date_part(), "2024-03-05");
        assert_eq!(Timestamp::new("garbage").date_part(), "garbage");
    }

    #[test]
    fn parses_both_layouts() {
        let full = Timestamp::new("2024-03-05 09:30:00");
        let bare = Timestamp::new("2024-03-05");
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(full.to_date(), Some(day));
        assert_eq!(bare.to_date(), Some(day));
        assert_eq!(
            bare.to_datetime(),
            day.and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn malformed_is_minimum_date() {
        let ts = Timestamp::new("05/03/2024 9am");
        assert_eq!(ts.to_date(), None);
        assert_eq!(ts.date_or_min(), NaiveDate::MIN);
    }

    #[test]
    fn ordering_is_chronological() {
        let a = Timestamp::new("2024-01-01 15:00:00");
        let b = Timestamp::new("2024-01-02 09:00:00");
        let c = Timestamp::new("2024-01-02");
        assert!(a < b);
        assert!(c < b);
    }

    #[test]
    fn roundtrips_through_datetime() {
        let dt = NaiveDate::from_ymd_opt(2025, 11, 2)
            .unwrap()
            .and_hms_opt(8, 5, 9)
            .unwrap();
        let ts = Timestamp::from_datetime(dt);
        assert_eq!(ts.as_str(), "2025-11-02 08:05:09");
        assert_eq!(ts.to_datetime(), Some(dt));
    }
}
