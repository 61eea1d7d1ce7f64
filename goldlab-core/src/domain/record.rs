//! Price records and their identity key.

use super::company::Company;
use super::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// Location used when a company does not segment its quotes by location.
pub const DEFAULT_LOCATION: &str = "National";

/// One quote for one instrument at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub timestamp: Timestamp,
    pub company: String,
    pub instrument: String,
    pub location: String,
    pub buy_price: Option<f64>,
    pub sell_price: Option<f64>,
}

/// Deduplication key: at most one record per key lives in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub date: String,
    pub company: String,
    pub instrument: String,
    pub location: String,
}

impl PriceRecord {
    /// Build a record, upper-casing the company and defaulting an empty location.
    pub fn new(
        timestamp: impl Into<Timestamp>,
        company: &str,
        instrument: impl Into<String>,
        location: &str,
        buy_price: Option<f64>,
        sell_price: Option<f64>,
    ) -> Self {
        let location = if location.trim().is_empty() {
            DEFAULT_LOCATION.to_string()
        } else {
            location.to_string()
        };
        Self {
            timestamp: timestamp.into(),
            company: company.trim().to_uppercase(),
            instrument: instrument.into(),
            location,
            buy_price,
            sell_price,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            date: self.calendar_date().to_string(),
            company: self.company.clone(),
            instrument: self.instrument.clone(),
            location: self.location.clone(),
        }
    }

    pub fn calendar_date(&self) -> &str {
        self.timestamp.date_part()
    }

    /// True when at least one side carries a usable price.
    pub fn has_price(&self) -> bool {
        is_quoted(self.buy_price) || is_quoted(self.sell_price)
    }

    /// Position of this record's identity in its company's field table.
    /// Unknown companies and off-table identities sort last.
    pub fn table_rank(&self) -> usize {
        Company::from_code(&self.company)
            .and_then(|c| c.table_position(&self.instrument, &self.location))
            .unwrap_or(usize::MAX)
    }

    /// Case-insensitive company match.
    pub fn is_company(&self, company: &str) -> bool {
        self.company.eq_ignore_ascii_case(company.trim())
    }
}

/// Providers send zero for "not quoted"; treat it like a missing value.
pub fn is_quoted(price: Option<f64>) -> bool {
    price.is_some_and(|p| p.is_finite() && p > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_company_and_location() {
        let rec = PriceRecord::new("2024-05-01 10:00:00", " sjc ", "SJC 1L", "", Some(1.0), None);
        assert_eq!(rec.company, "SJC");
        assert_eq!(rec.location, DEFAULT_LOCATION);
    }

    #[test]
    fn key_uses_calendar_date_only() {
        let a = PriceRecord::new(
            "2024-05-01 09:00:00",
            "SJC",
            "SJC 1L",
            "National",
            Some(1.0),
            None,
        );
        let b = PriceRecord::new(
            "2024-05-01 17:45:00",
            "SJC",
            "SJC 1L",
            "National",
            Some(2.0),
            None,
        );
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().date, "2024-05-01");
    }

    #[test]
    fn key_distinguishes_location() {
        let hcm = PriceRecord::new(
            "2024-05-01",
            "DOJI",
            "Gold Bar",
            "Ho Chi Minh City",
            Some(1.0),
            None,
        );
        let hn = PriceRecord::new("2024-05-01", "DOJI", "Gold Bar", "Hanoi", Some(1.0), None);
        assert_ne!(hcm.key(), hn.key());
    }

    #[test]
    fn zero_and_nan_are_not_prices() {
        let mut rec = PriceRecord::new(
            "2024-05-01",
            "PNJ",
            "PNJ 24K Ring",
            "National",
            Some(0.0),
            None,
        );
        assert!(!rec.has_price());
        rec.sell_price = Some(f64::NAN);
        assert!(!rec.has_price());
        rec.sell_price = Some(7_650_000.0);
        assert!(rec.has_price());
    }

    #[test]
    fn company_match_ignores_case() {
        let rec = PriceRecord::new("2024-05-01", "doji", "Gold Bar", "Hanoi", Some(1.0), None);
        assert!(rec.is_company("Doji"));
        assert!(!rec.is_company("PNJ"));
    }
}
