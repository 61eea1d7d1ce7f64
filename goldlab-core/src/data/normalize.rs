//! Raw provider quotes → price records.
//!
//! The field table for each company drives the conversion: every mapping
//! entry with at least one quoted side becomes one record, in table order.

use super::provider::RawQuote;
use crate::domain::{is_quoted, Company, PriceRecord, Timestamp};
use chrono::{DateTime, FixedOffset, NaiveDateTime};

/// Converts raw quotes into records stamped in the provider's local time.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    offset: FixedOffset,
}

impl Normalizer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Offset given in whole hours east of UTC. `None` when out of range.
    pub fn with_utc_offset_hours(hours: i32) -> Option<Self> {
        FixedOffset::east_opt(hours * 3600).map(Self::new)
    }

    /// Local timestamp for an epoch, or `None` if it is absent, zero, or out of range.
    pub fn local_timestamp(&self, epoch: Option<i64>) -> Option<Timestamp> {
        let secs = epoch.filter(|&s| s > 0)?;
        let utc = DateTime::from_timestamp(secs, 0)?;
        Some(Timestamp::from_datetime(
            utc.with_timezone(&self.offset).naive_local(),
        ))
    }

    /// Records for one quote. `fetched_at` stands in when the quote carries no usable epoch.
    pub fn quote_records(
        &self,
        company: Company,
        quote: &RawQuote,
        fetched_at: NaiveDateTime,
    ) -> Vec<PriceRecord> {
        let timestamp = self
            .local_timestamp(quote.datetime)
            .unwrap_or_else(|| Timestamp::from_datetime(fetched_at));

        company
            .field_map()
            .iter()
            .filter_map(|m| {
                let buy = quote.field(m.buy_field).filter(|&p| is_quoted(Some(p)));
                let sell = quote.field(m.sell_field).filter(|&p| is_quoted(Some(p)));
                if buy.is_none() && sell.is_none() {
                    return None;
                }
                Some(PriceRecord::new(
                    timestamp.clone(),
                    company.code(),
                    m.instrument,
                    m.location,
                    buy,
                    sell,
                ))
            })
            .collect()
    }

    /// Records for a whole batch, preserving quote order.
    pub fn batch_records(
        &self,
        company: Company,
        quotes: &[RawQuote],
        fetched_at: NaiveDateTime,
    ) -> Vec<PriceRecord> {
        quotes
            .iter()
            .flat_map(|q| self.quote_records(company, q, fetched_at))
            .collect()
    }
}

impl Default for Normalizer {
    /// Vietnam time (UTC+7), where every known company quotes.
    fn default() -> Self {
        Self::with_utc_offset_hours(7).expect("UTC+7 is a valid offset")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fetched_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn epoch_is_rendered_in_local_time() {
        let n = Normalizer::default();
        // 2024-05-01 03:00:00 UTC
        let ts = n.local_timestamp(Some(1_714_532_400)).unwrap();
        assert_eq!(ts.as_str(), "2024-05-01 10:00:00");
        assert!(n.local_timestamp(Some(0)).is_none());
        assert!(n.local_timestamp(None).is_none());
    }

    #[test]
    fn sjc_quote_emits_one_record_per_quoted_pair() {
        let quote = RawQuote {
            datetime: Some(1_714_532_400),
            ..Default::default()
        }
        .with_field("buy_1l", 84_500_000.0)
        .with_field("sell_1l", 86_500_000.0)
        .with_field("buy_nhan1c", 73_000_000.0)
        .with_field("buy_nutrang_75", 0.0);

        let records = Normalizer::default().quote_records(Company::Sjc, &quote, fetched_at());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].instrument, "SJC 1L");
        assert_eq!(records[0].sell_price, Some(86_500_000.0));
        assert_eq!(records[1].instrument, "SJC Ring 1C");
        assert_eq!(records[1].sell_price, None);
        assert!(records.iter().all(|r| r.company == "SJC"));
    }

    #[test]
    fn doji_quote_maps_locations() {
        let quote = RawQuote::default()
            .with_field("buy_hn", 84_000_000.0)
            .with_field("sell_hn", 86_000_000.0);
        let records = Normalizer::default().quote_records(Company::Doji, &quote, fetched_at());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instrument, "Gold Bar");
        assert_eq!(records[0].location, "Hanoi");
        assert_eq!(records[0].timestamp.as_str(), "2024-07-01 12:00:00");
    }

    #[test]
    fn custom_offset() {
        let utc = Normalizer::with_utc_offset_hours(0).unwrap();
        let ts = utc.local_timestamp(Some(1_714_532_400)).unwrap();
        assert_eq!(ts.as_str(), "2024-05-01 03:00:00");
        assert!(Normalizer::with_utc_offset_hours(30).is_none());
    }
}
