//! Date lookups over the stored history.

use crate::domain::{Company, PriceRecord};
use std::collections::{BTreeMap, BTreeSet};

/// Provider-shaped price fields (`buy_1l`, `sell_hn`, ...).
pub type PriceFields = BTreeMap<String, f64>;

/// Distinct calendar dates present in the store, newest first.
pub fn available_dates(records: &[PriceRecord]) -> Vec<String> {
    let dates: BTreeSet<&str> = records
        .iter()
        .map(PriceRecord::calendar_date)
        .filter(|d| !d.is_empty())
        .collect();
    dates.into_iter().rev().map(str::to_string).collect()
}

/// One company's stored prices for `date`, mapped back to provider field
/// names. Records whose `(instrument, location)` is not in the field table
/// are ignored; absent prices are omitted.
pub fn prices_on(records: &[PriceRecord], company: Company, date: &str) -> PriceFields {
    let mut fields = PriceFields::new();
    let mut day: Vec<&PriceRecord> = records
        .iter()
        .filter(|r| r.is_company(company.code()) && r.calendar_date() == date)
        .collect();
    day.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    for record in day {
        let Some(mapping) = company.mapping_for(&record.instrument, &record.location) else {
            continue;
        };
        if let Some(buy) = record.buy_price {
            fields.insert(mapping.buy_field.to_string(), buy);
        }
        if let Some(sell) = record.sell_price {
            fields.insert(mapping.sell_field.to_string(), sell);
        }
    }
    fields
}
