//! Analytics over the record store: trend series and the metrics built on them.
//!
//! The free functions are pure over a record slice. [`Analyzer`] binds them to
//! a store and re-reads it on every query, so a long-running process always
//! sees the latest reconciled data.

pub mod lookup;
pub mod metrics;
pub mod trend;

pub use lookup::{available_dates, prices_on, PriceFields};
pub use metrics::{
    compare_companies, extremes, moving_average, price_change, volatility, CompanySnapshot,
    Extremes, MovingAverage, PriceChange, SideExtremes, Volatility,
};
pub use trend::{
    cutoff_date, resolve_location, trend, Period, TrendQuery, TrendSeries, UnknownPeriod,
};

use crate::domain::Company;
use crate::store::{RecordStore, StoreError};
use chrono::NaiveDate;

pub struct Analyzer<S> {
    store: S,
}

impl<S: RecordStore> Analyzer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn trend(&self, query: &TrendQuery, today: NaiveDate) -> Result<TrendSeries, StoreError> {
        Ok(trend(&self.store.load()?, query, today))
    }

    pub fn price_change(
        &self,
        query: &TrendQuery,
        today: NaiveDate,
    ) -> Result<PriceChange, StoreError> {
        Ok(price_change(&self.trend(query, today)?))
    }

    pub fn volatility(
        &self,
        query: &TrendQuery,
        today: NaiveDate,
    ) -> Result<Volatility, StoreError> {
        Ok(volatility(&self.trend(query, today)?))
    }

    pub fn extremes(&self, query: &TrendQuery, today: NaiveDate) -> Result<Extremes, StoreError> {
        Ok(extremes(&self.trend(query, today)?))
    }

    pub fn moving_average(
        &self,
        query: &TrendQuery,
        window: usize,
        today: NaiveDate,
    ) -> Result<MovingAverage, StoreError> {
        Ok(moving_average(&self.trend(query, today)?, window))
    }

    pub fn compare_companies(
        &self,
        days_back: Option<i64>,
        today: NaiveDate,
    ) -> Result<Vec<CompanySnapshot>, StoreError> {
        Ok(compare_companies(&self.store.load()?, days_back, today))
    }

    pub fn available_dates(&self) -> Result<Vec<String>, StoreError> {
        Ok(available_dates(&self.store.load()?))
    }

    pub fn prices_on(&self, company: Company, date: &str) -> Result<PriceFields, StoreError> {
        Ok(prices_on(&self.store.load()?, company, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceRecord;
    use crate::store::MemoryStore;

    #[test]
    fn analyzer_sees_writes_between_queries() {
        let analyzer = Analyzer::new(MemoryStore::default());
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let query = TrendQuery::new("SJC").days_back(30);
        assert!(analyzer.trend(&query, today).unwrap().is_empty());

        analyzer
            .store()
            .rewrite(&[
                PriceRecord::new(
                    "2024-05-01 09:00:00",
                    "SJC",
                    "SJC 1L",
                    "National",
                    Some(100.0),
                    Some(102.0),
                ),
                PriceRecord::new(
                    "2024-05-02 09:00:00",
                    "SJC",
                    "SJC 1L",
                    "National",
                    Some(110.0),
                    Some(112.0),
                ),
            ])
            .unwrap();
        let change = analyzer.price_change(&query, today).unwrap();
        assert_eq!(change.buy_change, 10.0);
        assert_eq!(analyzer.available_dates().unwrap().len(), 2);
    }
}
