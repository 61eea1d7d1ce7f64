//! Analytics report: one query's trend plus every metric derived from it.

use chrono::NaiveDate;
use goldlab_core::analytics::{
    extremes, moving_average, price_change, trend, volatility as series_volatility, Extremes,
    MovingAverage, PriceChange, TrendQuery, TrendSeries, Volatility,
};
use goldlab_core::domain::{PriceRecord, Timestamp};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MA_WINDOW: usize = 7;

fn day(ts: &Option<Timestamp>) -> &str {
    ts.as_ref().map(Timestamp::date_part).unwrap_or("")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub query: TrendQuery,
    pub as_of: NaiveDate,
    pub series: TrendSeries,
    pub change: PriceChange,
    pub volatility: Volatility,
    pub extremes: Extremes,
    pub moving_average: MovingAverage,
}

impl AnalyticsReport {
    pub fn build(records: &[PriceRecord], query: &TrendQuery, today: NaiveDate) -> Self {
        Self::with_window(records, query, today, DEFAULT_MA_WINDOW)
    }

    pub fn with_window(
        records: &[PriceRecord],
        query: &TrendQuery,
        today: NaiveDate,
        window: usize,
    ) -> Self {
        let series = trend(records, query, today);
        Self {
            query: query.clone(),
            as_of: today,
            change: price_change(&series),
            volatility: series_volatility(&series),
            extremes: extremes(&series),
            moving_average: moving_average(&series, window),
            series,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_markdown(&self) -> String {
        let q = &self.query;
        let mut report = format!(
            "# Gold Price Report: {}\n\n\
- Instrument: {}\n\
- Location: {}\n\
- Window: {}\n\
- As of: {}\n\
- Points: {}\n",
            q.company.to_uppercase(),
            q.instrument.as_deref().unwrap_or("all"),
            self.series.location.as_deref().unwrap_or("n/a"),
            q.days_back
                .map(|d| format!("{d} days"))
                .unwrap_or_else(|| "full history".into()),
            self.as_of,
            self.series.len()
        );

        if self.series.is_empty() {
            report.push_str("\nNo data for this selection.\n");
            return report;
        }

        report.push_str("\n## Summary\n\n");
        report.push_str("| Metric | Buy | Sell |\n");
        report.push_str("|--------|-----|------|\n");
        report.push_str(&format!(
            "| Change | {:+.0} ({:+.2}%) | {:+.0} ({:+.2}%) |\n",
            self.change.buy_change,
            self.change.buy_change_percent,
            self.change.sell_change,
            self.change.sell_change_percent
        ));
        report.push_str(&format!(
            "| Std dev | {:.0} | {:.0} |\n",
            self.volatility.buy_std_dev, self.volatility.sell_std_dev
        ));
        report.push_str(&format!(
            "| Volatility | {:.2}% | {:.2}% |\n",
            self.volatility.buy_volatility, self.volatility.sell_volatility
        ));
        report.push_str(&format!(
            "| Low | {:.0} ({}) | {:.0} ({}) |\n",
            self.extremes.buy.min,
            day(&self.extremes.buy.min_date),
            self.extremes.sell.min,
            day(&self.extremes.sell.min_date)
        ));
        report.push_str(&format!(
            "| High | {:.0} ({}) | {:.0} ({}) |\n",
            self.extremes.buy.max,
            day(&self.extremes.buy.max_date),
            self.extremes.sell.max,
            day(&self.extremes.sell.max_date)
        ));

        let ma = &self.moving_average;
        if !ma.dates.is_empty() {
            report.push_str(&format!("\n## Moving Average ({} days)\n\n", ma.window));
            report.push_str("| Date | Buy MA | Sell MA |\n");
            report.push_str("|------|--------|---------|\n");
            // most recent ten
            let start = ma.dates.len().saturating_sub(10);
            for i in start..ma.dates.len() {
                report.push_str(&format!(
                    "| {} | {:.0} | {:.0} |\n",
                    ma.dates[i].date_part(),
                    ma.buy_ma[i],
                    ma.sell_ma[i]
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<PriceRecord> {
        (1..=10)
            .map(|d| {
                let buy = 80.0 + d as f64;
                PriceRecord::new(
                    format!("2024-03-{d:02} 09:00:00"),
                    "SJC",
                    "SJC 1L",
                    "National",
                    Some(buy),
                    Some(buy + 2.0),
                )
            })
            .collect()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn report_bundles_all_metrics() {
        let query = TrendQuery::new("sjc").instrument("SJC 1L").days_back(30);
        let report = AnalyticsReport::build(&records(), &query, today());
        assert_eq!(report.series.len(), 10);
        assert_eq!(report.change.buy_change, 9.0);
        assert_eq!(report.extremes.buy.max, 90.0);
        assert_eq!(report.moving_average.window, 7);
        assert_eq!(report.moving_average.buy_ma.len(), 4);
    }

    #[test]
    fn json_carries_query_and_series() {
        let query = TrendQuery::new("sjc").instrument("SJC 1L").days_back(30);
        let report = AnalyticsReport::build(&records(), &query, today());
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["query"]["company"], "sjc");
        assert_eq!(json["as_of"], "2024-03-10");
        assert_eq!(json["series"]["dates"][0], "2024-03-01 09:00:00");
        assert_eq!(json["series"]["buy_prices"][9], 90.0);
        assert_eq!(json["moving_average"]["window"], 7);
    }

    #[test]
    fn markdown_has_sections() {
        let query = TrendQuery::new("sjc").instrument("SJC 1L").days_back(30);
        let md = AnalyticsReport::build(&records(), &query, today()).to_markdown();
        assert!(md.starts_with("# Gold Price Report: SJC"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("## Moving Average (7 days)"));
        assert!(md.contains("| 2024-03-10 |"));
    }

    #[test]
    fn empty_selection_says_so() {
        let md = AnalyticsReport::build(&[], &TrendQuery::new("pnj"), today()).to_markdown();
        assert!(md.contains("No data for this selection."));
        assert!(!md.contains("## Summary"));
    }
}
