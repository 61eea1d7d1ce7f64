//! Metrics over trend series.
//!
//! All functions are pure and never fail: inputs too short for a metric
//! produce zero-filled or empty results.

use super::trend::{trend, TrendQuery, TrendSeries};
use crate::domain::{Company, PriceRecord, Timestamp};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub buy_change: f64,
    pub sell_change: f64,
    pub buy_change_percent: f64,
    pub sell_change_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Volatility {
    pub buy_std_dev: f64,
    pub sell_std_dev: f64,
    /// Coefficient of variation, percent.
    pub buy_volatility: f64,
    pub sell_volatility: f64,
}

/// Minimum and maximum of one side, with the date each first occurs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideExtremes {
    pub min: f64,
    pub min_date: Option<Timestamp>,
    pub max: f64,
    pub max_date: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extremes {
    pub buy: SideExtremes,
    pub sell: SideExtremes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovingAverage {
    pub window: usize,
    pub dates: Vec<Timestamp>,
    pub buy_ma: Vec<f64>,
    pub sell_ma: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySnapshot {
    pub company: Company,
    pub timestamp: Timestamp,
    pub latest_buy: f64,
    pub latest_sell: f64,
    pub spread: f64,
}

fn percent_of(change: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        change / base * 100.0
    }
}

pub fn price_change(series: &TrendSeries) -> PriceChange {
    if series.len() < 2 {
        return PriceChange::default();
    }
    let n = series.len() - 1;
    let buy_change = series.buy_prices[n] - series.buy_prices[0];
    let sell_change = series.sell_prices[n] - series.sell_prices[0];
    PriceChange {
        buy_change,
        sell_change,
        buy_change_percent: percent_of(buy_change, series.buy_prices[0]),
        sell_change_percent: percent_of(sell_change, series.sell_prices[0]),
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1 denominator). Zero below two values.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub fn volatility(series: &TrendSeries) -> Volatility {
    if series.len() < 2 {
        return Volatility::default();
    }
    let buy_std_dev = sample_std(&series.buy_prices);
    let sell_std_dev = sample_std(&series.sell_prices);
    Volatility {
        buy_std_dev,
        sell_std_dev,
        buy_volatility: percent_of(buy_std_dev, mean(&series.buy_prices)),
        sell_volatility: percent_of(sell_std_dev, mean(&series.sell_prices)),
    }
}

fn side_extremes(values: &[f64], dates: &[Timestamp]) -> SideExtremes {
    let Some(&first) = values.first() else {
        return SideExtremes::default();
    };
    let (mut min_i, mut max_i) = (0, 0);
    let (mut min, mut max) = (first, first);
    for (i, &v) in values.iter().enumerate().skip(1) {
        // strict comparisons keep the first occurrence
        if v < min {
            min = v;
            min_i = i;
        }
        if v > max {
            max = v;
            max_i = i;
        }
    }
    SideExtremes {
        min,
        min_date: dates.get(min_i).cloned(),
        max,
        max_date: dates.get(max_i).cloned(),
    }
}

pub fn extremes(series: &TrendSeries) -> Extremes {
    Extremes {
        buy: side_extremes(&series.buy_prices, &series.dates),
        sell: side_extremes(&series.sell_prices, &series.dates),
    }
}

/// Rolling mean over `window` points, dated by each window's last point.
pub fn moving_average(series: &TrendSeries, window: usize) -> MovingAverage {
    let mut out = MovingAverage {
        window,
        ..Default::default()
    };
    if window == 0 || series.len() < window {
        return out;
    }
    for (i, buy) in series.buy_prices.windows(window).enumerate() {
        let sell = &series.sell_prices[i..i + window];
        out.dates.push(series.dates[i + window - 1].clone());
        out.buy_ma.push(mean(buy));
        out.sell_ma.push(mean(sell));
    }
    out
}

/// Latest quote and spread for every known company with data in range.
pub fn compare_companies(
    records: &[PriceRecord],
    days_back: Option<i64>,
    today: NaiveDate,
) -> Vec<CompanySnapshot> {
    Company::ALL
        .into_iter()
        .filter_map(|company| {
            let query = TrendQuery {
                company: company.code().to_string(),
                days_back,
                ..Default::default()
            };
            let series = trend(records, &query, today);
            let last = series.len().checked_sub(1)?;
            let (buy, sell) = (series.buy_prices[last], series.sell_prices[last]);
            Some(CompanySnapshot {
                company,
                timestamp: series.dates[last].clone(),
                latest_buy: buy,
                latest_sell: sell,
                spread: sell - buy,
            })
        })
        .collect()
}
