//! vnappmob gold-price API provider.
//!
//! `GET {base}/api/v2/gold/{slug}` returns `{"results": [...]}`, one flat
//! object per published quote. With `date_from`/`date_to` (epoch seconds) it
//! returns history; without them, the current quote. Handles retries with
//! exponential backoff and the circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, DataSource, DateRange, FetchResult, QuoteProvider, RawQuote};
use crate::domain::Company;
use chrono::{Duration as DateDuration, NaiveDate};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://vapi.vnappmob.com";

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    results: Option<Vec<Map<String, Value>>>,
}

/// Connection settings for [`VnAppMobProvider`].
#[derive(Debug, Clone)]
pub struct VnAppMobSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Offset used to turn requested calendar dates into epoch bounds.
    pub utc_offset_hours: i32,
}

impl Default for VnAppMobSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            utc_offset_hours: 7,
        }
    }
}

pub struct VnAppMobProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    settings: VnAppMobSettings,
    base_delay: Duration,
}

impl VnAppMobProvider {
    pub fn new(
        settings: VnAppMobSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("goldlab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::ClientSetup(e.to_string()))?;

        Ok(Self {
            client,
            circuit_breaker,
            settings,
            base_delay: Duration::from_millis(500),
        })
    }

    fn quote_url(&self, company: Company) -> String {
        format!(
            "{}/api/v2/gold/{}",
            self.settings.base_url.trim_end_matches('/'),
            company.slug()
        )
    }

    /// Epoch bounds for a range. The end bound is midnight after `range.to`
    /// so the final day is included.
    fn epoch_bounds(&self, range: DateRange) -> (i64, i64) {
        let shift = i64::from(self.settings.utc_offset_hours) * 3600;
        let midnight = |d: NaiveDate| {
            d.and_hms_opt(0, 0, 0)
                .map_or(0, |dt| dt.and_utc().timestamp() - shift)
        };
        (midnight(range.from), midnight(range.to + DateDuration::days(1)))
    }

    fn parse_response(company: Company, body: QuoteResponse) -> Result<Vec<RawQuote>, DataError> {
        let results = body.results.ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("no 'results' array for {company}"))
        })?;
        Ok(results.iter().map(RawQuote::from_json).collect())
    }

    fn fetch_with_retry(
        &self,
        company: Company,
        range: Option<DateRange>,
    ) -> Result<Vec<RawQuote>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = self.quote_url(company);
        let mut last_error = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(%company, attempt, ?delay, "retrying quote request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let mut request = self
                .client
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/json");
            if let Some(key) = &self.settings.api_key {
                request = request.bearer_auth(key);
            }
            if let Some(range) = range {
                let (from, to) = self.epoch_bounds(range);
                request = request.query(&[("date_from", from), ("date_to", to)]);
            }

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN {
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(DataError::AuthenticationRequired(
                            "quote API rejected the API key".into(),
                        ));
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} for {company}")));
                        continue;
                    }

                    let body: QuoteResponse = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse response for {company}: {e}"
                        ))
                    })?;

                    let quotes = Self::parse_response(company, body)?;
                    self.circuit_breaker.record_success();
                    tracing::debug!(%company, count = quotes.len(), "quotes received");
                    return Ok(quotes);
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

impl QuoteProvider for VnAppMobProvider {
    fn name(&self) -> &str {
        "vnappmob"
    }

    fn fetch(&self, company: Company, range: DateRange) -> Result<FetchResult, DataError> {
        tracing::info!(%company, from = %range.from, to = %range.to, "fetching quote history");
        let quotes = self.fetch_with_retry(company, Some(range))?;
        Ok(FetchResult {
            company,
            quotes,
            source: DataSource::VnAppMob,
        })
    }

    fn fetch_current(&self, company: Company) -> Result<FetchResult, DataError> {
        let quotes = self.fetch_with_retry(company, None)?;
        Ok(FetchResult {
            company,
            quotes,
            source: DataSource::VnAppMob,
        })
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
