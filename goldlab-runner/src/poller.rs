//! Polling loop: current quotes → change detection → reconcile → broadcast.
//!
//! Each cycle fetches the current quotes for every tracked company. A cycle
//! whose tracked fields match the previous observation is a no-op; otherwise
//! the normalized records are reconciled into the store and a
//! [`PriceUpdate`] goes out to every registered [`UpdateSink`].

use crate::config::GoldlabConfig;
use chrono::{Local, NaiveDateTime};
use goldlab_core::analytics::PriceFields;
use goldlab_core::data::{Normalizer, QuoteProvider};
use goldlab_core::domain::Company;
use goldlab_core::{
    HealConfig, HealReport, Healer, MergeOutcome, Reconciler, RecordStore, StoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Latest raw fields per company slug.
pub type PriceSnapshot = BTreeMap<String, PriceFields>;

pub const UPDATE_KIND: &str = "price_update";
pub const UPDATE_MESSAGE: &str = "New gold prices available";

/// Granularity of the cancellable sleep between cycles.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PollError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize update: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("sink closed: {0}")]
    SinkClosed(String),
}

// ── Change detection ─────────────────────────────────────────────────

/// Remembers the last broadcast snapshot and compares only the tracked fields.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    last: Option<PriceSnapshot>,
    tracked_fields: Vec<String>,
}

impl ChangeDetector {
    pub fn new(tracked_fields: Vec<String>) -> Self {
        Self {
            last: None,
            tracked_fields,
        }
    }

    pub fn last(&self) -> Option<&PriceSnapshot> {
        self.last.as_ref()
    }

    pub fn tracked_fields(&self) -> &[String] {
        &self.tracked_fields
    }

    /// True when nothing has been committed yet or a tracked field differs
    /// from the last commit. Does not advance state.
    pub fn is_change(&self, snapshot: &PriceSnapshot) -> bool {
        match &self.last {
            None => true,
            Some(last) => self.differs(last, snapshot),
        }
    }

    /// Record `snapshot` as the baseline for later comparisons.
    pub fn commit(&mut self, snapshot: PriceSnapshot) {
        self.last = Some(snapshot);
    }

    /// `is_change` followed by `commit` on a change.
    pub fn observe(&mut self, snapshot: &PriceSnapshot) -> bool {
        let changed = self.is_change(snapshot);
        if changed {
            self.commit(snapshot.clone());
        }
        changed
    }

    fn differs(&self, last: &PriceSnapshot, current: &PriceSnapshot) -> bool {
        let companies: BTreeSet<&String> = last.keys().chain(current.keys()).collect();
        companies.into_iter().any(|company| {
            self.tracked_fields.iter().any(|field| {
                let before = last.get(company).and_then(|f| f.get(field));
                let after = current.get(company).and_then(|f| f.get(field));
                before != after
            })
        })
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ── Updates and sinks ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub prices: PriceSnapshot,
    pub message: String,
}

impl PriceUpdate {
    pub fn new(now: NaiveDateTime, prices: PriceSnapshot) -> Self {
        Self {
            kind: UPDATE_KIND.into(),
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            prices,
            message: UPDATE_MESSAGE.into(),
        }
    }
}

/// A subscriber to price updates. A failed publish removes the sink.
pub trait UpdateSink: Send {
    fn name(&self) -> &str;

    fn publish(&mut self, update: &PriceUpdate) -> Result<(), PollError>;
}

/// Writes each update to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl UpdateSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn publish(&mut self, update: &PriceUpdate) -> Result<(), PollError> {
        let companies: Vec<&str> = update.prices.keys().map(String::as_str).collect();
        tracing::info!(timestamp = %update.timestamp, ?companies, "{}", update.message);
        Ok(())
    }
}

/// One JSON object per line, flushed after every update.
pub struct JsonLinesSink<W: Write + Send> {
    name: String,
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> UpdateSink for JsonLinesSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, update: &PriceUpdate) -> Result<(), PollError> {
        serde_json::to_writer(&mut self.writer, update)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct Broadcaster {
    sinks: Vec<Box<dyn UpdateSink>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Box<dyn UpdateSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Publish to every sink, dropping those that fail. Returns the number
    /// of successful deliveries.
    pub fn broadcast(&mut self, update: &PriceUpdate) -> usize {
        let before = self.sinks.len();
        self.sinks.retain_mut(|sink| match sink.publish(update) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(sink = sink.name(), error = %e, "dropping update sink");
                false
            }
        });
        if self.sinks.len() < before {
            tracing::debug!(remaining = self.sinks.len(), "sinks after broadcast");
        }
        self.sinks.len()
    }
}

// ── Poller ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Every current fetch failed or returned nothing.
    NoData,
    Unchanged,
    Changed {
        merge: MergeOutcome,
        delivered: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollSummary {
    pub cycles: usize,
    pub changes: usize,
    /// Cycles that ended in an error, counted within `cycles`.
    pub failures: usize,
    pub heal: Option<HealReport>,
}

pub struct Poller<S: RecordStore> {
    provider: Box<dyn QuoteProvider>,
    store: S,
    normalizer: Normalizer,
    reconciler: Reconciler,
    heal: HealConfig,
    heal_on_start: bool,
    initial_delay: Duration,
    interval: Duration,
    request_delay: Duration,
    detector: ChangeDetector,
    broadcaster: Broadcaster,
}

impl<S: RecordStore> Poller<S> {
    pub fn new(provider: Box<dyn QuoteProvider>, store: S, config: &GoldlabConfig) -> Self {
        Self {
            provider,
            store,
            normalizer: config.normalizer(),
            reconciler: config.reconciler(),
            heal: config.heal.clone(),
            heal_on_start: config.poll.heal_on_start,
            initial_delay: Duration::from_secs(config.poll.initial_delay_secs),
            interval: Duration::from_secs(config.poll.interval_secs),
            request_delay: config.provider.request_delay(),
            detector: ChangeDetector::new(config.poll.tracked_fields.clone()),
            broadcaster: Broadcaster::new(),
        }
    }

    pub fn with_timing(mut self, initial_delay: Duration, interval: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.interval = interval;
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn UpdateSink>) -> Self {
        self.broadcaster.add(sink);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    fn healer(&self) -> Healer<'_> {
        Healer::new(self.provider.as_ref(), self.heal.clone())
            .with_normalizer(self.normalizer)
            .with_reconciler(self.reconciler)
            .with_request_delay(self.request_delay)
    }

    /// Close any gap in the store before polling.
    pub fn heal(&self, now: NaiveDateTime) -> Result<HealReport, PollError> {
        Ok(self.healer().heal(&self.store, now)?)
    }

    /// One polling cycle.
    ///
    /// The provider lists current quotes newest first, so each company's
    /// snapshot comes from its first quote. The detector only advances once
    /// the store has accepted the merge; a failed write leaves the change
    /// pending for the next cycle.
    pub fn poll_once(&mut self, now: NaiveDateTime) -> Result<PollOutcome, PollError> {
        let mut snapshot = PriceSnapshot::new();
        let mut records = Vec::new();
        for &company in &self.heal.companies {
            match self.provider.fetch_current(company) {
                Ok(result) => {
                    if let Some(latest) = result.quotes.first() {
                        snapshot.insert(company.slug().to_string(), latest.fields.clone());
                    }
                    records.extend(self.normalizer.batch_records(company, &result.quotes, now));
                }
                Err(e) => {
                    tracing::warn!(
                        %company,
                        provider = self.provider.name(),
                        error = %e,
                        "current fetch failed"
                    );
                }
            }
        }

        if snapshot.is_empty() {
            tracing::debug!("no current quotes this cycle");
            return Ok(PollOutcome::NoData);
        }
        if !self.detector.is_change(&snapshot) {
            tracing::debug!("tracked prices unchanged");
            return Ok(PollOutcome::Unchanged);
        }

        let merge = self.reconciler.reconcile_into(&self.store, &records)?;
        self.detector.commit(snapshot.clone());
        tracing::info!(
            additions = merge.additions,
            replacements = merge.replacements,
            "new prices detected"
        );
        let delivered = self.broadcaster.broadcast(&PriceUpdate::new(now, snapshot));
        Ok(PollOutcome::Changed { merge, delivered })
    }

    /// Poll until `cancel` is raised or `max_cycles` cycles have run.
    ///
    /// A failed cycle is logged and the loop carries on; only a failed
    /// start-up heal ends the run early.
    pub fn run(
        &mut self,
        cancel: Option<&AtomicBool>,
        max_cycles: Option<usize>,
    ) -> Result<PollSummary, PollError> {
        let mut summary = PollSummary::default();

        if self.heal_on_start {
            let report = self.heal(local_now())?;
            tracing::info!(status = %report.status, "{}", report.message);
            summary.heal = Some(report);
        }

        if !sleep_unless_cancelled(self.initial_delay, cancel) {
            return Ok(summary);
        }

        loop {
            if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                break;
            }
            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }

            match self.poll_once(local_now()) {
                Ok(PollOutcome::Changed { .. }) => summary.changes += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failures += 1;
                    tracing::warn!(error = %e, "poll cycle failed; retrying next interval");
                }
            }
            summary.cycles += 1;

            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                break;
            }
            if !sleep_unless_cancelled(self.interval, cancel) {
                break;
            }
        }

        tracing::info!(
            cycles = summary.cycles,
            changes = summary.changes,
            failures = summary.failures,
            "poller stopped"
        );
        Ok(summary)
    }
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Sleep in short slices. Returns false if cancelled first.
fn sleep_unless_cancelled(duration: Duration, cancel: Option<&AtomicBool>) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}

/// Snapshot of the latest fields for one company, for callers outside the loop.
pub fn snapshot_of(company: Company, fields: PriceFields) -> PriceSnapshot {
    PriceSnapshot::from([(company.slug().to_string(), fields)])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, f64)]) -> PriceFields {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn detector() -> ChangeDetector {
        ChangeDetector::new(vec!["buy_1l".into(), "sell_1l".into()])
    }

    #[test]
    fn first_observation_is_a_change() {
        let mut d = detector();
        let snap = snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0)]));
        assert!(d.observe(&snap));
        assert!(!d.observe(&snap));
    }

    #[test]
    fn untracked_fields_are_ignored() {
        let mut d = detector();
        d.observe(&snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0), ("buy_nutrang_75", 5.0)])));
        let only_untracked =
            snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0), ("buy_nutrang_75", 6.0)]));
        assert!(!d.observe(&only_untracked));
        // state did not advance on the ignored change
        assert_eq!(d.last().unwrap()["sjc"]["buy_nutrang_75"], 5.0);
    }

    #[test]
    fn is_change_does_not_advance_until_commit() {
        let mut d = detector();
        let snap = snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0)]));
        assert!(d.is_change(&snap));
        assert!(d.is_change(&snap));
        assert!(d.last().is_none());
        d.commit(snap.clone());
        assert!(!d.is_change(&snap));
    }

    #[test]
    fn tracked_field_appearing_or_changing_is_a_change() {
        let mut d = detector();
        d.observe(&snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0)])));
        let appeared = fields(&[("buy_1l", 1.0), ("sell_1l", 2.0)]);
        assert!(d.observe(&snapshot_of(Company::Sjc, appeared)));
        let moved = fields(&[("buy_1l", 1.5), ("sell_1l", 2.0)]);
        assert!(d.observe(&snapshot_of(Company::Sjc, moved)));
    }

    #[test]
    fn update_serializes_with_type_tag() {
        let now =
            NaiveDateTime::parse_from_str("2024-05-02 09:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let update = PriceUpdate::new(now, snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0)])));
        let json: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "price_update");
        assert_eq!(json["timestamp"], "2024-05-02T09:30:00");
        assert_eq!(json["message"], UPDATE_MESSAGE);
        assert_eq!(json["prices"]["sjc"]["buy_1l"], 1.0);
    }

    struct Broken;

    impl UpdateSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn publish(&mut self, _update: &PriceUpdate) -> Result<(), PollError> {
            Err(PollError::SinkClosed("peer went away".into()))
        }
    }

    #[test]
    fn broadcaster_drops_failing_sinks() {
        let mut b = Broadcaster::new();
        b.add(Box::new(LogSink));
        b.add(Box::new(Broken));
        b.add(Box::new(JsonLinesSink::new("buffer", Vec::new())));
        let update = PriceUpdate::new(
            NaiveDateTime::default(),
            snapshot_of(Company::Sjc, fields(&[("buy_1l", 1.0)])),
        );
        assert_eq!(b.broadcast(&update), 2);
        assert_eq!(b.len(), 2);
        assert_eq!(b.broadcast(&update), 2);
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_update() {
        let mut sink = JsonLinesSink::new("buffer", Vec::new());
        let update = PriceUpdate::new(NaiveDateTime::default(), PriceSnapshot::new());
        sink.publish(&update).unwrap();
        sink.publish(&update).unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: PriceUpdate = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, update);
    }

    #[test]
    fn sleep_returns_false_when_already_cancelled() {
        let flag = AtomicBool::new(true);
        assert!(!sleep_unless_cancelled(Duration::from_secs(60), Some(&flag)));
        assert!(sleep_unless_cancelled(Duration::ZERO, None));
    }
}
