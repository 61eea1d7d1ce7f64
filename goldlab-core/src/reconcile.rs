//! Reconciler: merges fetched batches into the stored history.
//!
//! Invariant: after a merge, at most one record exists per identity key
//! `(calendar_date, company, instrument, location)`.
//!
//! Inside a batch the merge rule is chosen by [`MergePolicy`]. The default,
//! `BatchOrder`, lets a later record in the batch override an earlier one
//! regardless of timestamps. Stored duplicates (from hand-edited files) are
//! collapsed first, keeping the later timestamp.
//!
//! Reported counts are net effects: a key that ends up with the same record
//! it started with is neither an addition nor a replacement. Re-merging a
//! batch that is already stored therefore reports no changes and skips the
//! write.

use crate::domain::{PriceRecord, RecordKey};
use crate::store::{sort_for_storage, RecordStore, StoreError};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How an incoming record competes with the one already under its key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming always wins; later in the batch wins over earlier.
    #[default]
    BatchOrder,
    /// Incoming wins only when its timestamp is at least the stored one.
    NewestTimestamp,
}

/// Which incoming records are worth keeping at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Records dated before January 1st of this year are dropped.
    pub min_year: Option<i32>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_year: Some(2024),
        }
    }
}

impl RetentionPolicy {
    pub fn keep_all() -> Self {
        Self { min_year: None }
    }

    /// A record is retained when it carries a price and is not older than the
    /// floor. Unparsable timestamps count as the earliest possible date.
    pub fn retains(&self, record: &PriceRecord) -> bool {
        if !record.has_price() {
            return false;
        }
        match self.min_year {
            Some(floor) => record.timestamp.date_or_min().year() >= floor,
            None => true,
        }
    }
}

/// Net effect of one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub additions: usize,
    pub replacements: usize,
    /// Incoming records dropped by the retention policy.
    pub skipped: usize,
}

impl MergeOutcome {
    /// The "no changes" signal: nothing to persist or announce.
    pub fn is_unchanged(&self) -> bool {
        self.additions == 0 && self.replacements == 0
    }
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The merged collection in storage order.
    pub records: Vec<PriceRecord>,
    pub outcome: MergeOutcome,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    pub policy: MergePolicy,
    pub retention: RetentionPolicy,
}

impl Reconciler {
    pub fn new(policy: MergePolicy, retention: RetentionPolicy) -> Self {
        Self { policy, retention }
    }

    /// Index stored rows by key. Duplicate keys keep the later timestamp;
    /// on a tie the first row stays.
    fn index(existing: &[PriceRecord]) -> BTreeMap<RecordKey, PriceRecord> {
        let mut map: BTreeMap<RecordKey, PriceRecord> = BTreeMap::new();
        for record in existing {
            let key = record.key();
            match map.get(&key) {
                Some(current) if current.timestamp >= record.timestamp => {}
                _ => {
                    map.insert(key, record.clone());
                }
            }
        }
        map
    }

    fn wins(&self, incoming: &PriceRecord, current: &PriceRecord) -> bool {
        match self.policy {
            MergePolicy::BatchOrder => true,
            MergePolicy::NewestTimestamp => incoming.timestamp >= current.timestamp,
        }
    }

    /// Merge `incoming` into `existing`. Pure: nothing is persisted.
    pub fn merge(&self, existing: &[PriceRecord], incoming: &[PriceRecord]) -> MergeResult {
        let before = Self::index(existing);
        let mut merged = before.clone();
        let mut skipped = 0;

        for record in incoming {
            if !self.retention.retains(record) {
                skipped += 1;
                continue;
            }
            let key = record.key();
            let replace = match merged.get(&key) {
                Some(current) => self.wins(record, current),
                None => true,
            };
            if replace {
                merged.insert(key, record.clone());
            }
        }

        let mut outcome = MergeOutcome {
            skipped,
            ..Default::default()
        };
        for (key, record) in &merged {
            match before.get(key) {
                None => outcome.additions += 1,
                Some(old) if old != record => outcome.replacements += 1,
                Some(_) => {}
            }
        }

        let mut records: Vec<PriceRecord> = merged.into_values().collect();
        sort_for_storage(&mut records);
        MergeResult { records, outcome }
    }

    /// Load, merge, and rewrite the store. The store is only written when the
    /// merge changed something.
    pub fn reconcile_into<S>(
        &self,
        store: &S,
        incoming: &[PriceRecord],
    ) -> Result<MergeOutcome, StoreError>
    where
        S: RecordStore + ?Sized,
    {
        let existing = store.load()?;
        let result = self.merge(&existing, incoming);
        if result.outcome.is_unchanged() {
            tracing::debug!(
                incoming = incoming.len(),
                skipped = result.outcome.skipped,
                "no changes"
            );
            return Ok(result.outcome);
        }
        store.rewrite(&result.records)?;
        tracing::info!(
            additions = result.outcome.additions,
            replacements = result.outcome.replacements,
            skipped = result.outcome.skipped,
            total = result.records.len(),
            "store reconciled"
        );
        Ok(result.outcome)
    }
}
