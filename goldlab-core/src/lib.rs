//! GoldLab Core: price records, the reconciling store, gap healing, analytics.
//!
//! This crate contains the data engine:
//! - Domain types (timestamps, price records, companies and their field tables)
//! - Quote providers (HTTP, synthetic) and raw-quote normalization
//! - CSV record store with atomic rewrite, backup, and metadata sidecar
//! - Reconciler enforcing one record per `(date, company, instrument, location)`
//! - Gap healer choosing what to re-fetch from the store's freshness
//! - Analytics: trend series, change, volatility, extremes, moving averages

pub mod analytics;
pub mod data;
pub mod domain;
pub mod heal;
pub mod reconcile;
pub mod store;

pub use heal::{heal_with, healing_window, HealConfig, HealReport, HealStatus, Healer};
pub use reconcile::{MergeOutcome, MergePolicy, MergeResult, Reconciler, RetentionPolicy};
pub use store::{CsvRecordStore, MemoryStore, RecordStore, StoreError, StoreMeta};
