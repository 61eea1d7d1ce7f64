//! GoldLab Runner: configuration, the price poller, analytics reports.
//!
//! This crate builds on `goldlab-core` to provide:
//! - TOML configuration with environment overrides
//! - A polling loop with explicit change detection and update broadcasting
//! - Analytics reports rendered as JSON or Markdown

pub mod config;
pub mod poller;
pub mod report;

pub use config::{
    ConfigError, GoldlabConfig, PollConfig, ProviderConfig, ReconcileConfig, StoreConfig,
    API_KEY_ENV,
};
pub use poller::{
    snapshot_of, Broadcaster, ChangeDetector, JsonLinesSink, LogSink, PollError, PollOutcome,
    PollSummary, Poller, PriceSnapshot, PriceUpdate, UpdateSink,
};
pub use report::{AnalyticsReport, DEFAULT_MA_WINDOW};

#[cfg(test)]
mod send_sync_checks {
    use super::*;
    use goldlab_core::MemoryStore;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<GoldlabConfig>();
        assert_sync::<GoldlabConfig>();
    }

    #[test]
    fn report_is_send_sync() {
        assert_send::<AnalyticsReport>();
        assert_sync::<AnalyticsReport>();
    }

    #[test]
    fn poller_can_move_to_a_worker_thread() {
        assert_send::<Poller<MemoryStore>>();
        assert_send::<Broadcaster>();
    }
}
