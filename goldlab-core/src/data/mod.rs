//! Quote acquisition: provider trait, HTTP and synthetic providers,
//! raw-quote normalization.

pub mod circuit_breaker;
pub mod normalize;
pub mod provider;
pub mod synthetic;
pub mod vnappmob;

pub use circuit_breaker::CircuitBreaker;
pub use normalize::Normalizer;
pub use provider::{DataError, DataSource, DateRange, FetchResult, QuoteProvider, RawQuote};
pub use synthetic::SyntheticProvider;
pub use vnappmob::{VnAppMobProvider, VnAppMobSettings, DEFAULT_BASE_URL};
