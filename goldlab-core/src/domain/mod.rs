//! Domain types: timestamps, price records, companies.

pub mod company;
pub mod record;
pub mod timestamp;

pub use company::{Company, FieldMapping, UnknownCompany};
pub use record::{is_quoted, PriceRecord, RecordKey, DEFAULT_LOCATION};
pub use timestamp::{Timestamp, DATE_FORMAT, TIMESTAMP_FORMAT};
