//! Metrics aggregation for dashboard charts.
//!
//! Pure functions over backend payloads with no I/O and no error type.
//! Missing or malformed fields resolve to zero or empty values.

pub mod histogram;
pub mod ranking;
pub mod stats;
pub mod summary;
pub mod timeseries;
pub mod types;

pub use stats::{aggregate, AggregatedStats};
pub use types::{GroupBy, MetricsInputs, TimeRange};
