//! Request-scoped call tracing and route metrics.

pub mod context;
pub mod metrics;

pub use context::{CallLog, ExtCallRecord, InstrumentedHttpClient, RequestContext};
pub use metrics::{MetricsRegistry, MetricsReport, MetricsSnapshot};
