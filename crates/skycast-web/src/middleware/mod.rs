//! Request middleware.

pub mod observability;
pub mod rate_limit;

pub use observability::{
    observe_request, REQUEST_ID_HEADER, SERVER_TIMING_HEADER, UNMATCHED_ROUTE,
};
pub use rate_limit::{limit_per_ip, IpRateLimitConfig, IpRateLimiter, RateDecision};
