//! OData layer
//!
//! HTTP client, query building and rate limiting for the Exact Online
//! REST API.

pub mod client;
pub mod query;
pub mod rate_limit;

pub use client::ExactClient;
pub use query::QueryOptions;
