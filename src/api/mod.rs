//! API layer - HTTP endpoint handlers for dashboard observers.

mod health;
mod metrics;
mod routes;
mod stats;
mod stream;

pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use stats::{stats, StatsResponse};
pub use stream::stats_stream;
