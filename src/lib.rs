// Shared components
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Aggregation engine
pub mod aggregation;
pub mod feed;
pub mod session;
pub mod subscription;

// Application layer
pub mod api;
pub mod server;
