pub mod api;
pub mod config;
pub mod error;
pub mod schema;
pub mod smtp;
pub mod telemetry;
