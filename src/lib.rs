//! Tracegap - APM coverage tracker
//!
//! Syncs the service catalog and instrumentation telemetry from an
//! observability platform, reconciles per-service coverage state in SQLite,
//! and flags traces likely to be broken by missing instrumentation.

pub mod bootstrap;
pub mod config;
pub mod gateway;
pub mod query;
pub mod store;
pub mod sync;
