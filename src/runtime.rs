//! Runtime scaffolding shared by the harvester: configuration, retry
//! and backoff policy, telemetry counters, fatal error capture, and
//! the signal-driven runner.

pub mod backoff;
pub mod config;
pub mod fatal;
pub mod runner;
pub mod telemetry;
