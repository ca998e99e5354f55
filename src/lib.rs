//! Upload Guard Library
//!
//! Admin-gated rate limiting for file uploads: a persisted upload policy,
//! per-client counters with cooldowns, a password gate for policy changes,
//! and the HTTP surface that exposes them.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod server;
