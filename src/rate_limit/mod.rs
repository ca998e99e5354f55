//! Upload Rate Limiting Module
//!
//! Admin-tunable policy plus per-client enforcement for file uploads.
//!
//! # Features
//!
//! - Fixed-window per-minute and per-hour upload limits per client
//! - Cooldown lockout armed on breach
//! - Blocked extensions and maximum file size
//! - Password-gated policy reads and writes
//! - Atomic JSON persistence of the policy
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ConfigService                          │
//! │      AdminAuthGate ──► PolicyStore (memory / JSON file)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     RateLimitEnforcer                        │
//! │   PolicyStore::get ──► UploadCounter (per-client windows)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod counter;
pub mod enforcer;
pub mod policy;
pub mod service;
pub mod store;

#[cfg(test)]
mod proptests;

pub use auth::AdminAuthGate;
pub use counter::{ClientUploadState, CountsSnapshot, UploadCounter};
pub use enforcer::{Decision, DenyReason, RateLimitEnforcer, UploadAttempt};
pub use policy::{extension_of, normalize_extensions, Policy, PolicyDocument, PolicyError};
pub use service::{ConfigError, ConfigService};
pub use store::{JsonPolicyStore, PolicyStore, StoreError};
