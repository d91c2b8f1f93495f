//! Resilience helpers for engine hooks.
//!
//! # Data Flow
//! ```text
//! Pipeline calls a listener or async validator:
//!     → timeouts.rs (enforce hook deadline)
//!     → expiry: hook abandoned, pipeline continues
//! ```

pub mod timeouts;
