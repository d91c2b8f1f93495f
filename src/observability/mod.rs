//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline, cache, watcher produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stderr (fmt layer)
//!     → Prometheus scrape (optional exporter)
//! ```

pub mod logging;
pub mod metrics;
