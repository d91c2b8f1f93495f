//! Process lifecycle for the engine host.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGHUP → engine.reload()
//!     SIGTERM/SIGINT → Shutdown::trigger()
//!
//! Shutdown (shutdown.rs):
//!     trigger → watcher and signal tasks observe it → engine.shutdown()
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
