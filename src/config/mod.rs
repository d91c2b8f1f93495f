//! Configuration engine subsystem.
//!
//! # Data Flow
//! ```text
//! backing file (JSON/TOML) + environment overlay
//!     → loader.rs (parse, overlay, depth check)
//!     → schema defaults + validation
//!     → store.rs (ArcSwap<Snapshot>, shared by all readers)
//!
//! On mutation (update / batch / remove / reload / restore):
//!     pipeline.rs: try_lock → build candidate → defaults → validate
//!     → backup.rs (push previous tree)
//!     → store.rs (atomic swap)
//!     → writer.rs (temp file + rename)
//!     → cache.rs invalidate → events.rs (per-leaf changes, then batch)
//!
//! On file change:
//!     watcher.rs debounces → engine.reload()
//! ```
//!
//! # Design Decisions
//! - Readers never block; they hold whichever snapshot they loaded
//! - One mutation at a time; concurrent callers are rejected, not queued
//! - Every commit is validated as a whole tree

pub mod backup;
pub mod cache;
pub mod engine;
pub mod events;
pub mod export;
pub mod loader;
pub mod pipeline;
pub mod store;
pub mod tree;
pub mod watcher;
pub mod writer;

pub use backup::Backup;
pub use cache::CacheStats;
pub use engine::ConfigEngine;
pub use events::{ChangeEvent, ChangeSource, ChangeType, ConfigEvent};
pub use export::ExportFormat;
pub use pipeline::{CommitReport, PersistStatus, PipelineState, UpdateOptions};
