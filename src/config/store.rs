//! Lock-free configuration storage.
//!
//! Readers load an `Arc<Snapshot>` through `arc-swap` and never contend with
//! the mutation pipeline. A commit builds a complete new snapshot and swaps
//! the pointer, so a reader sees either the old tree or the new one.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::tree;
use crate::schema::ValidationError;

/// One committed state of the configuration.
#[derive(Debug)]
pub struct Snapshot {
    pub tree: Arc<Value>,
    /// Increments on every commit; ties cache entries to the tree they came from.
    pub generation: u64,
    /// Violations the tree carried when committed (permissive mode only).
    pub violations: Vec<ValidationError>,
}

impl Snapshot {
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        tree::lookup(&self.tree, path)
    }
}

pub struct ConfigStore {
    current: ArcSwap<Snapshot>,
}

impl ConfigStore {
    pub fn new(tree: Value, violations: Vec<ValidationError>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                tree: Arc::new(tree),
                generation: 0,
                violations,
            }),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.current.load().lookup(path).cloned()
    }

    /// Value at `path`, or `fallback` when any segment is missing.
    pub fn get_or(&self, path: &str, fallback: Value) -> Value {
        self.get(path).unwrap_or(fallback)
    }

    /// Whether `path` exists, regardless of the value stored there.
    pub fn has(&self, path: &str) -> bool {
        self.current.load().lookup(path).is_some()
    }

    /// Deserialize the value at `path` into `T`. `None` if absent or mistyped.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.current
            .load()
            .lookup(path)
            .and_then(|v| T::deserialize(v).ok())
    }

    pub fn get_all(&self) -> Arc<Value> {
        self.current.load().tree.clone()
    }

    /// Replace the current tree. Only the update pipeline calls this.
    pub(crate) fn commit(&self, tree: Arc<Value>, violations: Vec<ValidationError>) -> Arc<Snapshot> {
        let generation = self.current.load().generation + 1;
        let next = Arc::new(Snapshot {
            tree,
            generation,
            violations,
        });
        self.current.store(next.clone());
        next
    }
}
