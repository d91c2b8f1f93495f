//! Change events emitted after commits and failed reloads.
//!
//! Events reach consumers two ways: a broadcast channel (`subscribe`) and
//! named listeners (`on`) that the pipeline awaits one by one, each under the
//! hook timeout.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::resilience::timeouts::run_bounded;
use crate::schema::ValidationError;

/// How a leaf changed between two commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

/// One changed leaf.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub path: String,
    pub change_type: ChangeType,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl ChangeEvent {
    pub fn new(
        path: impl Into<String>,
        change_type: ChangeType,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            path: path.into(),
            change_type,
            old_value,
            new_value,
        }
    }
}

/// What drove a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Update,
    Batch,
    Remove,
    Reload,
    Restore,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSource::Update => "update",
            ChangeSource::Batch => "batch",
            ChangeSource::Remove => "remove",
            ChangeSource::Reload => "reload",
            ChangeSource::Restore => "restore",
        }
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine announces.
#[derive(Debug, Clone)]
pub enum ConfigEvent {
    /// A single leaf changed.
    Changed(ChangeEvent),
    /// Summary of one commit, emitted after its `Changed` events.
    Batch {
        source: ChangeSource,
        generation: u64,
        changes: Vec<ChangeEvent>,
        timestamp: SystemTime,
    },
    /// A strict-mode candidate was rejected.
    ValidationFailed {
        source: ChangeSource,
        errors: Vec<ValidationError>,
    },
    /// A reload from the backing file was abandoned.
    ReloadFailed { reason: String },
    /// The commit stands in memory but was not written to disk.
    PersistFailed { generation: u64, reason: String },
    /// A backup was re-applied.
    Restored { index: usize, generation: u64 },
}

impl ConfigEvent {
    pub const CHANGE: &'static str = "change";
    pub const BATCH: &'static str = "batch";
    pub const VALIDATION_FAILED: &'static str = "validation_failed";
    pub const RELOAD_FAILED: &'static str = "reload_failed";
    pub const PERSIST_FAILED: &'static str = "persist_failed";
    pub const RESTORED: &'static str = "restored";

    /// Event name used for listener subscription.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigEvent::Changed(_) => Self::CHANGE,
            ConfigEvent::Batch { .. } => Self::BATCH,
            ConfigEvent::ValidationFailed { .. } => Self::VALIDATION_FAILED,
            ConfigEvent::ReloadFailed { .. } => Self::RELOAD_FAILED,
            ConfigEvent::PersistFailed { .. } => Self::PERSIST_FAILED,
            ConfigEvent::Restored { .. } => Self::RESTORED,
        }
    }
}

/// Boxed asynchronous listener callback.
pub type Listener = Arc<dyn Fn(ConfigEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Fan-out point for engine events.
pub struct EventBus {
    tx: broadcast::Sender<ConfigEvent>,
    listeners: RwLock<Vec<(String, Listener)>>,
    hook_timeout: Duration,
}

impl EventBus {
    pub fn new(capacity: usize, hook_timeout: Duration) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            listeners: RwLock::new(Vec::new()),
            hook_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.tx.subscribe()
    }

    /// Register `listener` for events named `name` (`"*"` receives all).
    pub fn on(&self, name: impl Into<String>, listener: Listener) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        listeners.push((name.into(), listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Broadcast `event` and await each matching listener in registration order.
    pub async fn emit(&self, event: ConfigEvent) {
        let _ = self.tx.send(event.clone());

        let matching: Vec<Listener> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            listeners
                .iter()
                .filter(|(name, _)| name == "*" || name == event.name())
                .map(|(_, listener)| listener.clone())
                .collect()
        };

        for listener in matching {
            let call = std::panic::AssertUnwindSafe(listener(event.clone())).catch_unwind();
            match run_bounded(self.hook_timeout, call).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    tracing::error!(event = event.name(), "Listener panicked");
                }
                Err(elapsed) => {
                    tracing::warn!(
                        event = event.name(),
                        timeout_ms = elapsed.as_millis() as u64,
                        "Listener timed out, skipping"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: Arc<AtomicUsize>) -> Listener {
        Arc::new(move |_event: ConfigEvent| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_emit_filters_by_name() {
        let bus = EventBus::new(16, Duration::from_millis(100));
        let changes = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));
        bus.on(ConfigEvent::CHANGE, counting_listener(changes.clone()));
        bus.on("*", counting_listener(all.clone()));

        bus.emit(ConfigEvent::ReloadFailed { reason: "bad".into() }).await;
        bus.emit(ConfigEvent::Changed(ChangeEvent::new(
            "a",
            ChangeType::Added,
            None,
            Some(Value::Bool(true)),
        )))
        .await;

        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_slow_and_panicking_listeners_do_not_stall() {
        let bus = EventBus::new(16, Duration::from_millis(50));
        let after = Arc::new(AtomicUsize::new(0));

        bus.on(
            "*",
            Arc::new(|_: ConfigEvent| {
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                .boxed()
            }),
        );
        bus.on("*", Arc::new(|_: ConfigEvent| async { panic!("listener bug"); }.boxed()));
        bus.on("*", counting_listener(after.clone()));

        let mut rx = bus.subscribe();
        bus.emit(ConfigEvent::ReloadFailed { reason: "x".into() }).await;

        assert_eq!(after.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().name(), ConfigEvent::RELOAD_FAILED);
    }
}
