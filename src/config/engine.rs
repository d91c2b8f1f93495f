//! The configuration engine: public entry point for reads and mutations.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::backup::{Backup, BackupHistory};
use crate::config::cache::{CacheStats, PathCache};
use crate::config::events::{ChangeSource, ConfigEvent, EventBus};
use crate::config::export::{self, ExportFormat};
use crate::config::loader::{self, ConfigFile, EnvOverlay, Loader, Override};
use crate::config::pipeline::{
    CommitReport, PipelineState, RunPlan, TreeValidator, UpdateOptions,
};
use crate::config::store::ConfigStore;
use crate::config::tree;
use crate::config::watcher::{ConfigWatcher, WatchHandle};
use crate::error::{EngineError, EngineResult};
use crate::schema::{apply_defaults, validate, SchemaNode, ValidationError};
use crate::settings::EngineSettings;

pub(crate) struct EngineInner {
    pub(crate) settings: EngineSettings,
    pub(crate) schema: SchemaNode,
    pub(crate) loader: Loader,
    pub(crate) store: ConfigStore,
    pub(crate) cache: PathCache,
    pub(crate) backups: BackupHistory,
    pub(crate) events: EventBus,
    pub(crate) validators: RwLock<Vec<TreeValidator>>,
    /// Environment values merged by the last successful load.
    pub(crate) overrides: RwLock<Vec<Override>>,
    pub(crate) lock: tokio::sync::Mutex<()>,
    pub(crate) state: AtomicU8,
    watcher: Mutex<Option<WatchHandle>>,
}

impl EngineInner {
    /// `tree` as it belongs on disk: environment overrides give way to the
    /// file values they shadowed.
    pub(crate) fn file_view(&self, tree: &Value) -> Value {
        let overrides = self.overrides.read().unwrap_or_else(PoisonError::into_inner);
        loader::without_overrides(tree, &overrides)
    }
}

/// Handle to a live configuration tree.
///
/// Cheap to clone; every clone shares the same store, history and watcher.
#[derive(Clone)]
pub struct ConfigEngine {
    inner: Arc<EngineInner>,
}

impl ConfigEngine {
    /// Load the backing file, merge the environment overlay and defaults,
    /// and validate the result.
    ///
    /// In strict mode an invalid initial tree is an error; in permissive
    /// mode it is accepted and its violations are kept for
    /// [`validation_errors`](Self::validation_errors).
    pub fn new(settings: EngineSettings, schema: SchemaNode) -> EngineResult<Self> {
        settings
            .validate()
            .map_err(|errors| EngineError::Settings(errors.join(", ")))?;

        let loader = Loader::new(
            ConfigFile::new(settings.file_path.clone()),
            settings.env_prefix.as_deref().map(EnvOverlay::new),
            settings.create_if_missing,
            settings.max_depth,
        );

        let loaded = loader.load(&schema)?;
        let tree = apply_defaults(&loaded.tree, &schema);
        let violations = validate(&tree, &schema);
        if !violations.is_empty() {
            if settings.strict {
                return Err(EngineError::Validation(violations));
            }
            tracing::warn!(errors = violations.len(), "Initial configuration has violations (permissive mode)");
        }

        tracing::info!(
            path = %settings.file_path.display(),
            strict = settings.strict,
            max_backups = settings.max_backups,
            "Configuration loaded"
        );

        let inner = EngineInner {
            store: ConfigStore::new(tree, violations),
            cache: PathCache::new(settings.cache_ttl()),
            backups: BackupHistory::new(settings.max_backups),
            events: EventBus::new(settings.event_capacity, settings.hook_timeout()),
            validators: RwLock::new(Vec::new()),
            overrides: RwLock::new(loaded.overrides),
            lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(PipelineState::Idle as u8),
            watcher: Mutex::new(None),
            loader,
            schema,
            settings,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// [`new`](Self::new), then start the watcher if the settings enable it.
    pub async fn open(settings: EngineSettings, schema: SchemaNode) -> EngineResult<Self> {
        let engine = Self::new(settings, schema)?;
        if engine.inner.settings.watch.enabled {
            engine.start_watcher()?;
        }
        Ok(engine)
    }

    pub(crate) fn from_inner(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.inner.schema
    }

    // --- Reads ---

    /// Value at `path` through the cache. `None` if any segment is missing.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.inner.cache.get(path, &self.inner.store)
    }

    pub fn get_or(&self, path: &str, fallback: Value) -> Value {
        self.get(path).unwrap_or(fallback)
    }

    /// Deserialize the value at `path` into a typed target.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get(path).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Whether `path` exists, even if it holds a falsy value.
    pub fn has(&self, path: &str) -> bool {
        self.inner.store.has(path)
    }

    /// Immutable snapshot of the whole tree.
    pub fn get_all(&self) -> Arc<Value> {
        self.inner.store.get_all()
    }

    /// Generation of the committed tree; increments on every commit.
    pub fn generation(&self) -> u64 {
        self.inner.store.snapshot().generation
    }

    /// Violations carried by the committed tree (always empty in strict mode).
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.inner.store.snapshot().violations.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.store.snapshot().violations.is_empty()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn pipeline_state(&self) -> PipelineState {
        PipelineState::from(self.inner.state.load(Ordering::Acquire))
    }

    /// Backups, most recent first.
    pub fn backups(&self) -> Vec<Backup> {
        self.inner.backups.list()
    }

    /// Render the committed tree for external tooling.
    pub fn export(&self, format: ExportFormat) -> EngineResult<String> {
        export::export(
            &self.get_all(),
            format,
            self.inner.loader.overlay().map(EnvOverlay::prefix),
        )
    }

    // --- Mutations ---

    /// Set `path` to `value` and commit the result.
    pub async fn update_config(
        &self,
        path: &str,
        value: Value,
        opts: UpdateOptions,
    ) -> EngineResult<CommitReport> {
        let plan = RunPlan::new(ChangeSource::Update, opts);
        self.inner
            .run_pipeline(plan, move |current| {
                let mut next = current.clone();
                tree::set_path(&mut next, path, value)?;
                Ok(next)
            })
            .await
    }

    /// Apply several path/value pairs as one commit: all or nothing.
    pub async fn update_multiple<I, S>(&self, updates: I, opts: UpdateOptions) -> EngineResult<CommitReport>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let updates: Vec<(S, Value)> = updates.into_iter().collect();
        let plan = RunPlan::new(ChangeSource::Batch, opts);
        self.inner
            .run_pipeline(plan, move |current| {
                let mut next = current.clone();
                for (path, value) in updates {
                    tree::set_path(&mut next, path.as_ref(), value)?;
                }
                Ok(next)
            })
            .await
    }

    /// Remove the key at `path`. Removing an absent key is a no-op commit.
    pub async fn remove_config(&self, path: &str, opts: UpdateOptions) -> EngineResult<CommitReport> {
        let plan = RunPlan::new(ChangeSource::Remove, opts);
        self.inner
            .run_pipeline(plan, move |current| {
                let mut next = current.clone();
                tree::remove_path(&mut next, path)?;
                Ok(next)
            })
            .await
    }

    /// Re-read the backing file and environment and commit the result.
    ///
    /// Never writes the file back, and a missing file is not recreated.
    /// Read, parse and validation failures keep the current tree and emit
    /// `reload_failed`.
    pub async fn reload(&self) -> EngineResult<CommitReport> {
        let inner = &self.inner;
        let plan = RunPlan {
            persist: false,
            ..RunPlan::new(ChangeSource::Reload, UpdateOptions::default())
        };
        let mut overrides = None;
        let result = inner
            .run_pipeline(plan, |_| {
                let loaded = inner.loader.reload()?;
                overrides = Some(loaded.overrides);
                Ok(loaded.tree)
            })
            .await;

        if let (Ok(_), Some(overrides)) = (&result, overrides) {
            *inner
                .overrides
                .write()
                .unwrap_or_else(PoisonError::into_inner) = overrides;
        }

        match &result {
            Ok(report) if report.committed => {
                crate::observability::metrics::record_reload("committed");
            }
            Ok(_) => crate::observability::metrics::record_reload("unchanged"),
            Err(EngineError::Busy) => crate::observability::metrics::record_reload("busy"),
            Err(e) => {
                crate::observability::metrics::record_reload("failed");
                tracing::error!(error = %e, "Reload failed, keeping current configuration");
                inner
                    .events
                    .emit(ConfigEvent::ReloadFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    /// Re-apply backup `index` (0 = most recent).
    ///
    /// The backup is validated strictly against the current schema; an
    /// invalid backup is refused and the current tree is kept.
    pub async fn restore(&self, index: usize) -> EngineResult<CommitReport> {
        let backup = self
            .inner
            .backups
            .get(index)
            .ok_or_else(|| EngineError::NotFound {
                index,
                available: self.inner.backups.len(),
            })?;

        let plan = RunPlan {
            force_strict: true,
            restored_from: Some(index),
            ..RunPlan::new(ChangeSource::Restore, UpdateOptions::default())
        };
        let result = self
            .inner
            .run_pipeline(plan, move |_| Ok((*backup.tree).clone()))
            .await;
        if let Err(e) = &result {
            tracing::warn!(index, error = %e, "Restore refused");
        }
        result
    }

    // --- Hooks ---

    /// Register an async listener for events named `name`, or `"*"` for all.
    ///
    /// Listeners run inside the pipeline, one at a time, each bounded by
    /// `hook_timeout_ms`. Mutating the engine from a listener returns `Busy`.
    pub fn on<F, Fut>(&self, name: &str, listener: F)
    where
        F: Fn(ConfigEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .events
            .on(name, Arc::new(move |event| listener(event).boxed()));
    }

    /// Receive every event over a broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.inner.events.subscribe()
    }

    /// Add an asynchronous whole-tree validator run on every candidate.
    pub fn add_validator<F, Fut>(&self, validator: F)
    where
        F: Fn(Arc<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<ValidationError>> + Send + 'static,
    {
        let validator: TreeValidator = Arc::new(move |tree| validator(tree).boxed());
        self.inner
            .validators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(validator);
    }

    // --- Watcher ---

    /// Start watching the backing file. No-op if already watching.
    pub fn start_watcher(&self) -> EngineResult<()> {
        let mut slot = self.inner.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let handle = ConfigWatcher::new(
            Arc::downgrade(&self.inner),
            self.inner.loader.file().path(),
            self.inner.settings.watch.clone(),
        )
        .run()?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the watcher and wait for an in-flight reload to finish. Idempotent.
    pub async fn stop_watcher(&self) {
        let handle = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Release background resources.
    pub async fn shutdown(&self) {
        self.stop_watcher().await;
        tracing::info!("Configuration engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn schema() -> SchemaNode {
        SchemaNode::object().property(
            "cloudflare",
            SchemaNode::object().property("ttl", SchemaNode::integer().min(30.0).default_value(60)),
        )
    }

    #[test]
    fn test_new_applies_defaults_and_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let engine = ConfigEngine::new(EngineSettings::for_file(&path), schema()).unwrap();

        assert_eq!(engine.get("cloudflare.ttl"), Some(json!(60)));
        assert!(path.exists());
        assert!(engine.is_valid());
        assert_eq!(engine.pipeline_state(), PipelineState::Idle);
    }

    #[test]
    fn test_new_rejects_invalid_file_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "cloudflare": { "ttl": 5 } }"#).unwrap();

        let err = ConfigEngine::new(EngineSettings::for_file(&path), schema()).err().unwrap();
        assert_eq!(err.violations()[0].message, "below minimum (30)");

        let permissive = EngineSettings {
            strict: false,
            ..EngineSettings::for_file(&path)
        };
        let engine = ConfigEngine::new(permissive, schema()).unwrap();
        assert!(!engine.is_valid());
        assert_eq!(engine.validation_errors().len(), 1);
    }

    #[test]
    fn test_env_overlay_applies_at_startup() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("CFGENG_UNIT_CLOUDFLARE_TTL", "90");
        let settings = EngineSettings {
            env_prefix: Some("CFGENG_UNIT".into()),
            ..EngineSettings::for_file(dir.path().join("config.json"))
        };
        let engine = ConfigEngine::new(settings, schema()).unwrap();
        assert_eq!(engine.get_as::<u32>("cloudflare.ttl"), Some(90));
        assert!(engine.export(ExportFormat::Env).unwrap().contains("CFGENG_UNIT_CLOUDFLARE_TTL=90"));
    }
}
