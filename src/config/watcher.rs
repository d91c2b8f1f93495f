//! Backing file watcher for hot reload.
//!
//! # Data Flow
//! ```text
//! notify callback (watcher thread)
//!     → unbounded channel of raw events
//!     → debounce task (tokio): filter to our file name, arm a deadline
//!     → deadline reached: engine.reload()
//!         → Busy: re-arm for another window
//! ```
//!
//! # Design Decisions
//! - Watches the parent directory so delete-and-recreate saves are seen
//! - Holds only a `Weak` reference; a dropped engine ends the task
//! - Our own saves produce events too; reloading an identical tree is a no-op

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Weak;

use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::engine::{ConfigEngine, EngineInner};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle::Shutdown;
use crate::settings::{WatchMode, WatchSettings};

/// Running watcher. Dropping it stops event delivery; [`stop`](Self::stop)
/// also waits for an in-flight reload.
pub struct WatchHandle {
    shutdown: Shutdown,
    task: JoinHandle<()>,
    watcher: Box<dyn Watcher + Send>,
}

impl WatchHandle {
    pub async fn stop(self) {
        self.shutdown.trigger();
        drop(self.watcher);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Watcher task ended abnormally");
        }
        tracing::info!("Config watcher stopped");
    }
}

pub(crate) struct ConfigWatcher {
    engine: Weak<EngineInner>,
    path: PathBuf,
    settings: WatchSettings,
}

impl ConfigWatcher {
    pub(crate) fn new(engine: Weak<EngineInner>, path: &Path, settings: WatchSettings) -> Self {
        Self {
            engine,
            path: path.to_path_buf(),
            settings,
        }
    }

    /// Register with the OS (or poller) and spawn the debounce task.
    pub(crate) fn run(self) -> EngineResult<WatchHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EngineError::Settings("file watcher needs a running tokio runtime".into()))?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| EngineError::Settings(format!("{} has no file name", self.path.display())))?;
        let watch_dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let handler = move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let _ = raw_tx.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "Watch error"),
        };

        let mut watcher: Box<dyn Watcher + Send> = match self.settings.mode {
            WatchMode::Native => Box::new(RecommendedWatcher::new(handler, notify::Config::default())?),
            WatchMode::Poll => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(self.settings.poll_interval()),
            )?),
        };
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        let shutdown = Shutdown::new();
        let task = runtime.spawn(debounce_loop(
            self.engine,
            raw_rx,
            shutdown.subscribe(),
            file_name,
            self.settings.clone(),
        ));

        tracing::info!(
            path = %self.path.display(),
            mode = ?self.settings.mode,
            debounce_ms = self.settings.debounce_ms,
            "Config watcher started"
        );
        Ok(WatchHandle {
            shutdown,
            task,
            watcher,
        })
    }
}

async fn debounce_loop(
    engine: Weak<EngineInner>,
    mut raw_rx: mpsc::UnboundedReceiver<Event>,
    mut shutdown_rx: broadcast::Receiver<()>,
    file_name: OsString,
    settings: WatchSettings,
) {
    let debounce = settings.debounce();
    let mut deadline: Option<Instant> = None;

    loop {
        let pending = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = raw_rx.recv() => match event {
                Some(event) => {
                    if is_config_event(&event, &file_name) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                None => break,
            },
            _ = pending => {
                deadline = None;
                let Some(inner) = engine.upgrade() else { break };
                tracing::info!("Config file change detected, reloading");
                if let Err(EngineError::Busy) = ConfigEngine::from_inner(inner).reload().await {
                    tracing::debug!("Pipeline busy, retrying reload after debounce");
                    deadline = Some(Instant::now() + debounce);
                }
            }
        }
    }
}

/// Whether `event` touches the watched file.
fn is_config_event(event: &Event, file_name: &OsString) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );

    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|name| name == file_name).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_filters_by_file_name_and_kind() {
        let name = OsString::from("config.json");

        assert!(is_config_event(
            &event(EventKind::Modify(ModifyKind::Any), "/etc/app/config.json"),
            &name
        ));
        assert!(is_config_event(
            &event(EventKind::Create(CreateKind::File), "/etc/app/config.json"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Modify(ModifyKind::Any), "/etc/app/other.json"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Access(AccessKind::Any), "/etc/app/config.json"),
            &name
        ));
    }
}
