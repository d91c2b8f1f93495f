//! Hot reload through the file watcher.

use std::time::Duration;

use config_engine::config::{ChangeSource, ChangeType, ConfigEvent, UpdateOptions};
use config_engine::settings::{WatchMode, WatchSettings};
use config_engine::{ConfigEngine, EngineSettings};
use serde_json::json;

mod common;
use common::{server_schema, wait_for, Workspace};

const SETTLE: Duration = Duration::from_secs(5);

fn watched(ws: &Workspace) -> EngineSettings {
    EngineSettings {
        watch: WatchSettings {
            enabled: true,
            mode: WatchMode::Poll,
            debounce_ms: 50,
            poll_interval_ms: 50,
        },
        ..ws.settings()
    }
}

fn edit(ws: &Workspace, path: &[&str], value: serde_json::Value) {
    let mut tree = ws.read_json();
    let mut node = &mut tree;
    for key in path {
        node = &mut node[*key];
    }
    *node = value;
    std::fs::write(&ws.path, serde_json::to_string_pretty(&tree).unwrap()).unwrap();
}

#[tokio::test]
async fn test_external_edit_is_reloaded() {
    let ws = Workspace::new();
    let engine = ConfigEngine::open(watched(&ws), server_schema()).await.unwrap();
    assert!(engine.is_watching());
    let mut events = engine.subscribe();

    edit(&ws, &["logging", "level"], json!("debug"));

    let change = tokio::time::timeout(SETTLE, async {
        loop {
            if let Ok(ConfigEvent::Changed(change)) = events.recv().await {
                return change;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(change.path, "logging.level");
    assert_eq!(change.change_type, ChangeType::Modified);
    assert_eq!(change.old_value, Some(json!("info")));
    assert_eq!(change.new_value, Some(json!("debug")));
    assert_eq!(engine.get("logging.level"), Some(json!("debug")));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_rapid_edits_coalesce_into_one_reload() {
    let ws = Workspace::new();
    let settings = EngineSettings {
        watch: WatchSettings {
            enabled: true,
            mode: WatchMode::Poll,
            debounce_ms: 300,
            poll_interval_ms: 25,
        },
        ..ws.settings()
    };
    let engine = ConfigEngine::open(settings, server_schema()).await.unwrap();
    let mut events = engine.subscribe();

    for motd in ["one", "two", "three"] {
        edit(&ws, &["minecraft", "motd"], json!(motd));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let generation = tokio::time::timeout(SETTLE, async {
        loop {
            if let Ok(ConfigEvent::Batch {
                source: ChangeSource::Reload,
                generation,
                ..
            }) = events.recv().await
            {
                return generation;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(generation, 1);

    // Nothing else may follow once the window has passed.
    tokio::time::sleep(Duration::from_millis(600)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ConfigEvent::Batch { .. }),
            "unexpected second commit: {event:?}"
        );
    }

    assert_eq!(engine.generation(), 1);
    assert_eq!(engine.get("minecraft.motd"), Some(json!("three")));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_invalid_edit_keeps_current_tree() {
    let ws = Workspace::new();
    let engine = ConfigEngine::open(watched(&ws), server_schema()).await.unwrap();
    let mut events = engine.subscribe();

    edit(&ws, &["logging", "level"], json!("verbose"));

    let failed = tokio::time::timeout(SETTLE, async {
        loop {
            if let Ok(ConfigEvent::ReloadFailed { reason }) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();

    assert!(failed.contains("logging.level"));
    assert_eq!(engine.get("logging.level"), Some(json!("info")));
    assert_eq!(engine.generation(), 0);

    std::fs::write(&ws.path, "{ truncated").unwrap();
    let failed_again = tokio::time::timeout(SETTLE, async {
        loop {
            if let Ok(ConfigEvent::ReloadFailed { reason }) = events.recv().await {
                return reason;
            }
        }
    })
    .await
    .unwrap();
    assert!(failed_again.contains("Parse error"));
    assert_eq!(engine.get("logging.level"), Some(json!("info")));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_own_save_does_not_recommit() {
    let ws = Workspace::new();
    let engine = ConfigEngine::open(watched(&ws), server_schema()).await.unwrap();

    engine
        .update_config("cloudflare.ttl", json!(120), UpdateOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(engine.generation(), 1);
    assert_eq!(engine.get("cloudflare.ttl"), Some(json!(120)));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_stop_is_idempotent_and_restartable() {
    let ws = Workspace::new();
    let engine = ConfigEngine::open(watched(&ws), server_schema()).await.unwrap();

    engine.stop_watcher().await;
    engine.stop_watcher().await;
    assert!(!engine.is_watching());

    edit(&ws, &["cloudflare", "ttl"], json!(90));
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(engine.get("cloudflare.ttl"), Some(json!(60)));

    engine.start_watcher().unwrap();
    engine.start_watcher().unwrap();
    edit(&ws, &["cloudflare", "ttl"], json!(95));
    let reloaded = wait_for(SETTLE, || {
        let engine = engine.clone();
        async move { engine.get("cloudflare.ttl") == Some(json!(95)) }
    })
    .await;
    assert!(reloaded);

    engine.shutdown().await;
    assert!(!engine.is_watching());
}
