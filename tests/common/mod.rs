//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config_engine::{EngineSettings, SchemaNode};
use tempfile::TempDir;

/// Schema for a game-server deployment: port, DNS TTL, log level.
pub fn server_schema() -> SchemaNode {
    SchemaNode::object()
        .property(
            "minecraft",
            SchemaNode::object()
                .property(
                    "port",
                    SchemaNode::integer()
                        .range(1024.0, 65535.0)
                        .default_value(25565),
                )
                .property("motd", SchemaNode::string().default_value("A Minecraft Server")),
        )
        .property(
            "cloudflare",
            SchemaNode::object().property("ttl", SchemaNode::integer().min(30.0).default_value(60)),
        )
        .property(
            "logging",
            SchemaNode::object().property(
                "level",
                SchemaNode::string()
                    .one_of(["debug", "info", "warn", "error"])
                    .default_value("info"),
            ),
        )
}

/// A temporary directory holding the backing file.
pub struct Workspace {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        Self { dir, path }
    }

    /// Workspace whose backing file already holds `contents`.
    pub fn with_file(contents: &str) -> Self {
        let ws = Self::new();
        std::fs::write(&ws.path, contents).unwrap();
        ws
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings::for_file(&self.path)
    }

    pub fn read_json(&self) -> serde_json::Value {
        read_json(&self.path)
    }
}

pub fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}
