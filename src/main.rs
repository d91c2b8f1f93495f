//! Configuration engine host.
//!
//! # Architecture Overview
//!
//! ```text
//!   settings.toml ──▶ EngineSettings ──┐
//!   schema.json  ──▶ SchemaNode ───────┤
//!                                      ▼
//!   config file ◀──── save ──── ┌──────────────┐ ◀── update / remove (CLI)
//!        │                      │ ConfigEngine │
//!        └── notify ──▶ watcher │  pipeline    │ ──▶ events ──▶ log
//!                               └──────────────┘
//!   SIGHUP ──▶ reload      SIGTERM/SIGINT ──▶ Shutdown
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

use config_engine::config::{ConfigEvent, ExportFormat, UpdateOptions};
use config_engine::lifecycle::signals::run_signal_loop;
use config_engine::observability::{logging, metrics};
use config_engine::settings::load_settings;
use config_engine::{ConfigEngine, EngineSettings, SchemaNode, Shutdown};

#[derive(Parser)]
#[command(name = "config-engine")]
#[command(about = "Schema-validated configuration with hot reload", long_about = None)]
struct Cli {
    /// Engine settings file (TOML)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Backing configuration file, overrides the settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schema file (JSON)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Environment overlay prefix, overrides the settings file
    #[arg(long)]
    env_prefix: Option<String>,

    /// Commit invalid values with warnings instead of rejecting them
    #[arg(long)]
    permissive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configuration and log every change (default)
    Run,
    /// Print the value at a dot-path as JSON
    Get { path: String },
    /// Set a dot-path to a JSON value (bare words are strings)
    Set { path: String, value: String },
    /// Remove the key at a dot-path
    Remove { path: String },
    /// Print the whole configuration
    Export {
        #[arg(short, long, default_value = "json")]
        format: ExportFormat,
    },
    /// Validate the configuration and list every violation
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => EngineSettings::default(),
    };
    if let Some(path) = cli.config {
        settings.file_path = path;
    }
    if let Some(prefix) = cli.env_prefix {
        settings.env_prefix = Some(prefix);
    }
    if cli.permissive {
        settings.strict = false;
    }

    logging::init_logging(&settings.log_level);

    let schema = match &cli.schema {
        Some(path) => SchemaNode::from_json(&std::fs::read_to_string(path)?)?,
        None => SchemaNode::object(),
    };

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(settings, schema).await?,
        Commands::Get { path } => {
            let engine = ConfigEngine::new(settings, schema)?;
            match engine.get(&path) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    eprintln!("{path}: not set");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Set { path, value } => {
            let engine = ConfigEngine::new(settings, schema)?;
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let report = engine.update_config(&path, value, UpdateOptions::default()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Remove { path } => {
            let engine = ConfigEngine::new(settings, schema)?;
            let report = engine.remove_config(&path, UpdateOptions::default()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Export { format } => {
            let engine = ConfigEngine::new(settings, schema)?;
            print!("{}", engine.export(format)?);
        }
        Commands::Check => {
            settings.strict = false;
            settings.create_if_missing = false;
            let engine = ConfigEngine::new(settings, schema)?;
            if engine.is_valid() {
                println!("configuration is valid");
            } else {
                for violation in engine.validation_errors() {
                    println!("{violation}");
                }
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn run(mut settings: EngineSettings, schema: SchemaNode) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("config-engine v{} starting", env!("CARGO_PKG_VERSION"));

    if let Some(address) = &settings.metrics_address {
        match address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(metrics_address = %address, error = %e, "Failed to parse metrics address"),
        }
    }

    settings.watch.enabled = true;
    let engine = ConfigEngine::open(settings, schema).await?;
    let shutdown = Shutdown::new();

    let mut events = engine.subscribe();
    let mut events_shutdown = shutdown.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = events_shutdown.recv() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    let mut done = shutdown.subscribe();
    tokio::spawn(run_signal_loop(engine.clone(), shutdown.clone()));
    let _ = done.recv().await;

    engine.shutdown().await;
    let _ = event_log.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_event(event: &ConfigEvent) {
    match event {
        ConfigEvent::Changed(change) => tracing::info!(
            path = %change.path,
            change = ?change.change_type,
            old = ?change.old_value,
            new = ?change.new_value,
            "Configuration value changed"
        ),
        ConfigEvent::Batch {
            source,
            generation,
            changes,
            ..
        } => tracing::debug!(%source, generation, changes = changes.len(), "Commit applied"),
        ConfigEvent::ValidationFailed { source, errors } => {
            for error in errors {
                tracing::warn!(%source, violation = %error, "Rejected change");
            }
        }
        ConfigEvent::ReloadFailed { reason } => tracing::error!(%reason, "Reload failed"),
        ConfigEvent::PersistFailed { generation, reason } => {
            tracing::error!(generation, %reason, "Commit not persisted")
        }
        ConfigEvent::Restored { index, generation } => {
            tracing::info!(index, generation, "Backup restored")
        }
    }
}
