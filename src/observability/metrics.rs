//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_commits_total` (counter): successful commits by source
//! - `config_rejections_total` (counter): aborted pipeline runs by reason
//! - `config_reloads_total` (counter): watcher/explicit reloads by outcome
//! - `config_cache_lookups_total` (counter): cache lookups by result
//! - `config_persist_failures_total` (counter): commits that were not written
//! - `config_backups` (gauge): backups currently held
//! - `config_generation` (gauge): generation of the committed tree
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed
//! - Prometheus exporter is optional and owned by the host binary

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_commit(source: &'static str, generation: u64) {
    ::metrics::counter!("config_commits_total", "source" => source).increment(1);
    ::metrics::gauge!("config_generation").set(generation as f64);
}

pub fn record_rejection(reason: &'static str) {
    ::metrics::counter!("config_rejections_total", "reason" => reason).increment(1);
}

pub fn record_reload(outcome: &'static str) {
    ::metrics::counter!("config_reloads_total", "outcome" => outcome).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    ::metrics::counter!("config_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_persist_failure() {
    ::metrics::counter!("config_persist_failures_total").increment(1);
}

pub fn record_backup_count(count: usize) {
    ::metrics::gauge!("config_backups").set(count as f64);
}
