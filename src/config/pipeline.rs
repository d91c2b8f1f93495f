//! Update pipeline.
//!
//! # States
//! ```text
//! Idle → Validating → BackingUp → Applying → Persisting → Notifying → Idle
//!            │
//!            └─ failure (invalid path, parse error, strict violation) → Idle
//! ```
//!
//! # Design Decisions
//! - One `try_lock` guards every mutation; a second caller gets `Busy` immediately
//! - The candidate is a full copy of the tree; the store swaps only after validation
//! - Validation always covers the whole candidate, not just the touched path
//! - A failed write does not undo the in-memory commit; both facts are reported

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::SystemTime;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::config::engine::EngineInner;
use crate::config::events::{ChangeEvent, ChangeSource, ConfigEvent};
use crate::config::tree;
use crate::error::{EngineError, EngineResult};
use crate::observability::metrics;
use crate::resilience::timeouts::run_bounded;
use crate::schema::{apply_defaults, validate, ValidationError};

/// Asynchronous whole-tree check, typically for cross-field constraints.
pub type TreeValidator =
    Arc<dyn Fn(Arc<Value>) -> BoxFuture<'static, Vec<ValidationError>> + Send + Sync>;

/// Pipeline stage, observable through the engine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle = 0,
    Validating = 1,
    BackingUp = 2,
    Applying = 3,
    Persisting = 4,
    Notifying = 5,
}

impl From<u8> for PipelineState {
    fn from(val: u8) -> Self {
        match val {
            1 => PipelineState::Validating,
            2 => PipelineState::BackingUp,
            3 => PipelineState::Applying,
            4 => PipelineState::Persisting,
            5 => PipelineState::Notifying,
            _ => PipelineState::Idle,
        }
    }
}

/// Resets the observable state to `Idle` however the run ends.
struct StateGuard<'a>(&'a AtomicU8);

impl<'a> StateGuard<'a> {
    fn enter(state: &'a AtomicU8) -> Self {
        Self(state)
    }

    fn set(&self, stage: PipelineState) {
        self.0.store(stage as u8, Ordering::Release);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(PipelineState::Idle as u8, Ordering::Release);
    }
}

/// Per-call options for mutations.
#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    /// Write the result to the backing file (still subject to `persist_on_update`).
    pub persist: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self { persist: true }
    }
}

impl UpdateOptions {
    pub fn in_memory() -> Self {
        Self { persist: false }
    }
}

/// Outcome of the durable write step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PersistStatus {
    Written,
    Skipped,
    /// The commit stands in memory; the file still holds the previous tree.
    Failed(String),
}

/// Result of a pipeline run that got past validation.
#[derive(Debug, Clone, Serialize)]
pub struct CommitReport {
    pub source: ChangeSource,
    /// False when the candidate equalled the current tree and nothing happened.
    pub committed: bool,
    pub generation: u64,
    pub changes: Vec<ChangeEvent>,
    /// Violations committed anyway in permissive mode.
    pub violations: Vec<ValidationError>,
    pub persisted: PersistStatus,
}

impl CommitReport {
    /// Whether the committed tree also reached the backing file.
    pub fn is_durable(&self) -> bool {
        !matches!(self.persisted, PersistStatus::Failed(_))
    }
}

/// What a single pipeline run should do besides the common stages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunPlan {
    pub source: ChangeSource,
    pub persist: bool,
    /// Reject violations even in permissive mode.
    pub force_strict: bool,
    pub restored_from: Option<usize>,
}

impl RunPlan {
    pub fn new(source: ChangeSource, opts: UpdateOptions) -> Self {
        Self {
            source,
            persist: opts.persist,
            force_strict: false,
            restored_from: None,
        }
    }
}

impl EngineInner {
    /// Run one mutation through every stage.
    ///
    /// `build` derives the candidate from the current tree; it runs under the
    /// mutation lock and any error it returns aborts the run untouched.
    pub(crate) async fn run_pipeline<F>(&self, plan: RunPlan, build: F) -> EngineResult<CommitReport>
    where
        F: FnOnce(&Value) -> EngineResult<Value>,
    {
        let Ok(_lock) = self.lock.try_lock() else {
            metrics::record_rejection("busy");
            tracing::debug!(source = %plan.source, "Mutation rejected, pipeline busy");
            return Err(EngineError::Busy);
        };
        let stage = StateGuard::enter(&self.state);

        stage.set(PipelineState::Validating);
        let current = self.store.snapshot();
        let candidate = match build(&current.tree) {
            Ok(candidate) => Arc::new(apply_defaults(&candidate, &self.schema)),
            Err(e) => {
                metrics::record_rejection("build");
                return Err(e);
            }
        };

        if candidate == current.tree {
            return Ok(CommitReport {
                source: plan.source,
                committed: false,
                generation: current.generation,
                changes: Vec::new(),
                violations: current.violations.clone(),
                persisted: PersistStatus::Skipped,
            });
        }

        let violations = self.validate_candidate(&candidate).await;
        if !violations.is_empty() {
            if self.settings.strict || plan.force_strict {
                tracing::warn!(
                    source = %plan.source,
                    errors = violations.len(),
                    "Candidate configuration rejected"
                );
                metrics::record_rejection("validation");
                self.events
                    .emit(ConfigEvent::ValidationFailed {
                        source: plan.source,
                        errors: violations.clone(),
                    })
                    .await;
                return Err(EngineError::Validation(violations));
            }
            for violation in &violations {
                tracing::warn!(path = %violation.path, message = %violation.message, "Committing invalid value (permissive mode)");
            }
        }

        stage.set(PipelineState::BackingUp);
        self.backups.push(current.tree.clone());
        metrics::record_backup_count(self.backups.len());

        stage.set(PipelineState::Applying);
        let next = self.store.commit(candidate, violations.clone());

        stage.set(PipelineState::Persisting);
        let persisted = if plan.persist && self.settings.persist_on_update {
            match self.loader.file().save(&self.file_view(&next.tree)) {
                Ok(()) => PersistStatus::Written,
                Err(e) => {
                    tracing::error!(generation = next.generation, error = %e, "Committed in memory but failed to persist");
                    metrics::record_persist_failure();
                    PersistStatus::Failed(e.to_string())
                }
            }
        } else {
            PersistStatus::Skipped
        };

        stage.set(PipelineState::Notifying);
        self.cache.invalidate();
        let changes = tree::diff(&current.tree, &next.tree);
        for change in &changes {
            self.events.emit(ConfigEvent::Changed(change.clone())).await;
        }
        self.events
            .emit(ConfigEvent::Batch {
                source: plan.source,
                generation: next.generation,
                changes: changes.clone(),
                timestamp: SystemTime::now(),
            })
            .await;
        if let PersistStatus::Failed(reason) = &persisted {
            self.events
                .emit(ConfigEvent::PersistFailed {
                    generation: next.generation,
                    reason: reason.clone(),
                })
                .await;
        }
        if let Some(index) = plan.restored_from {
            self.events
                .emit(ConfigEvent::Restored {
                    index,
                    generation: next.generation,
                })
                .await;
        }

        metrics::record_commit(plan.source.as_str(), next.generation);
        tracing::info!(
            source = %plan.source,
            generation = next.generation,
            changes = changes.len(),
            "Configuration committed"
        );

        Ok(CommitReport {
            source: plan.source,
            committed: true,
            generation: next.generation,
            changes,
            violations,
            persisted,
        })
    }

    /// Schema validation plus every registered asynchronous validator.
    pub(crate) async fn validate_candidate(&self, candidate: &Arc<Value>) -> Vec<ValidationError> {
        let mut errors = validate(candidate, &self.schema);

        let validators: Vec<TreeValidator> = self
            .validators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for validator in validators {
            let call = AssertUnwindSafe(validator(candidate.clone())).catch_unwind();
            match run_bounded(self.settings.hook_timeout(), call).await {
                Ok(Ok(mut found)) => errors.append(&mut found),
                Ok(Err(_)) => errors.push(ValidationError::new("", "validator panicked")),
                Err(limit) => errors.push(ValidationError::new(
                    "",
                    format!("validator timed out after {}ms", limit.as_millis()),
                )),
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            PipelineState::Idle,
            PipelineState::Validating,
            PipelineState::BackingUp,
            PipelineState::Applying,
            PipelineState::Persisting,
            PipelineState::Notifying,
        ] {
            assert_eq!(PipelineState::from(state as u8), state);
        }
        assert_eq!(PipelineState::from(42), PipelineState::Idle);
    }

    #[test]
    fn test_state_guard_resets_to_idle() {
        let state = AtomicU8::new(0);
        {
            let guard = StateGuard::enter(&state);
            guard.set(PipelineState::Persisting);
            assert_eq!(PipelineState::from(state.load(Ordering::Acquire)), PipelineState::Persisting);
        }
        assert_eq!(PipelineState::from(state.load(Ordering::Acquire)), PipelineState::Idle);
    }

    #[test]
    fn test_report_durability() {
        let mut report = CommitReport {
            source: ChangeSource::Update,
            committed: true,
            generation: 1,
            changes: Vec::new(),
            violations: Vec::new(),
            persisted: PersistStatus::Written,
        };
        assert!(report.is_durable());
        report.persisted = PersistStatus::Failed("disk full".into());
        assert!(!report.is_durable());
    }
}
