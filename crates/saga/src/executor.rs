//! Saga executor.
//!
//! Runs a saga's units of work, journals every completed step and, when a
//! step fails, walks the journal in reverse dispatching each step to its
//! registered compensator.

use std::sync::Arc;
use std::time::Instant;

use common::EntityId;
use entity_store::{DocumentOpsExt, EntityStore, StoreTransaction, TransactionOptions};

use crate::compensator::{CompensationContext, CompensatorRegistry};
use crate::config::{ExecutionMode, SagaConfig};
use crate::error::{Result, SagaError};
use crate::log::{
    Compensation, CompensationLog, CompensationOutcome, CompensationRecord, Journal,
};
use crate::outcome::{RollbackStatus, SagaFailure, SagaOutcome};
use crate::retry::RetryController;
use crate::services::assets::AssetStore;
use crate::state::SagaState;
use crate::writer::{SagaWriter, UnitOfWork};

/// Shared machinery every saga runs on.
pub struct SagaExecutor<S: EntityStore> {
    store: S,
    registry: Arc<CompensatorRegistry>,
    retry: RetryController,
    options: TransactionOptions,
    mode: ExecutionMode,
    persist_logs: bool,
    assets: Arc<dyn AssetStore>,
}

impl<S: EntityStore> SagaExecutor<S> {
    pub fn new(store: S, assets: Arc<dyn AssetStore>, config: &SagaConfig) -> Self {
        Self {
            store,
            registry: Arc::new(CompensatorRegistry::standard()),
            retry: RetryController::new(config.retry),
            options: config.transaction.clone(),
            mode: config.mode,
            persist_logs: config.persist_logs,
            assets,
        }
    }

    /// Replaces the compensator registry.
    pub fn with_registry(mut self, registry: CompensatorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether units of work run inside store transactions.
    pub fn transactional(&self) -> bool {
        self.mode == ExecutionMode::Auto && self.store.supports_transactions()
    }

    /// Starts a new run.
    pub fn begin(&self, saga_type: &'static str) -> SagaRun<'_, S> {
        metrics::counter!("saga_executions_total", "saga_type" => saga_type).increment(1);
        let saga_id = EntityId::new();
        tracing::info!(%saga_id, saga_type, transactional = self.transactional(), "saga_started");
        SagaRun {
            executor: self,
            saga_type,
            log: CompensationLog::new(saga_id, saga_type),
            started: Instant::now(),
        }
    }

    /// One transactional attempt: begin, apply, commit. Any failure aborts.
    async fn attempt<W: UnitOfWork>(&self, work: &W) -> Result<(W::Output, Journal)> {
        let mut tx = self.store.begin(&self.options).await?;
        let mut journal = Journal::new();

        let applied = tokio::time::timeout(self.options.max_duration, async {
            let mut writer = SagaWriter::new(&mut tx, &mut journal);
            work.apply(&mut writer).await
        })
        .await
        .map_err(SagaError::from)
        .and_then(std::convert::identity);

        match applied {
            Ok(output) => {
                tx.commit().await?;
                Ok((output, journal))
            }
            Err(e) => {
                if let Err(abort) = tx.abort().await {
                    tracing::warn!(error = %abort, "transaction_abort_failed");
                }
                Err(e)
            }
        }
    }
}

/// A saga in progress.
pub struct SagaRun<'e, S: EntityStore> {
    executor: &'e SagaExecutor<S>,
    saga_type: &'static str,
    log: CompensationLog,
    started: Instant,
}

impl<S: EntityStore> SagaRun<'_, S> {
    pub fn saga_id(&self) -> EntityId {
        self.log.saga_id
    }

    pub fn log(&self) -> &CompensationLog {
        &self.log
    }

    /// Runs a unit of work and journals its steps.
    ///
    /// Transactional runs retry the whole unit on transient failure and only
    /// journal it once committed. Otherwise each write commits as it goes and
    /// is journaled immediately, so a failure part-way leaves a journal of
    /// exactly what needs undoing.
    pub async fn apply<W: UnitOfWork>(&mut self, work: &W) -> Result<W::Output> {
        let executor = self.executor;
        if executor.transactional() {
            let (output, journal) = executor.retry.run(|| executor.attempt(work)).await?;
            self.log.journal.merge(journal);
            Ok(output)
        } else {
            let mut session = executor.store.session();
            let mut writer = SagaWriter::new(&mut session, &mut self.log.journal);
            work.apply(&mut writer).await
        }
    }

    /// Journals a step made outside the store.
    pub fn record_external(&mut self, compensation: Compensation) {
        tracing::info!(saga_id = %self.log.saga_id, step = %compensation.kind(), "external_step_completed");
        self.log.journal.record(compensation);
    }

    /// Marks that the run reached the gateway transfer.
    pub fn mark_funds_moved(&mut self) {
        self.log.funds_moved = true;
    }

    /// Ends the run. On failure every journaled step is compensated in
    /// reverse before the failure is returned.
    pub async fn finish<T>(mut self, result: Result<T>) -> SagaOutcome<T> {
        let saga_type = self.saga_type;
        let saga_id = self.log.saga_id;

        let outcome = match result {
            Ok(value) => {
                self.log.status = SagaState::Completed;
                if !self.log.journal.is_empty() {
                    self.persist().await;
                }
                metrics::counter!("saga_completed", "saga_type" => saga_type).increment(1);
                tracing::info!(%saga_id, saga_type, steps = self.log.journal.steps.len(), "saga_completed");
                Ok(value)
            }
            Err(error) => {
                let rollback = self.compensate(&error).await;
                metrics::counter!("saga_failed", "saga_type" => saga_type).increment(1);
                tracing::warn!(%saga_id, saga_type, kind = %error.kind(), error = %error, "saga failed");
                Err(SagaFailure {
                    saga_id,
                    saga_type,
                    kind: error.kind(),
                    message: error.to_string(),
                    rollback,
                    funds_moved: self.log.funds_moved,
                    compensations: self.log.compensations.clone(),
                })
            }
        };

        metrics::histogram!("saga_duration_seconds", "saga_type" => saga_type)
            .record(self.started.elapsed().as_secs_f64());
        outcome
    }

    async fn compensate(&mut self, error: &SagaError) -> RollbackStatus {
        self.log.error = Some(error.to_string());
        if self.log.journal.is_empty() {
            self.log.status = SagaState::Failed;
            return RollbackStatus::NotNeeded;
        }

        let saga_id = self.log.saga_id;
        self.log.status = SagaState::RollingBack;
        tracing::warn!(%saga_id, steps = self.log.journal.steps.len(), error = %error, "saga_rollback_started");
        self.persist().await;

        if self.log.funds_moved {
            tracing::error!(
                %saga_id,
                saga_type = self.saga_type,
                "funds moved but internal bookkeeping failed; reverting bookkeeping only"
            );
        }

        let executor = self.executor;
        let journal = self.log.journal.clone();
        let mut session = executor.store.session();
        let mut ctx = CompensationContext {
            ops: &mut session,
            journal: &journal,
            assets: executor.assets.as_ref(),
        };

        for step in journal.steps.iter().rev() {
            let outcome = match executor.registry.get(step.kind) {
                Some(compensator) => compensator
                    .compensate(&step.compensation, &mut ctx)
                    .await
                    .unwrap_or_else(|e| CompensationOutcome::Failed(e.to_string())),
                None => CompensationOutcome::Failed(format!(
                    "no compensator registered for {}",
                    step.kind
                )),
            };

            metrics::counter!("saga_compensations_total", "step" => step.kind.as_str())
                .increment(1);
            match &outcome {
                CompensationOutcome::Failed(reason) => {
                    tracing::error!(%saga_id, step = %step.kind, reason = %reason, "compensation_step_failed");
                }
                CompensationOutcome::Skipped(reason) => {
                    tracing::info!(%saga_id, step = %step.kind, reason = %reason, "compensation_step_skipped");
                }
                CompensationOutcome::Compensated => {
                    tracing::info!(%saga_id, step = %step.kind, "compensation_step_completed");
                }
            }

            self.log.compensations.push(CompensationRecord {
                kind: step.kind,
                outcome,
                recorded_at: chrono::Utc::now(),
            });
        }

        let rollback = if self.log.failed_compensations() == 0 {
            self.log.status = SagaState::RolledBack;
            RollbackStatus::RolledBack
        } else {
            self.log.status = SagaState::RollbackPartial;
            metrics::counter!("saga_rollback_partial_total", "saga_type" => self.saga_type)
                .increment(1);
            tracing::error!(
                %saga_id,
                failed = self.log.failed_compensations(),
                "ROLLBACK_PARTIAL: manual repair required"
            );
            RollbackStatus::RollbackPartial
        };

        self.persist().await;
        rollback
    }

    /// Appends a snapshot of the log. Failures are logged, never returned.
    async fn persist(&self) {
        if !self.executor.persist_logs {
            return;
        }
        let mut session = self.executor.store.session();
        if let Err(e) = session.create(&self.log.snapshot()).await {
            tracing::error!(saga_id = %self.log.saga_id, error = %e, "compensation_log_persist_failed");
        }
    }
}
