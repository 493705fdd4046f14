//! Saga coordinator: the entry point for every workflow.

use std::sync::Arc;

use common::EntityId;
use entity_store::{Document, DocumentOpsExt, EntityStore, Versioned};

use crate::compensator::CompensatorRegistry;
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::executor::SagaExecutor;
use crate::log::CompensationLog;
use crate::services::assets::AssetStore;
use crate::services::gateway::PaymentGateway;
use crate::services::notifier::{Notification, Notifier, notify_best_effort};

/// Runs the booking, payout and onboarding sagas against one store.
///
/// Each workflow lives in its own module under `sagas` and is exposed as a
/// method returning a [`SagaOutcome`](crate::SagaOutcome).
pub struct SagaCoordinator<S: EntityStore> {
    pub(crate) executor: SagaExecutor<S>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) assets: Arc<dyn AssetStore>,
    pub(crate) config: SagaConfig,
}

impl<S: EntityStore> SagaCoordinator<S> {
    /// Creates a new saga coordinator.
    pub fn new(
        store: S,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        assets: Arc<dyn AssetStore>,
        config: SagaConfig,
    ) -> Self {
        let executor = SagaExecutor::new(store, assets.clone(), &config);
        Self {
            executor,
            gateway,
            notifier,
            assets,
            config,
        }
    }

    /// Replaces the compensators used on rollback.
    pub fn with_registry(mut self, registry: CompensatorRegistry) -> Self {
        self.executor = self.executor.with_registry(registry);
        self
    }

    pub fn executor(&self) -> &SagaExecutor<S> {
        &self.executor
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.executor.store()
    }

    /// Compensation logs written for a saga run, oldest first.
    pub async fn compensation_logs(&self, saga_id: EntityId) -> Result<Vec<CompensationLog>> {
        let mut logs: Vec<CompensationLog> = self
            .store()
            .session()
            .find_by::<CompensationLog, _>("saga_id", &saga_id)
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect();
        logs.sort_by_key(|log| log.recorded_at);
        Ok(logs)
    }

    /// Reads a document outside any unit of work. Used for preconditions.
    pub(crate) async fn read<D: Document>(&self, id: EntityId) -> Result<D> {
        self.store()
            .session()
            .find::<D>(id)
            .await?
            .map(Versioned::into_inner)
            .ok_or_else(|| SagaError::not_found::<D>(id))
    }

    pub(crate) async fn notify(
        &self,
        recipient: EntityId,
        template: &'static str,
        data: serde_json::Value,
    ) {
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(recipient, template, data),
        )
        .await;
    }
}
