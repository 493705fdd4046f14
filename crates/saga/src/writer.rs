//! Journaled writes for saga steps.

use async_trait::async_trait;
use common::EntityId;
use domain::DomainError;
use entity_store::{Document, DocumentOps, DocumentOpsExt, StoreError, Versioned};
use serde::Serialize;

use crate::error::{Result, SagaError};
use crate::log::{Compensation, Journal};

const MAX_WRITE_ATTEMPTS: usize = 8;

/// Store handle for saga steps.
///
/// Each successful write appends its compensation to the journal, and the
/// first write to a document captures the document's pre-image. The
/// underlying handle is either an autocommit session or an open
/// transaction; steps do not know which.
pub struct SagaWriter<'a> {
    ops: &'a mut (dyn DocumentOps + 'a),
    journal: &'a mut Journal,
}

impl<'a> SagaWriter<'a> {
    pub fn new(ops: &'a mut (dyn DocumentOps + 'a), journal: &'a mut Journal) -> Self {
        Self { ops, journal }
    }

    pub async fn load<D: Document>(&mut self, id: EntityId) -> Result<D> {
        self.ops
            .find::<D>(id)
            .await?
            .map(Versioned::into_inner)
            .ok_or_else(|| SagaError::not_found::<D>(id))
    }

    pub async fn find_by<D, V>(&mut self, field: &str, value: &V) -> Result<Vec<D>>
    where
        D: Document,
        V: Serialize + Sync + ?Sized,
    {
        Ok(self
            .ops
            .find_by::<D, V>(field, value)
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }

    /// Inserts a new document.
    pub async fn create<D: Document>(
        &mut self,
        compensation: Compensation,
        document: &D,
    ) -> Result<()> {
        self.ops.create(document).await?;
        self.journal.record(compensation);
        Ok(())
    }

    /// Applies `mutate` to the current version of a document and writes it
    /// back with a compare-and-swap, re-reading on concurrent change.
    ///
    /// A domain error from `mutate` aborts the step without writing.
    pub async fn update<D, F>(
        &mut self,
        compensation: Compensation,
        id: EntityId,
        mutate: F,
    ) -> Result<D>
    where
        D: Document,
        F: Fn(&mut D) -> std::result::Result<(), DomainError> + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let current = self
                .ops
                .find::<D>(id)
                .await?
                .ok_or_else(|| SagaError::not_found::<D>(id))?;
            self.journal.capture(&current.document)?;

            let mut next = current.document;
            mutate(&mut next)?;

            match self.ops.save(current.version, &next).await {
                Ok(_) => {
                    self.journal.record(compensation);
                    return Ok(next);
                }
                Err(StoreError::VersionMismatch { .. }) => {
                    tracing::debug!(collection = D::COLLECTION, %id, "step_write_retry");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::WriteConflict(format!(
            "{} {} kept changing during saga step",
            D::COLLECTION,
            id
        ))
        .into())
    }
}

/// A group of store writes that commit together.
///
/// Under a transaction-capable store a failed or conflicting unit is
/// rolled back and re-run from the start, so `apply` must be repeatable.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    async fn apply(&self, writer: &mut SagaWriter<'_>) -> Result<Self::Output>;
}
