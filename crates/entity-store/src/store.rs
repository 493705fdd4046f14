use async_trait::async_trait;
use serde::Serialize;

use crate::{
    Document, EntityId, GuardViolation, RawDocument, Result, StoreError, TransactionOptions,
    Version, Versioned,
};

/// How many compare-and-swap rounds an atomic update attempts before
/// reporting a write conflict.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Untyped document operations shared by autocommit sessions and transactions.
///
/// Every write bumps the document version. `replace` is a compare-and-swap:
/// it fails with [`StoreError::VersionMismatch`] if the stored version is
/// not `expected`.
#[async_trait]
pub trait DocumentOps: Send {
    async fn get(&mut self, collection: &'static str, id: EntityId)
    -> Result<Option<RawDocument>>;

    /// Returns every document whose top-level `field` equals `value`.
    async fn find_by_field(
        &mut self,
        collection: &'static str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<RawDocument>>;

    /// Inserts a new document at [`Version::first`].
    async fn insert(
        &mut self,
        collection: &'static str,
        id: EntityId,
        body: serde_json::Value,
    ) -> Result<Version>;

    async fn replace(
        &mut self,
        collection: &'static str,
        id: EntityId,
        expected: Version,
        body: serde_json::Value,
    ) -> Result<Version>;

    /// Removes a document. Returns false if it did not exist.
    async fn remove(&mut self, collection: &'static str, id: EntityId) -> Result<bool>;
}

/// A multi-document transaction. Dropping it without committing aborts it.
#[async_trait]
pub trait StoreTransaction: DocumentOps + Sized {
    /// Commits all writes atomically.
    ///
    /// Fails with [`StoreError::WriteConflict`] if a concurrent writer
    /// touched anything this transaction read or wrote.
    async fn commit(self) -> Result<()>;

    async fn abort(self) -> Result<()>;
}

/// A store of versioned documents.
#[async_trait]
pub trait EntityStore: Clone + Send + Sync + 'static {
    /// Handle whose writes apply immediately, one document at a time.
    type Session: DocumentOps + 'static;

    type Transaction: StoreTransaction + 'static;

    fn session(&self) -> Self::Session;

    /// Whether [`EntityStore::begin`] can open multi-document transactions.
    fn supports_transactions(&self) -> bool;

    async fn begin(&self, options: &TransactionOptions) -> Result<Self::Transaction>;
}

/// Typed convenience methods over [`DocumentOps`].
#[async_trait]
pub trait DocumentOpsExt: DocumentOps {
    async fn find<D: Document>(&mut self, id: EntityId) -> Result<Option<Versioned<D>>> {
        match self.get(D::COLLECTION, id).await? {
            Some(raw) => Ok(Some(raw.decode()?)),
            None => Ok(None),
        }
    }

    /// Like [`find`](Self::find) but a missing document is an error.
    async fn load<D: Document>(&mut self, id: EntityId) -> Result<Versioned<D>> {
        self.find::<D>(id).await?.ok_or(StoreError::NotFound {
            collection: D::COLLECTION,
            id,
        })
    }

    async fn find_by<D, V>(&mut self, field: &str, value: &V) -> Result<Vec<Versioned<D>>>
    where
        D: Document,
        V: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        let raws = self.find_by_field(D::COLLECTION, field, &value).await?;
        raws.into_iter().map(RawDocument::decode).collect()
    }

    async fn create<D: Document>(&mut self, document: &D) -> Result<Version> {
        let body = serde_json::to_value(document)?;
        self.insert(D::COLLECTION, document.id(), body).await
    }

    /// Overwrites a document if it is still at `expected`.
    async fn save<D: Document>(&mut self, expected: Version, document: &D) -> Result<Version> {
        let body = serde_json::to_value(document)?;
        self.replace(D::COLLECTION, document.id(), expected, body)
            .await
    }

    /// Reads a document, applies `mutate` and writes it back atomically.
    ///
    /// `mutate` acts as the guard: returning a [`GuardViolation`] aborts the
    /// update. If another writer got in between the read and the write, the
    /// document is re-read and `mutate` runs again against the fresh state.
    async fn atomic_update<D, F>(&mut self, id: EntityId, mutate: F) -> Result<Versioned<D>>
    where
        D: Document,
        F: Fn(&mut D) -> std::result::Result<(), GuardViolation> + Send + Sync,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.load::<D>(id).await?;
            let mut document = current.document;
            mutate(&mut document)?;
            let body = serde_json::to_value(&document)?;

            match self.replace(D::COLLECTION, id, current.version, body).await {
                Ok(version) => return Ok(Versioned { version, document }),
                Err(StoreError::VersionMismatch { .. }) => {
                    tracing::debug!(collection = D::COLLECTION, %id, "atomic_update_retry");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::WriteConflict(format!(
            "{} {} kept changing during atomic update",
            D::COLLECTION,
            id
        )))
    }

    async fn delete<D: Document>(&mut self, id: EntityId) -> Result<bool> {
        self.remove(D::COLLECTION, id).await
    }
}

impl<T: DocumentOps + ?Sized> DocumentOpsExt for T {}
