use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EntityId, RawDocument, Result, StoreError, TransactionOptions, Version,
    store::{DocumentOps, EntityStore, StoreTransaction},
};

type Key = (&'static str, EntityId);

#[derive(Debug, Clone)]
struct Stored {
    version: Version,
    body: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
struct WriteFault {
    remaining: u32,
    transient: bool,
}

#[derive(Default)]
struct State {
    documents: HashMap<Key, Stored>,
    commit_conflicts: u32,
    write_faults: HashMap<&'static str, WriteFault>,
    commits: u64,
}

impl State {
    fn take_write_fault(&mut self, collection: &'static str) -> Result<()> {
        let Some(fault) = self.write_faults.get_mut(collection) else {
            return Ok(());
        };
        if fault.remaining == 0 {
            return Ok(());
        }
        fault.remaining -= 1;
        let message = format!("injected write failure on {collection}");
        if fault.transient {
            Err(StoreError::Unavailable(message))
        } else {
            Err(StoreError::Rejected(message))
        }
    }
}

/// In-memory entity store for tests and local runs.
///
/// Supports the same operations as the PostgreSQL store, including
/// optimistic multi-document transactions, plus hooks for injecting
/// write failures and commit conflicts.
#[derive(Clone, Default)]
pub struct InMemoryEntityStore {
    state: Arc<RwLock<State>>,
    unique_fields: Arc<Vec<(&'static str, String)>>,
    transactions_disabled: Arc<AtomicBool>,
}

impl InMemoryEntityStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `field` unique within `collection`.
    pub fn with_unique_field(mut self, collection: &'static str, field: &str) -> Self {
        Arc::make_mut(&mut self.unique_fields).push((collection, field.to_string()));
        self
    }

    /// Makes [`EntityStore::begin`] fail as if the backend had no transactions.
    pub fn set_transactions_supported(&self, supported: bool) {
        self.transactions_disabled
            .store(!supported, Ordering::SeqCst);
    }

    /// Makes the next `count` commits fail with a write conflict.
    pub async fn inject_commit_conflicts(&self, count: u32) {
        self.state.write().await.commit_conflicts = count;
    }

    /// Makes the next `count` writes to `collection` fail.
    ///
    /// Transient failures surface as [`StoreError::Unavailable`], permanent
    /// ones as [`StoreError::Rejected`].
    pub async fn inject_write_failures(&self, collection: &'static str, count: u32, transient: bool) {
        self.state.write().await.write_faults.insert(
            collection,
            WriteFault {
                remaining: count,
                transient,
            },
        );
    }

    /// Returns the number of documents in a collection.
    pub async fn count(&self, collection: &'static str) -> usize {
        self.state
            .read()
            .await
            .documents
            .keys()
            .filter(|(c, _)| *c == collection)
            .count()
    }

    /// Returns the number of committed transactions.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }

    /// Clears all documents and injected faults.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.documents.clear();
        state.write_faults.clear();
        state.commit_conflicts = 0;
    }

    fn unique_violation<'a>(
        &self,
        collection: &'static str,
        id: EntityId,
        body: &serde_json::Value,
        others: impl Iterator<Item = (&'a Key, &'a serde_json::Value)>,
    ) -> bool {
        let fields: Vec<&str> = self
            .unique_fields
            .iter()
            .filter(|(c, _)| *c == collection)
            .map(|(_, f)| f.as_str())
            .collect();
        if fields.is_empty() {
            return false;
        }

        others
            .filter(|((c, other_id), _)| *c == collection && *other_id != id)
            .any(|(_, other)| {
                fields.iter().any(|field| match body.get(*field) {
                    Some(value) if !value.is_null() => other.get(*field) == Some(value),
                    _ => false,
                })
            })
    }
}

fn matches_field(body: &serde_json::Value, field: &str, value: &serde_json::Value) -> bool {
    body.get(field) == Some(value)
}

#[async_trait]
impl DocumentOps for InMemoryEntityStore {
    async fn get(
        &mut self,
        collection: &'static str,
        id: EntityId,
    ) -> Result<Option<RawDocument>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .get(&(collection, id))
            .map(|stored| RawDocument {
                id,
                version: stored.version,
                body: stored.body.clone(),
            }))
    }

    async fn find_by_field(
        &mut self,
        collection: &'static str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<RawDocument>> {
        let state = self.state.read().await;
        let mut found: Vec<RawDocument> = state
            .documents
            .iter()
            .filter(|((c, _), stored)| *c == collection && matches_field(&stored.body, field, value))
            .map(|((_, id), stored)| RawDocument {
                id: *id,
                version: stored.version,
                body: stored.body.clone(),
            })
            .collect();
        found.sort_by_key(|doc| doc.id);
        Ok(found)
    }

    async fn insert(
        &mut self,
        collection: &'static str,
        id: EntityId,
        body: serde_json::Value,
    ) -> Result<Version> {
        let mut state = self.state.write().await;
        state.take_write_fault(collection)?;

        let key = (collection, id);
        if state.documents.contains_key(&key)
            || self.unique_violation(
                collection,
                id,
                &body,
                state.documents.iter().map(|(k, s)| (k, &s.body)),
            )
        {
            return Err(StoreError::AlreadyExists { collection, id });
        }

        let version = Version::first();
        state.documents.insert(key, Stored { version, body });
        Ok(version)
    }

    async fn replace(
        &mut self,
        collection: &'static str,
        id: EntityId,
        expected: Version,
        body: serde_json::Value,
    ) -> Result<Version> {
        let mut state = self.state.write().await;
        state.take_write_fault(collection)?;

        let key = (collection, id);
        let actual = state
            .documents
            .get(&key)
            .map(|stored| stored.version)
            .ok_or(StoreError::NotFound { collection, id })?;
        if actual != expected {
            return Err(StoreError::VersionMismatch {
                collection,
                id,
                expected,
                actual,
            });
        }
        if self.unique_violation(
            collection,
            id,
            &body,
            state.documents.iter().map(|(k, s)| (k, &s.body)),
        ) {
            return Err(StoreError::AlreadyExists { collection, id });
        }

        let version = actual.next();
        state.documents.insert(key, Stored { version, body });
        Ok(version)
    }

    async fn remove(&mut self, collection: &'static str, id: EntityId) -> Result<bool> {
        let mut state = self.state.write().await;
        state.take_write_fault(collection)?;
        Ok(state.documents.remove(&(collection, id)).is_some())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    type Session = InMemoryEntityStore;
    type Transaction = InMemoryTransaction;

    fn session(&self) -> Self::Session {
        self.clone()
    }

    fn supports_transactions(&self) -> bool {
        !self.transactions_disabled.load(Ordering::SeqCst)
    }

    async fn begin(&self, options: &TransactionOptions) -> Result<Self::Transaction> {
        if !self.supports_transactions() {
            return Err(StoreError::TransactionsUnsupported);
        }
        Ok(InMemoryTransaction {
            store: self.clone(),
            reads: HashMap::new(),
            writes: HashMap::new(),
            started: Instant::now(),
            max_duration: options.max_duration,
        })
    }
}

/// Optimistic transaction over an [`InMemoryEntityStore`].
///
/// Writes are buffered locally. At commit, every document the transaction
/// read must still be at the version it saw, otherwise the commit fails
/// with [`StoreError::WriteConflict`] and nothing is applied.
pub struct InMemoryTransaction {
    store: InMemoryEntityStore,
    reads: HashMap<Key, Version>,
    writes: HashMap<Key, Option<Stored>>,
    started: Instant,
    max_duration: Duration,
}

impl InMemoryTransaction {
    fn check_deadline(&self) -> Result<()> {
        if self.started.elapsed() > self.max_duration {
            return Err(StoreError::TransactionTimeout);
        }
        Ok(())
    }

    /// Returns the document as this transaction sees it, recording the read.
    async fn current(&mut self, key: Key) -> Option<Stored> {
        if let Some(pending) = self.writes.get(&key) {
            return pending.clone();
        }
        let stored = self.store.state.read().await.documents.get(&key).cloned();
        self.reads
            .entry(key)
            .or_insert_with(|| stored.as_ref().map_or(Version::initial(), |s| s.version));
        stored
    }

    async fn take_write_fault(&self, collection: &'static str) -> Result<()> {
        self.store.state.write().await.take_write_fault(collection)
    }
}

#[async_trait]
impl DocumentOps for InMemoryTransaction {
    async fn get(
        &mut self,
        collection: &'static str,
        id: EntityId,
    ) -> Result<Option<RawDocument>> {
        self.check_deadline()?;
        Ok(self
            .current((collection, id))
            .await
            .map(|stored| RawDocument {
                id,
                version: stored.version,
                body: stored.body,
            }))
    }

    async fn find_by_field(
        &mut self,
        collection: &'static str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<RawDocument>> {
        self.check_deadline()?;

        let committed: Vec<(Key, Stored)> = {
            let state = self.store.state.read().await;
            state
                .documents
                .iter()
                .filter(|((c, _), _)| *c == collection)
                .map(|(k, s)| (*k, s.clone()))
                .collect()
        };

        let mut found = Vec::new();
        for (key, stored) in committed {
            if self.writes.contains_key(&key) {
                continue;
            }
            if matches_field(&stored.body, field, value) {
                self.reads.entry(key).or_insert(stored.version);
                found.push(RawDocument {
                    id: key.1,
                    version: stored.version,
                    body: stored.body,
                });
            }
        }
        for ((c, id), pending) in &self.writes {
            if *c != collection {
                continue;
            }
            if let Some(stored) = pending
                && matches_field(&stored.body, field, value)
            {
                found.push(RawDocument {
                    id: *id,
                    version: stored.version,
                    body: stored.body.clone(),
                });
            }
        }
        found.sort_by_key(|doc| doc.id);
        Ok(found)
    }

    async fn insert(
        &mut self,
        collection: &'static str,
        id: EntityId,
        body: serde_json::Value,
    ) -> Result<Version> {
        self.check_deadline()?;
        self.take_write_fault(collection).await?;

        let key = (collection, id);
        if self.current(key).await.is_some() {
            return Err(StoreError::AlreadyExists { collection, id });
        }

        let version = Version::first();
        self.writes.insert(key, Some(Stored { version, body }));
        Ok(version)
    }

    async fn replace(
        &mut self,
        collection: &'static str,
        id: EntityId,
        expected: Version,
        body: serde_json::Value,
    ) -> Result<Version> {
        self.check_deadline()?;
        self.take_write_fault(collection).await?;

        let key = (collection, id);
        let actual = self
            .current(key)
            .await
            .map(|stored| stored.version)
            .ok_or(StoreError::NotFound { collection, id })?;
        if actual != expected {
            return Err(StoreError::VersionMismatch {
                collection,
                id,
                expected,
                actual,
            });
        }

        let version = actual.next();
        self.writes.insert(key, Some(Stored { version, body }));
        Ok(version)
    }

    async fn remove(&mut self, collection: &'static str, id: EntityId) -> Result<bool> {
        self.check_deadline()?;
        self.take_write_fault(collection).await?;

        let key = (collection, id);
        let existed = self.current(key).await.is_some();
        self.writes.insert(key, None);
        Ok(existed)
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn commit(self) -> Result<()> {
        self.check_deadline()?;

        let mut state = self.store.state.write().await;

        if state.commit_conflicts > 0 {
            state.commit_conflicts -= 1;
            metrics::counter!("store_write_conflicts_total").increment(1);
            return Err(StoreError::WriteConflict(
                "injected commit conflict".to_string(),
            ));
        }

        for (key, seen) in &self.reads {
            let now = state
                .documents
                .get(key)
                .map_or(Version::initial(), |s| s.version);
            if now != *seen {
                metrics::counter!("store_write_conflicts_total").increment(1);
                tracing::debug!(collection = key.0, id = %key.1, %seen, %now, "commit_conflict");
                return Err(StoreError::WriteConflict(format!(
                    "{} {} changed from version {} to {}",
                    key.0, key.1, seen, now
                )));
            }
        }

        for (&(collection, id), pending) in &self.writes {
            let Some(stored) = pending else { continue };
            let others = state
                .documents
                .iter()
                .filter(|(k, _)| !self.writes.contains_key(k))
                .map(|(k, s)| (k, &s.body))
                .chain(
                    self.writes
                        .iter()
                        .filter_map(|(k, w)| w.as_ref().map(|s| (k, &s.body))),
                );
            if self
                .store
                .unique_violation(collection, id, &stored.body, others)
            {
                return Err(StoreError::AlreadyExists {
                    collection,
                    id,
                });
            }
        }

        for (key, pending) in self.writes {
            match pending {
                Some(stored) => {
                    state.documents.insert(key, stored);
                }
                None => {
                    state.documents.remove(&key);
                }
            }
        }
        state.commits += 1;
        Ok(())
    }

    async fn abort(self) -> Result<()> {
        Ok(())
    }
}
