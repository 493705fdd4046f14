use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EntityId, RawDocument, ReadConcern, Result, StoreError, TransactionOptions, Version,
    WriteConcern,
    store::{DocumentOps, EntityStore, StoreTransaction},
};

/// PostgreSQL-backed entity store.
///
/// All collections share one `documents` table keyed by
/// `(collection, id)` with the body stored as JSONB.
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    /// Creates a new PostgreSQL entity store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps backend error codes onto store errors.
fn map_error(err: sqlx::Error, collection: &'static str, id: Option<EntityId>) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.code().as_deref() {
            Some("23505") => {
                if let Some(id) = id {
                    return StoreError::AlreadyExists { collection, id };
                }
            }
            Some("40001") | Some("40P01") => {
                metrics::counter!("store_write_conflicts_total").increment(1);
                return StoreError::WriteConflict(db_err.message().to_string());
            }
            Some("57014") => return StoreError::TransactionTimeout,
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn row_to_document(row: PgRow) -> Result<RawDocument> {
    Ok(RawDocument {
        id: EntityId::from_uuid(row.try_get::<Uuid, _>("id")?),
        version: Version::new(row.try_get("version")?),
        body: row.try_get("body")?,
    })
}

async fn get_document<'e, E: PgExecutor<'e>>(
    executor: E,
    collection: &'static str,
    id: EntityId,
) -> Result<Option<RawDocument>> {
    let row = sqlx::query("SELECT id, version, body FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(executor)
        .await
        .map_err(|e| map_error(e, collection, Some(id)))?;

    row.map(row_to_document).transpose()
}

async fn find_documents<'e, E: PgExecutor<'e>>(
    executor: E,
    collection: &'static str,
    field: &str,
    value: &serde_json::Value,
) -> Result<Vec<RawDocument>> {
    let rows = sqlx::query(
        r#"
        SELECT id, version, body
        FROM documents
        WHERE collection = $1 AND body -> $2 = $3
        ORDER BY id ASC
        "#,
    )
    .bind(collection)
    .bind(field)
    .bind(value)
    .fetch_all(executor)
    .await
    .map_err(|e| map_error(e, collection, None))?;

    rows.into_iter().map(row_to_document).collect()
}

async fn insert_document<'e, E: PgExecutor<'e>>(
    executor: E,
    collection: &'static str,
    id: EntityId,
    body: serde_json::Value,
) -> Result<Version> {
    sqlx::query(
        r#"
        INSERT INTO documents (collection, id, version, body)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(collection)
    .bind(id.as_uuid())
    .bind(Version::first().as_i64())
    .bind(body)
    .execute(executor)
    .await
    .map_err(|e| map_error(e, collection, Some(id)))?;

    Ok(Version::first())
}

/// Compare-and-swap update. Returns `None` if no row matched.
async fn replace_document<'e, E: PgExecutor<'e>>(
    executor: E,
    collection: &'static str,
    id: EntityId,
    expected: Version,
    body: serde_json::Value,
) -> Result<Option<Version>> {
    let version: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE documents
        SET body = $4, version = version + 1, updated_at = NOW()
        WHERE collection = $1 AND id = $2 AND version = $3
        RETURNING version
        "#,
    )
    .bind(collection)
    .bind(id.as_uuid())
    .bind(expected.as_i64())
    .bind(body)
    .fetch_optional(executor)
    .await
    .map_err(|e| map_error(e, collection, Some(id)))?;

    Ok(version.map(Version::new))
}

async fn current_version<'e, E: PgExecutor<'e>>(
    executor: E,
    collection: &'static str,
    id: EntityId,
) -> Result<Option<Version>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT version FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id.as_uuid())
            .fetch_optional(executor)
            .await
            .map_err(|e| map_error(e, collection, Some(id)))?;

    Ok(version.map(Version::new))
}

fn mismatch(
    collection: &'static str,
    id: EntityId,
    expected: Version,
    actual: Option<Version>,
) -> StoreError {
    match actual {
        Some(actual) => StoreError::VersionMismatch {
            collection,
            id,
            expected,
            actual,
        },
        None => StoreError::NotFound { collection, id },
    }
}

async fn delete_document<'e, E: PgExecutor<'e>>(
    executor: E,
    collection: &'static str,
    id: EntityId,
) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection)
        .bind(id.as_uuid())
        .execute(executor)
        .await
        .map_err(|e| map_error(e, collection, Some(id)))?;

    Ok(result.rows_affected() > 0)
}

/// Autocommit handle: every operation is its own statement.
#[derive(Clone)]
pub struct PgSession {
    pool: PgPool,
}

#[async_trait]
impl DocumentOps for PgSession {
    async fn get(
        &mut self,
        collection: &'static str,
        id: EntityId,
    ) -> Result<Option<RawDocument>> {
        get_document(&self.pool, collection, id).await
    }

    async fn find_by_field(
        &mut self,
        collection: &'static str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<RawDocument>> {
        find_documents(&self.pool, collection, field, value).await
    }

    async fn insert(
        &mut self,
        collection: &'static str,
        id: EntityId,
        body: serde_json::Value,
    ) -> Result<Version> {
        insert_document(&self.pool, collection, id, body).await
    }

    async fn replace(
        &mut self,
        collection: &'static str,
        id: EntityId,
        expected: Version,
        body: serde_json::Value,
    ) -> Result<Version> {
        match replace_document(&self.pool, collection, id, expected, body).await? {
            Some(version) => Ok(version),
            None => {
                let actual = current_version(&self.pool, collection, id).await?;
                Err(mismatch(collection, id, expected, actual))
            }
        }
    }

    async fn remove(&mut self, collection: &'static str, id: EntityId) -> Result<bool> {
        delete_document(&self.pool, collection, id).await
    }
}

/// A PostgreSQL transaction.
///
/// The read concern picks the isolation level, the write concern picks
/// `synchronous_commit`, and the maximum duration bounds both each
/// statement and the transaction as a whole.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    started: Instant,
    max_duration: Duration,
}

impl PgTransaction {
    fn check_deadline(&self) -> Result<()> {
        if self.started.elapsed() > self.max_duration {
            return Err(StoreError::TransactionTimeout);
        }
        Ok(())
    }
}

fn isolation_level(read_concern: ReadConcern) -> &'static str {
    match read_concern {
        ReadConcern::Local => "READ COMMITTED",
        ReadConcern::Majority | ReadConcern::Snapshot => "REPEATABLE READ",
    }
}

fn synchronous_commit(write_concern: WriteConcern) -> &'static str {
    match write_concern {
        WriteConcern::Acknowledged => "local",
        WriteConcern::Majority => "on",
    }
}

#[async_trait]
impl DocumentOps for PgTransaction {
    async fn get(
        &mut self,
        collection: &'static str,
        id: EntityId,
    ) -> Result<Option<RawDocument>> {
        self.check_deadline()?;
        get_document(&mut *self.tx, collection, id).await
    }

    async fn find_by_field(
        &mut self,
        collection: &'static str,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<RawDocument>> {
        self.check_deadline()?;
        find_documents(&mut *self.tx, collection, field, value).await
    }

    async fn insert(
        &mut self,
        collection: &'static str,
        id: EntityId,
        body: serde_json::Value,
    ) -> Result<Version> {
        self.check_deadline()?;
        insert_document(&mut *self.tx, collection, id, body).await
    }

    async fn replace(
        &mut self,
        collection: &'static str,
        id: EntityId,
        expected: Version,
        body: serde_json::Value,
    ) -> Result<Version> {
        self.check_deadline()?;
        match replace_document(&mut *self.tx, collection, id, expected, body).await? {
            Some(version) => Ok(version),
            None => {
                let actual = current_version(&mut *self.tx, collection, id).await?;
                Err(mismatch(collection, id, expected, actual))
            }
        }
    }

    async fn remove(&mut self, collection: &'static str, id: EntityId) -> Result<bool> {
        self.check_deadline()?;
        delete_document(&mut *self.tx, collection, id).await
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn commit(self) -> Result<()> {
        self.check_deadline()?;
        self.tx
            .commit()
            .await
            .map_err(|e| map_error(e, "transaction", None))
    }

    async fn abort(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    type Session = PgSession;
    type Transaction = PgTransaction;

    fn session(&self) -> Self::Session {
        PgSession {
            pool: self.pool.clone(),
        }
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn begin(&self, options: &TransactionOptions) -> Result<Self::Transaction> {
        let mut tx = self.pool.begin().await?;

        let setup = format!(
            "SET TRANSACTION ISOLATION LEVEL {}; SET LOCAL synchronous_commit = {}; SET LOCAL statement_timeout = {};",
            isolation_level(options.read_concern),
            synchronous_commit(options.write_concern),
            options.max_duration.as_millis()
        );
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&setup)).await?;

        Ok(PgTransaction {
            tx,
            started: Instant::now(),
            max_duration: options.max_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_concern_maps_to_isolation() {
        assert_eq!(isolation_level(ReadConcern::Local), "READ COMMITTED");
        assert_eq!(isolation_level(ReadConcern::Majority), "REPEATABLE READ");
        assert_eq!(isolation_level(ReadConcern::Snapshot), "REPEATABLE READ");
    }

    #[test]
    fn write_concern_maps_to_synchronous_commit() {
        assert_eq!(synchronous_commit(WriteConcern::Acknowledged), "local");
        assert_eq!(synchronous_commit(WriteConcern::Majority), "on");
    }

    #[test]
    fn missing_row_is_not_found_not_mismatch() {
        let id = EntityId::new();
        assert!(matches!(
            mismatch("orders", id, Version::first(), None),
            StoreError::NotFound { .. }
        ));
        assert!(matches!(
            mismatch("orders", id, Version::first(), Some(Version::new(3))),
            StoreError::VersionMismatch { .. }
        ));
    }
}
