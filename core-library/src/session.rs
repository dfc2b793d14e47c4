//! # Session-Scoped Transactions
//!
//! Repositories share one [`DbSession`]. While a transaction is open on the
//! session, every repository query runs inside it; otherwise queries use a
//! pooled connection. This lets the synchronization engine commit in batches
//! (commit, then begin again) without the repositories knowing about batching.
//!
//! The session holds at most one transaction. Callers must not hold a
//! [`SessionConnection`] across a call into another repository method, since
//! the transaction connection is guarded by a non-reentrant lock.

use crate::error::{LibraryError, Result};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use tracing::debug;

/// Begin/commit/rollback control over the shared session.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Opens a transaction. Fails if one is already open.
    async fn begin(&self) -> Result<()>;

    /// Commits the open transaction. Fails if none is open.
    async fn commit(&self) -> Result<()>;

    /// Rolls back the open transaction. A no-op when none is open.
    async fn rollback(&self) -> Result<()>;

    async fn in_transaction(&self) -> bool;
}

/// A connection pool plus an optional open transaction.
pub struct DbSession {
    pool: SqlitePool,
    tx: Arc<Mutex<Option<Transaction<'static, Sqlite>>>>,
}

type OpenTransaction = Option<Transaction<'static, Sqlite>>;

impl DbSession {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tx: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connection for the next query: the open transaction if any, else a pooled one.
    ///
    /// The guard is owned rather than borrowed from the session, so the
    /// futures of the repository methods holding it stay `Send`.
    pub async fn connection(&self) -> Result<SessionConnection> {
        let guard = Arc::clone(&self.tx).lock_owned().await;
        match OwnedMutexGuard::try_map(guard, |tx| tx.as_mut()) {
            Ok(tx) => Ok(SessionConnection::Transaction(tx)),
            Err(guard) => {
                drop(guard);
                Ok(SessionConnection::Pooled(self.pool.acquire().await?))
            }
        }
    }
}

impl std::fmt::Debug for DbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSession")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

#[async_trait]
impl TransactionManager for DbSession {
    async fn begin(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        if guard.is_some() {
            return Err(LibraryError::Transaction(
                "A transaction is already open on this session".to_string(),
            ));
        }
        *guard = Some(self.pool.begin().await?);
        debug!("Transaction started");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(|| {
            LibraryError::Transaction("No open transaction to commit".to_string())
        })?;
        tx.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self.tx.lock().await.take();
        if let Some(tx) = tx {
            tx.rollback().await?;
            debug!("Transaction rolled back");
        }
        Ok(())
    }

    async fn in_transaction(&self) -> bool {
        self.tx.lock().await.is_some()
    }
}

/// Either the session's transaction or a pooled connection.
///
/// Derefs to `SqliteConnection`, so `&mut *conn` is a valid sqlx executor.
pub enum SessionConnection {
    Transaction(OwnedMappedMutexGuard<OpenTransaction, Transaction<'static, Sqlite>>),
    Pooled(PoolConnection<Sqlite>),
}

impl Deref for SessionConnection {
    type Target = SqliteConnection;

    fn deref(&self) -> &SqliteConnection {
        match self {
            SessionConnection::Transaction(tx) => tx,
            SessionConnection::Pooled(conn) => conn,
        }
    }
}

impl DerefMut for SessionConnection {
    fn deref_mut(&mut self) -> &mut SqliteConnection {
        match self {
            SessionConnection::Transaction(tx) => tx,
            SessionConnection::Pooled(conn) => conn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    async fn count_rows(session: &DbSession) -> i64 {
        let mut conn = session.connection().await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_runs")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        count
    }

    async fn insert_run(session: &DbSession, id: &str) {
        let mut conn = session.connection().await.unwrap();
        sqlx::query(
            "INSERT INTO sync_runs (id, gallery_id, root_path, state, recursive, started_by, started_at) \
             VALUES (?, 1, '/g', 'Scanning', 1, 'test', 0)",
        )
        .bind(id)
        .execute(&mut *conn)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let session = DbSession::new(create_test_pool().await.unwrap());

        session.begin().await.unwrap();
        assert!(session.in_transaction().await);
        insert_run(&session, "a").await;
        session.commit().await.unwrap();

        assert!(!session.in_transaction().await);
        assert_eq!(count_rows(&session).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let session = DbSession::new(create_test_pool().await.unwrap());

        session.begin().await.unwrap();
        insert_run(&session, "a").await;
        session.rollback().await.unwrap();

        assert_eq!(count_rows(&session).await, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_commit_survives_later_rollback() {
        let session = DbSession::new(create_test_pool().await.unwrap());

        session.begin().await.unwrap();
        insert_run(&session, "a").await;
        session.commit().await.unwrap();
        session.begin().await.unwrap();
        insert_run(&session, "b").await;
        session.rollback().await.unwrap();

        assert_eq!(count_rows(&session).await, 1);
    }

    #[tokio::test]
    async fn test_transaction_state_errors() {
        let session = DbSession::new(create_test_pool().await.unwrap());

        assert!(session.commit().await.is_err());
        assert!(session.rollback().await.is_ok());

        session.begin().await.unwrap();
        assert!(session.begin().await.is_err());
        session.rollback().await.unwrap();
    }
}
