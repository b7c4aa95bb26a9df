//! Transactions
//!
//! Callers may open a transaction and pass its id to any later operation;
//! those operations then run on the transaction's connection. Operations
//! called without an id that write more than one statement get a
//! transaction of their own, committed when they succeed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::pool::{Conn, DbPool, DbTransaction, PooledConn};

type SharedTransaction = Arc<Mutex<Option<DbTransaction>>>;

/// Open transactions keyed by id
#[derive(Default)]
pub struct TransactionManager {
    open: Mutex<HashMap<String, SharedTransaction>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction and return its id
    pub async fn begin(&self, pool: &DbPool) -> Result<String> {
        let tx = pool.begin().await.map_err(Error::query("*", "begin transaction"))?;
        let id = Uuid::new_v4().to_string();
        self.open
            .lock()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(Some(tx))));
        tracing::debug!("Began transaction {}", id);
        Ok(id)
    }

    /// Wait for exclusive use of an open transaction
    pub async fn join(&self, id: &str) -> Result<OwnedMutexGuard<Option<DbTransaction>>> {
        let shared = self.open.lock().await.get(id).cloned();
        let Some(shared) = shared else {
            return Err(Error::UnknownTransaction { id: id.to_string() });
        };
        let guard = shared.lock_owned().await;
        if guard.is_none() {
            // Committed or rolled back while we waited
            return Err(Error::UnknownTransaction { id: id.to_string() });
        }
        Ok(guard)
    }

    pub async fn commit(&self, id: &str) -> Result<()> {
        let tx = self.take(id).await?;
        tx.commit().await.map_err(Error::query("*", "commit transaction"))?;
        tracing::debug!("Committed transaction {}", id);
        Ok(())
    }

    pub async fn rollback(&self, id: &str) -> Result<()> {
        let tx = self.take(id).await?;
        tx.rollback().await.map_err(Error::query("*", "rollback transaction"))?;
        tracing::debug!("Rolled back transaction {}", id);
        Ok(())
    }

    /// Roll back everything still open, e.g. on shutdown
    pub async fn rollback_all(&self) {
        let ids: Vec<String> = self.open.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.rollback(&id).await {
                tracing::warn!("Failed to roll back transaction {}: {}", id, e);
            }
        }
    }

    pub async fn open_count(&self) -> usize {
        self.open.lock().await.len()
    }

    async fn take(&self, id: &str) -> Result<DbTransaction> {
        let shared = self.open.lock().await.remove(id);
        let Some(shared) = shared else {
            return Err(Error::UnknownTransaction { id: id.to_string() });
        };
        let tx = shared.lock().await.take();
        tx.ok_or_else(|| Error::UnknownTransaction { id: id.to_string() })
    }
}

/// The connection one operation runs on
pub enum Session {
    /// Plain pooled connection, autocommit
    Pooled(PooledConn),
    /// Transaction owned by this operation
    Owned(DbTransaction),
    /// A caller's transaction, held exclusively for this operation
    Joined(OwnedMutexGuard<Option<DbTransaction>>),
}

impl Session {
    /// Pick the connection for an operation
    pub async fn open(
        pool: &DbPool,
        transactions: &TransactionManager,
        transaction: Option<&str>,
        writes: bool,
        collection: &str,
    ) -> Result<Self> {
        match transaction {
            Some(id) => Ok(Session::Joined(transactions.join(id).await?)),
            None if writes => pool
                .begin()
                .await
                .map(Session::Owned)
                .map_err(Error::query(collection, "begin transaction")),
            None => pool
                .acquire()
                .await
                .map(Session::Pooled)
                .map_err(Error::query(collection, "acquire connection")),
        }
    }

    pub fn conn(&mut self) -> Result<Conn<'_>> {
        match self {
            Session::Pooled(c) => Ok(c.conn()),
            Session::Owned(tx) => Ok(tx.conn()),
            Session::Joined(guard) => match guard.as_mut() {
                Some(tx) => Ok(tx.conn()),
                None => Err(Error::UnknownTransaction { id: String::new() }),
            },
        }
    }

    /// Commit an owned transaction when the operation succeeded, roll it
    /// back otherwise. Joined transactions are left to their owner.
    pub async fn finish<T>(self, collection: &str, result: Result<T>) -> Result<T> {
        let Session::Owned(tx) = self else {
            return result;
        };
        match result {
            Ok(value) => {
                tx.commit().await.map_err(Error::query(collection, "commit"))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!("Rollback on '{}' failed: {}", collection, rollback);
                }
                Err(e)
            }
        }
    }
}
