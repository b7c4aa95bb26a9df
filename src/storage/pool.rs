//! Connection pool and borrowed connections
//!
//! The adapter talks to exactly one backend per process. Each wrapper here
//! is an enum over the MySQL and SQLite flavours of the same sqlx type, so
//! the CRUD engine can run against either through [`Conn`].

use chrono::NaiveDateTime;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{Connection, Transaction};
use std::str::FromStr;
use std::time::Duration;

use crate::config::AdapterConfig;
use crate::error::{Error, Result};
use crate::storage::dialect::Dialect;
use crate::storage::sql::{bind_params, decode_row, SqlValue, Statement, ValueKind};

/// The pooled connection to the database
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Build the pool without opening a connection yet
    pub fn connect_lazy(config: &AdapterConfig) -> Result<Self> {
        let acquire_timeout = Duration::from_secs(config.pool.acquire_timeout_secs);
        match config.dialect() {
            Dialect::MySql => {
                let options = match &config.url {
                    Some(url) => MySqlConnectOptions::from_str(url).map_err(|e| Error::Configuration {
                        message: format!("invalid mysql url: {}", e),
                    })?,
                    None => {
                        let mut options = MySqlConnectOptions::new()
                            .host(config.host.as_deref().unwrap_or("localhost"))
                            .port(config.port)
                            .username(config.user.as_deref().unwrap_or_default());
                        if let Some(password) = &config.password {
                            options = options.password(password);
                        }
                        if let Some(database) = &config.database {
                            options = options.database(database);
                        }
                        options
                    }
                };
                let pool = MySqlPoolOptions::new()
                    .min_connections(config.pool.min)
                    .max_connections(config.pool.max)
                    .acquire_timeout(acquire_timeout)
                    .connect_lazy_with(options);
                Ok(DbPool::MySql(pool))
            }
            Dialect::Sqlite => {
                let url = config.url.as_deref().unwrap_or("sqlite::memory:");
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| Error::Configuration {
                        message: format!("invalid sqlite url: {}", e),
                    })?
                    .create_if_missing(true)
                    .foreign_keys(true);
                let pool = SqlitePoolOptions::new()
                    .min_connections(config.pool.min)
                    .max_connections(config.pool.max)
                    .acquire_timeout(acquire_timeout)
                    .connect_lazy_with(options);
                Ok(DbPool::Sqlite(pool))
            }
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DbPool::MySql(_) => Dialect::MySql,
            DbPool::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Open and ping a connection, retrying with exponential backoff
    pub async fn ping(&self, attempts: u32) -> Result<()> {
        let attempts = attempts.max(1);
        let mut delay = Duration::from_millis(200);
        let mut attempt = 1;
        loop {
            let result = match self.acquire().await {
                Ok(mut conn) => conn.ping().await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    tracing::info!("Connected to {} database", self.dialect().name());
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    return Err(Error::Connection {
                        attempts: attempt,
                        source,
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {}/{} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn acquire(&self) -> std::result::Result<PooledConn, sqlx::Error> {
        Ok(match self {
            DbPool::MySql(pool) => PooledConn::MySql(pool.acquire().await?),
            DbPool::Sqlite(pool) => PooledConn::Sqlite(pool.acquire().await?),
        })
    }

    pub async fn begin(&self) -> std::result::Result<DbTransaction, sqlx::Error> {
        Ok(match self {
            DbPool::MySql(pool) => DbTransaction::MySql(pool.begin().await?),
            DbPool::Sqlite(pool) => DbTransaction::Sqlite(pool.begin().await?),
        })
    }

    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// A connection checked out of the pool
#[derive(Debug)]
pub enum PooledConn {
    MySql(PoolConnection<MySql>),
    Sqlite(PoolConnection<Sqlite>),
}

impl PooledConn {
    pub fn conn(&mut self) -> Conn<'_> {
        match self {
            PooledConn::MySql(c) => Conn::MySql(&mut **c),
            PooledConn::Sqlite(c) => Conn::Sqlite(&mut **c),
        }
    }

    async fn ping(&mut self) -> std::result::Result<(), sqlx::Error> {
        match self {
            PooledConn::MySql(c) => c.ping().await,
            PooledConn::Sqlite(c) => c.ping().await,
        }
    }
}

/// An open transaction; rolled back by sqlx if dropped unfinished
#[derive(Debug)]
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Sqlite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    pub fn conn(&mut self) -> Conn<'_> {
        match self {
            DbTransaction::MySql(tx) => Conn::MySql(&mut **tx),
            DbTransaction::Sqlite(tx) => Conn::Sqlite(&mut **tx),
        }
    }

    pub async fn commit(self) -> std::result::Result<(), sqlx::Error> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await,
            DbTransaction::Sqlite(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> std::result::Result<(), sqlx::Error> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await,
            DbTransaction::Sqlite(tx) => tx.rollback().await,
        }
    }
}

/// Outcome of a statement that returns no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: Option<i64>,
}

/// A borrowed connection, pooled or inside a transaction
pub enum Conn<'c> {
    MySql(&'c mut MySqlConnection),
    Sqlite(&'c mut SqliteConnection),
}

impl Conn<'_> {
    pub fn dialect(&self) -> Dialect {
        match self {
            Conn::MySql(_) => Dialect::MySql,
            Conn::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Run a parameterized statement that returns no rows
    pub async fn execute(&mut self, stmt: &Statement) -> std::result::Result<ExecOutcome, sqlx::Error> {
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "execute");
        match self {
            Conn::MySql(c) => {
                let result = bind_params!(sqlx::query::<MySql>(&stmt.sql), &stmt.params)
                    .execute(&mut **c)
                    .await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: i64::try_from(result.last_insert_id()).ok(),
                })
            }
            Conn::Sqlite(c) => {
                let result = bind_params!(sqlx::query::<Sqlite>(&stmt.sql), &stmt.params)
                    .execute(&mut **c)
                    .await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: Some(result.last_insert_rowid()),
                })
            }
        }
    }

    /// Run a query and decode each row by position
    pub async fn fetch_all(
        &mut self,
        stmt: &Statement,
        kinds: &[ValueKind],
    ) -> std::result::Result<Vec<Vec<SqlValue>>, sqlx::Error> {
        tracing::debug!(sql = %stmt.sql, params = stmt.params.len(), "fetch");
        match self {
            Conn::MySql(c) => {
                let rows = bind_params!(sqlx::query::<MySql>(&stmt.sql), &stmt.params)
                    .fetch_all(&mut **c)
                    .await?;
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows {
                    out.push(decode_row!(row, kinds));
                }
                Ok(out)
            }
            Conn::Sqlite(c) => {
                let rows = bind_params!(sqlx::query::<Sqlite>(&stmt.sql), &stmt.params)
                    .fetch_all(&mut **c)
                    .await?;
                let mut out = Vec::with_capacity(rows.len());
                for row in &rows {
                    out.push(decode_row!(row, kinds));
                }
                Ok(out)
            }
        }
    }

    /// Single integer result, e.g. `COUNT(*)`
    pub async fn fetch_count(&mut self, stmt: &Statement) -> std::result::Result<u64, sqlx::Error> {
        let rows = self.fetch_all(stmt, &[ValueKind::Int]).await?;
        Ok(match rows.into_iter().next().and_then(|r| r.into_iter().next()) {
            Some(SqlValue::Int(n)) => u64::try_from(n).unwrap_or(0),
            _ => 0,
        })
    }

    /// Run unparameterized DDL
    pub async fn execute_ddl(&mut self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        tracing::debug!(sql = %sql, "ddl");
        match self {
            Conn::MySql(c) => {
                sqlx::raw_sql(sql).execute(&mut **c).await?;
            }
            Conn::Sqlite(c) => {
                sqlx::raw_sql(sql).execute(&mut **c).await?;
            }
        }
        Ok(())
    }
}
