//! The adapter handle
//!
//! One [`Adapter`] owns the connection pool, the open transactions and the
//! compiled schema. Every CRUD call first waits on the readiness gate, which
//! opens once [`Adapter::init`] has compiled and reconciled the collections.

use std::sync::Arc;
use tokio::sync::watch;

use crate::config::AdapterConfig;
use crate::error::{CollectionFailure, Error, Result};
use crate::query::{
    CreateArgs, DeleteArgs, Engine, EngineOptions, FindArgs, FindByIdArgs, FindOneArgs, PaginatedDocs, UpdateArgs,
    WhereArgs,
};
use crate::schema::reconcile::{self, ReconcileReport};
use crate::schema::{build_registry, CollectionConfig, MapperOptions, Naming, TableRegistry};
use crate::storage::{DbPool, Dialect, Document, Session, TransactionManager};

/// State of the readiness gate
#[derive(Debug, Clone)]
pub enum Readiness {
    /// `init` has not run yet
    Uninitialized,
    /// `init` is running; callers wait
    Pending,
    /// Schema is compiled and reconciled
    Ready(Arc<TableRegistry>),
    /// `init` failed outright, or the adapter was shut down
    Failed(String),
}

/// What `init` did
#[derive(Debug, Default)]
pub struct InitReport {
    /// Collections available for CRUD
    pub collections: Vec<String>,
    /// Tables dropped by `drop_database_on_init`
    pub dropped: Vec<String>,
    pub reconcile: ReconcileReport,
    pub warnings: Vec<String>,
}

/// Relational storage adapter for CMS collections
pub struct Adapter {
    config: AdapterConfig,
    pool: DbPool,
    transactions: TransactionManager,
    readiness: watch::Sender<Readiness>,
}

impl Adapter {
    /// Build the adapter without touching the database
    ///
    /// Must be called inside a Tokio runtime; the pool spawns its
    /// maintenance task on creation.
    pub fn new(config: AdapterConfig) -> Result<Self> {
        config.validate()?;
        let pool = DbPool::connect_lazy(&config)?;
        let (readiness, _) = watch::channel(Readiness::Uninitialized);
        tracing::debug!("Created adapter for {:?}", config);
        Ok(Self {
            config,
            pool,
            transactions: TransactionManager::new(),
            readiness,
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    /// Verify the database is reachable, retrying with backoff
    pub async fn connect(&self) -> Result<()> {
        self.pool.ping(self.config.connect_retries).await
    }

    // ========================================================================
    // Schema lifecycle
    // ========================================================================

    /// Compile `collections`, bring the live schema in line and open the gate
    ///
    /// A collection that fails to compile or reconcile is left out, along
    /// with every collection that references it; the rest become usable and
    /// the failures are returned as [`Error::SchemaCompilation`].
    pub async fn init(&self, collections: &[CollectionConfig]) -> Result<InitReport> {
        self.readiness.send_replace(Readiness::Pending);

        match self.initialize(collections).await {
            Ok((registry, report, failures)) => {
                self.readiness.send_replace(Readiness::Ready(Arc::new(registry)));
                if failures.is_empty() {
                    tracing::info!("Adapter ready with {} collection(s)", report.collections.len());
                    Ok(report)
                } else {
                    for failure in &failures {
                        tracing::error!("Collection '{}' is unavailable: {}", failure.collection, failure.reason);
                    }
                    Err(Error::SchemaCompilation { failures })
                }
            }
            Err(e) => {
                tracing::error!("Adapter initialization failed: {}", e);
                self.readiness.send_replace(Readiness::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn initialize(
        &self,
        collections: &[CollectionConfig],
    ) -> Result<(TableRegistry, InitReport, Vec<CollectionFailure>)> {
        let compiled = build_registry(collections, &self.naming(), &self.mapper_options());
        let mut registry = compiled.registry;
        let mut failures = compiled.failures;
        let mut report = InitReport {
            warnings: compiled.warnings,
            ..Default::default()
        };
        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }

        let locked = self.config.schema_locked();
        let mut pooled = self.pool.acquire().await.map_err(Error::query("*", "init"))?;
        let mut conn = pooled.conn();

        if self.config.drop_database_on_init {
            if locked {
                tracing::warn!("Ignoring drop_database_on_init: schema changes are locked in production");
            } else {
                report.dropped = reconcile::drop_managed(&mut conn, &registry).await?;
            }
        }

        if !locked && !self.config.push {
            tracing::info!("Schema push is disabled; verifying tables only");
        }
        let reconciled = reconcile::reconcile(&mut conn, &registry, locked || !self.config.push).await?;
        for warning in &reconciled.warnings {
            tracing::warn!("{}", warning);
        }

        let mut cascaded = registry.exclude(&reconciled.failures);
        failures.extend(reconciled.failures.iter().cloned());
        failures.append(&mut cascaded);

        report.collections = registry.collections().map(str::to_string).collect();
        report.reconcile = reconciled;
        Ok((registry, report, failures))
    }

    fn naming(&self) -> Naming {
        Naming::new(&self.config.table_prefix, &self.config.relationship_suffix)
    }

    fn mapper_options(&self) -> MapperOptions {
        MapperOptions {
            short_text_length: self.config.short_text_length,
            big_integers: self.config.big_integers,
            id_type: self.config.id_type,
        }
    }

    /// Wait for the gate and return the compiled registry
    pub async fn ready(&self) -> Result<Arc<TableRegistry>> {
        let mut rx = self.readiness.subscribe();
        let state = rx
            .wait_for(|s| !matches!(s, Readiness::Pending))
            .await
            .map_err(|_| Error::NotReady {
                reason: "adapter was dropped".to_string(),
            })?;
        match &*state {
            Readiness::Ready(registry) => Ok(Arc::clone(registry)),
            Readiness::Failed(reason) => Err(Error::NotReady { reason: reason.clone() }),
            Readiness::Uninitialized | Readiness::Pending => Err(Error::NotReady {
                reason: "init has not been called".to_string(),
            }),
        }
    }

    /// True once `init` has opened the gate, without waiting
    pub fn is_ready(&self) -> bool {
        matches!(*self.readiness.borrow(), Readiness::Ready(_))
    }

    /// The compiled registry, if the gate is open
    pub fn registry(&self) -> Option<Arc<TableRegistry>> {
        match &*self.readiness.borrow() {
            Readiness::Ready(registry) => Some(Arc::clone(registry)),
            _ => None,
        }
    }

    fn engine<'r>(&self, registry: &'r TableRegistry) -> Engine<'r> {
        Engine::new(
            registry,
            self.dialect(),
            EngineOptions {
                allow_id_on_create: self.config.allow_id_on_create,
                validate_relationships: self.config.validate_relationships,
            },
        )
    }

    async fn session(&self, transaction: Option<&str>, writes: bool, collection: &str) -> Result<Session> {
        Session::open(&self.pool, &self.transactions, transaction, writes, collection).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn find(&self, args: FindArgs) -> Result<PaginatedDocs> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), false, &args.collection).await?;
        let result = engine.find(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    /// First match, or `None`
    pub async fn find_one(&self, args: FindOneArgs) -> Result<Option<Document>> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), false, &args.collection).await?;
        let result = engine.find_one(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    pub async fn find_by_id(&self, args: FindByIdArgs) -> Result<Document> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), false, &args.collection).await?;
        let result = engine.find_by_id(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    pub async fn count(&self, args: WhereArgs) -> Result<u64> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), false, &args.collection).await?;
        let result = engine.count(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub async fn create(&self, args: CreateArgs) -> Result<Document> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), true, &args.collection).await?;
        let result = engine.create(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    pub async fn update(&self, args: UpdateArgs) -> Result<Document> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), true, &args.collection).await?;
        let result = engine.update(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    /// Delete one document and return it as it was
    pub async fn delete(&self, args: DeleteArgs) -> Result<Document> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), true, &args.collection).await?;
        let result = engine.delete(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    /// Delete every match and return how many went
    pub async fn delete_many(&self, args: WhereArgs) -> Result<u64> {
        let registry = self.ready().await?;
        let engine = self.engine(&registry);
        let mut session = self.session(args.transaction.as_deref(), true, &args.collection).await?;
        let result = engine.delete_many(&mut session.conn()?, &args).await;
        session.finish(&args.collection, result).await
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Open a transaction; pass the id to later operations to run inside it
    pub async fn begin_transaction(&self) -> Result<String> {
        self.transactions.begin(&self.pool).await
    }

    pub async fn commit_transaction(&self, id: &str) -> Result<()> {
        self.transactions.commit(id).await
    }

    pub async fn rollback_transaction(&self, id: &str) -> Result<()> {
        self.transactions.rollback(id).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Names of every table in the connected database
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let mut pooled = self.pool.acquire().await.map_err(Error::query("*", "list tables"))?;
        reconcile::list_tables(&mut pooled.conn()).await
    }

    /// Drop every table the adapter manages
    ///
    /// Closes the gate again: `init` must run before the next CRUD call.
    pub async fn drop_database(&self) -> Result<Vec<String>> {
        if self.config.schema_locked() {
            return Err(Error::SchemaLocked {
                operation: "drop the database",
            });
        }
        let registry = self.ready().await?;
        let mut pooled = self.pool.acquire().await.map_err(Error::query("*", "drop database"))?;
        let dropped = reconcile::drop_managed(&mut pooled.conn(), &registry).await?;
        self.readiness.send_replace(Readiness::Uninitialized);
        Ok(dropped)
    }

    /// Roll back open transactions and close the pool
    pub async fn destroy(&self) {
        let open = self.transactions.open_count().await;
        if open > 0 {
            tracing::warn!("Rolling back {} open transaction(s) on shutdown", open);
        }
        self.transactions.rollback_all().await;
        self.pool.close().await;
        self.readiness
            .send_replace(Readiness::Failed("adapter has been destroyed".to_string()));
        tracing::info!("Adapter destroyed");
    }
}
