//! Test context wiring the PostgreSQL adapters to a throwaway database.

use crate::containers::PostgresContainer;
use oxide_db::{
    Database, PgBuildStore, PgCancellationExecutor, PgComputeQuota, PgPipelineStore,
    PgProjectRepository, PgRunnerCatalog,
};

/// Migrated PostgreSQL database plus its adapters.
///
/// Drop this to stop the container.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl TestContext {
    /// Start PostgreSQL and apply migrations.
    pub async fn postgres_only() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        Ok(Self { postgres, db })
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }

    pub fn pipelines(&self) -> PgPipelineStore {
        PgPipelineStore::new(self.db.pool().clone())
    }

    pub fn builds(&self) -> PgBuildStore {
        PgBuildStore::new(self.db.pool().clone())
    }

    pub fn runners(&self) -> PgRunnerCatalog {
        PgRunnerCatalog::new(self.db.pool().clone())
    }

    pub fn quota(&self) -> PgComputeQuota {
        PgComputeQuota::new(self.db.pool().clone())
    }

    pub fn executor(&self) -> PgCancellationExecutor {
        PgCancellationExecutor::new(self.db.pool().clone())
    }

    pub fn projects(&self) -> PgProjectRepository {
        PgProjectRepository::new(self.db.pool().clone())
    }
}
