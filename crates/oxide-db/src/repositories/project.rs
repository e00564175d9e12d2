//! PostgreSQL implementation of ProjectRepository.

use async_trait::async_trait;
use oxide_core::ids::ProjectId;
use oxide_core::ports::ProjectRepository;
use oxide_core::{Error, Result};
use sqlx::PgPool;

#[derive(Clone)]
pub struct PgProjectRepository {
    pool: PgPool,
}

impl PgProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    async fn auto_cancel_pending_pipelines(&self, project_id: ProjectId) -> Result<bool> {
        let enabled: Option<bool> = sqlx::query_scalar(
            "SELECT auto_cancel_pending_pipelines FROM projects WHERE id = $1",
        )
        .bind(project_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        enabled.ok_or_else(|| Error::Other(format!("project {project_id} not found")))
    }

    async fn ref_head_sha(&self, project_id: ProjectId, git_ref: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT head_sha FROM refs WHERE project_id = $1 AND name = $2")
            .bind(project_id.value())
            .bind(git_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
