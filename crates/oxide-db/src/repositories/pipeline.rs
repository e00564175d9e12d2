//! PostgreSQL implementation of PipelineStore.

use async_trait::async_trait;
use oxide_core::ids::{PipelineId, ProjectId, raw_ids};
use oxide_core::pipeline::Pipeline;
use oxide_core::ports::PipelineStore;
use oxide_core::status::CiStatus;
use oxide_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashSet;

const PIPELINE_COLUMNS: &str = "id, project_id, ref, sha, source, status, \
     auto_cancel_on_new_commit, parent_pipeline_id, created_at";

/// Walks parent links upwards in one round trip. The deepest row is either
/// the root, the first repeated pipeline (`cycle`), or the row at the depth
/// bound.
const ROOT_ANCESTOR_QUERY: &str = "\
    WITH RECURSIVE chain (id, parent_pipeline_id, source, depth, path, cycle) AS ( \
        SELECT id, parent_pipeline_id, source, 0, ARRAY[id], FALSE \
        FROM pipelines WHERE id = $1 \
      UNION ALL \
        SELECT p.id, p.parent_pipeline_id, p.source, c.depth + 1, c.path || p.id, \
               p.id = ANY(c.path) \
        FROM chain c \
        JOIN pipelines p ON p.id = c.parent_pipeline_id \
        WHERE c.source = 'parent_pipeline' AND NOT c.cycle AND c.depth < $2 \
    ) \
    SELECT c.depth, c.cycle, p.id, p.project_id, p.ref, p.sha, p.source, p.status, \
           p.auto_cancel_on_new_commit, p.parent_pipeline_id, p.created_at \
    FROM chain c JOIN pipelines p ON p.id = c.id \
    ORDER BY c.depth DESC \
    LIMIT 1";

/// PostgreSQL implementation of PipelineStore.
#[derive(Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pipeline(r: &PgRow) -> Result<Pipeline> {
        let source: String = r.get("source");
        let status: String = r.get("status");
        let policy: String = r.get("auto_cancel_on_new_commit");

        Ok(Pipeline {
            id: PipelineId::new(r.get("id")),
            project_id: ProjectId::new(r.get("project_id")),
            git_ref: r.get("ref"),
            sha: r.get("sha"),
            source: source.parse()?,
            status: status.parse()?,
            auto_cancel_on_new_commit: policy.parse()?,
            parent_pipeline_id: r
                .get::<Option<i64>, _>("parent_pipeline_id")
                .map(PipelineId::new),
            created_at: r.get("created_at"),
        })
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn find(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        let row = sqlx::query(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = $1"
        ))
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_pipeline).transpose()
    }

    async fn ref_pipeline_ids(
        &self,
        project_id: ProjectId,
        git_ref: &str,
        exclude: PipelineId,
        statuses: &[CiStatus],
        limit: usize,
    ) -> Result<Vec<PipelineId>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM pipelines \
             WHERE project_id = $1 AND ref = $2 AND id <> $3 AND status = ANY($4) \
             ORDER BY id DESC LIMIT $5",
        )
        .bind(project_id.value())
        .bind(git_ref)
        .bind(exclude.value())
        .bind(CiStatus::names(statuses))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(ids.into_iter().map(PipelineId::new).collect())
    }

    async fn find_batch(&self, ids: &[PipelineId]) -> Result<Vec<Pipeline>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = sqlx::query(&format!(
            "SELECT {PIPELINE_COLUMNS} FROM pipelines WHERE id = ANY($1) ORDER BY id ASC"
        ))
        .bind(raw_ids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_pipeline).collect()
    }

    async fn conservative_interruptible(&self, ids: &[PipelineId]) -> Result<HashSet<PipelineId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let safe: Vec<i64> = sqlx::query_scalar(
            "SELECT p.id FROM pipelines p \
             WHERE p.id = ANY($1) AND NOT EXISTS ( \
                 SELECT 1 FROM builds b \
                 WHERE b.pipeline_id = p.id \
                   AND b.status = ANY($2) \
                   AND b.interruptible IS DISTINCT FROM TRUE)",
        )
        .bind(raw_ids(ids))
        .bind(CiStatus::names(&CiStatus::STARTED))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(safe.into_iter().map(PipelineId::new).collect())
    }

    async fn root_ancestor(&self, pipeline: &Pipeline, max_depth: usize) -> Result<Pipeline> {
        if !pipeline.is_child() {
            return Ok(pipeline.clone());
        }

        let row = sqlx::query(ROOT_ANCESTOR_QUERY)
            .bind(pipeline.id.value())
            .bind(i32::try_from(max_depth).unwrap_or(i32::MAX))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(pipeline.clone());
        };

        let depth: i32 = row.get("depth");
        let cycle: bool = row.get("cycle");
        let root = Self::row_to_pipeline(&row)?;

        if cycle {
            return Err(Error::CorruptAncestry {
                pipeline: pipeline.id,
                reason: format!("cycle through pipeline {}", root.id),
            });
        }
        if usize::try_from(depth).unwrap_or(usize::MAX) >= max_depth {
            return Err(Error::CorruptAncestry {
                pipeline: pipeline.id,
                reason: format!("deeper than {max_depth} levels"),
            });
        }

        Ok(root)
    }
}
