//! PostgreSQL implementation of BuildStore and BuildDropper.

use async_trait::async_trait;
use oxide_core::build::{Build, FailureReason, RequirementSignature};
use oxide_core::ids::{BuildId, PipelineId, ProjectId, raw_ids};
use oxide_core::ports::{BuildDropper, BuildStore, PipelineProcessor};
use oxide_core::status::CiStatus;
use oxide_core::{Error, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PgBuildStore {
    pool: PgPool,
    processor: Option<Arc<dyn PipelineProcessor>>,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            processor: None,
        }
    }

    /// Recompute pipeline status with `processor` after drops that do not
    /// skip processing.
    pub fn with_processor(mut self, processor: Arc<dyn PipelineProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    fn str_to_failure_reason(s: &str) -> Option<FailureReason> {
        match s {
            "no_matching_runner" => Some(FailureReason::NoMatchingRunner),
            "ci_quota_exceeded" => Some(FailureReason::CiQuotaExceeded),
            _ => None,
        }
    }

    fn row_to_build(r: &PgRow) -> Result<Build> {
        let status: String = r.get("status");
        let tags: Vec<String> = r.get("tags");
        let failure_reason: Option<String> = r.get("failure_reason");

        Ok(Build {
            id: BuildId::new(r.get("id")),
            pipeline_id: PipelineId::new(r.get("pipeline_id")),
            project_id: ProjectId::new(r.get("project_id")),
            name: r.get("name"),
            status: status.parse()?,
            interruptible: r.get("interruptible"),
            requirement: RequirementSignature::new(tags, r.get("protected")),
            failure_reason: failure_reason
                .as_deref()
                .and_then(Self::str_to_failure_reason),
        })
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn unscheduled_builds(&self, pipeline_id: PipelineId) -> Result<Vec<Build>> {
        let rows = sqlx::query(
            "SELECT id, pipeline_id, project_id, name, status, interruptible, tags, protected, failure_reason \
             FROM builds WHERE pipeline_id = $1 AND status = $2 ORDER BY id ASC",
        )
        .bind(pipeline_id.value())
        .bind(CiStatus::Created.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_build).collect()
    }
}

#[async_trait]
impl BuildDropper for PgBuildStore {
    async fn drop_builds(
        &self,
        build_ids: &[BuildId],
        reason: FailureReason,
        skip_pipeline_processing: bool,
    ) -> Result<usize> {
        if build_ids.is_empty() {
            return Ok(0);
        }

        // Only builds still waiting to run are moved; started or already
        // failed builds keep their state.
        let pipelines: Vec<i64> = sqlx::query_scalar(
            "UPDATE builds SET status = $1, failure_reason = $2, updated_at = NOW() \
             WHERE id = ANY($3) AND status = $4 \
             RETURNING pipeline_id",
        )
        .bind(CiStatus::Failed.as_str())
        .bind(reason.as_str())
        .bind(raw_ids(build_ids))
        .bind(CiStatus::Created.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        let dropped = pipelines.len();
        debug!(requested = build_ids.len(), dropped, reason = %reason, "Dropped builds");

        if skip_pipeline_processing || pipelines.is_empty() {
            return Ok(dropped);
        }

        let Some(processor) = &self.processor else {
            warn!(
                dropped,
                "Drop asked for pipeline processing but no processor is configured"
            );
            return Ok(dropped);
        };

        let mut pipelines = pipelines;
        pipelines.sort_unstable();
        pipelines.dedup();
        for pipeline_id in pipelines {
            processor.process(PipelineId::new(pipeline_id)).await?;
        }

        Ok(dropped)
    }
}
